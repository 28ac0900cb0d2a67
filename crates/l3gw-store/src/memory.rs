//! In-memory [`ModelStore`] with optional snapshot persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use l3gw_common::types::SYSTEM_TARGET_DESCRIPTION;
use l3gw_common::{L3Error, L3Result, Route, RouteTable, Subnet, Target};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::model_store::{
    ModelStore, NewRoute, NewSubnet, RouteTableUpdate, RouteUpdate, SubnetUpdate,
};
use crate::snapshot::{self, Tables};

/// Model store holding every table in memory.
///
/// With a snapshot path, each mutation is applied to a copy of the tables,
/// written to disk, and only then published; a failed write leaves the
/// store unchanged.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty, non-persistent store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
        }
    }

    /// Opens a persistent store, loading an existing snapshot if present.
    pub fn open(path: impl AsRef<Path>) -> L3Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = snapshot::load(&path)?;
        debug!(
            path = %path.display(),
            subnets = tables.subnets.len(),
            routetables = tables.routetables.len(),
            routes = tables.routes.len(),
            "Loaded model snapshot"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> L3Result<T>) -> L3Result<T> {
        f(&*self.tables.read())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> L3Result<T>) -> L3Result<T> {
        let mut guard = self.tables.write();
        match &self.snapshot_path {
            None => f(&mut *guard),
            Some(path) => {
                let mut next = guard.clone();
                let out = f(&mut next)?;
                snapshot::save(path, &next)?;
                *guard = next;
                Ok(out)
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    fn subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<&Subnet> {
        self.subnets
            .iter()
            .find(|s| s.id == subnet_id && s.tenant_id == tenant_id)
            .ok_or_else(|| L3Error::subnet_not_found(subnet_id))
    }

    fn subnet_mut(&mut self, tenant_id: &str, subnet_id: Uuid) -> L3Result<&mut Subnet> {
        self.subnets
            .iter_mut()
            .find(|s| s.id == subnet_id && s.tenant_id == tenant_id)
            .ok_or_else(|| L3Error::subnet_not_found(subnet_id))
    }

    fn routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<&RouteTable> {
        self.routetables
            .iter()
            .find(|rt| rt.id == routetable_id && rt.tenant_id == tenant_id)
            .ok_or_else(|| L3Error::routetable_not_found(routetable_id))
    }

    fn has_routetable(&self, routetable_id: Uuid) -> L3Result<()> {
        if self.routetables.iter().any(|rt| rt.id == routetable_id) {
            Ok(())
        } else {
            Err(L3Error::routetable_not_found(routetable_id))
        }
    }

    fn route_index(&self, routetable_id: Uuid, route_id: Uuid) -> L3Result<usize> {
        self.has_routetable(routetable_id)?;
        self.routes
            .iter()
            .position(|r| r.id == route_id && r.routetable_id == routetable_id)
            .ok_or_else(|| L3Error::route_not_found(routetable_id, route_id))
    }

    fn check_duplicate_cidr(
        &self,
        tenant_id: &str,
        cidr: &Ipv4Net,
        except: Option<Uuid>,
    ) -> L3Result<()> {
        let clash = self
            .subnets
            .iter()
            .any(|s| s.tenant_id == tenant_id && &s.cidr == cidr && Some(s.id) != except);
        if clash {
            return Err(L3Error::DuplicateCidr {
                tenant_id: tenant_id.to_string(),
                cidr: cidr.to_string(),
            });
        }
        Ok(())
    }

    fn check_duplicate_route(&self, candidate: &NewRoute, except: Option<Uuid>) -> L3Result<()> {
        let clash = self.routes.iter().any(|r| {
            r.routetable_id == candidate.routetable_id
                && Some(r.id) != except
                && r.same_spec(&candidate.source, &candidate.destination, &candidate.target)
        });
        if clash {
            return Err(L3Error::DuplicateRoute {
                routetable_id: candidate.routetable_id,
                source_value: candidate.source.to_string(),
                destination: candidate.destination.to_string(),
                target: candidate.target.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn create_subnet(&self, new: NewSubnet) -> L3Result<Subnet> {
        self.mutate(|t| {
            t.check_duplicate_cidr(&new.tenant_id, &new.cidr, None)?;
            let subnet = Subnet {
                id: Uuid::new_v4(),
                tenant_id: new.tenant_id,
                cidr: new.cidr,
                network_id: new.network_id,
                routetable_id: None,
            };
            t.subnets.push(subnet.clone());
            Ok(subnet)
        })
    }

    async fn get_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Subnet> {
        self.read(|t| t.subnet(tenant_id, subnet_id).cloned())
    }

    async fn list_subnets(&self, tenant_id: &str) -> L3Result<Vec<Subnet>> {
        self.read(|t| {
            Ok(t.subnets
                .iter()
                .filter(|s| s.tenant_id == tenant_id)
                .cloned()
                .collect())
        })
    }

    async fn update_subnet(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        update: SubnetUpdate,
    ) -> L3Result<Subnet> {
        self.mutate(|t| {
            t.subnet(tenant_id, subnet_id)?;
            if let Some(cidr) = &update.cidr {
                t.check_duplicate_cidr(tenant_id, cidr, Some(subnet_id))?;
            }
            let subnet = t.subnet_mut(tenant_id, subnet_id)?;
            if let Some(cidr) = update.cidr {
                subnet.cidr = cidr;
            }
            if let Some(network_id) = update.network_id {
                subnet.network_id = network_id;
            }
            Ok(subnet.clone())
        })
    }

    async fn delete_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Subnet> {
        self.mutate(|t| {
            let pos = t
                .subnets
                .iter()
                .position(|s| s.id == subnet_id && s.tenant_id == tenant_id)
                .ok_or_else(|| L3Error::subnet_not_found(subnet_id))?;
            Ok(t.subnets.remove(pos))
        })
    }

    async fn subnet_routes(&self, subnet_id: Uuid) -> L3Result<Vec<Route>> {
        self.read(|t| {
            Ok(t.routes
                .iter()
                .filter(|r| r.references_subnet(subnet_id))
                .cloned()
                .collect())
        })
    }

    async fn create_routetable(
        &self,
        tenant_id: &str,
        label: Option<String>,
        description: Option<String>,
    ) -> L3Result<RouteTable> {
        self.mutate(|t| {
            let routetable = RouteTable {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                label: label
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| RouteTable::default_label(tenant_id)),
                description: description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| RouteTable::default_description(tenant_id)),
            };
            t.routetables.push(routetable.clone());
            Ok(routetable)
        })
    }

    async fn get_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<RouteTable> {
        self.read(|t| t.routetable(tenant_id, routetable_id).cloned())
    }

    async fn list_routetables(&self, tenant_id: &str) -> L3Result<Vec<RouteTable>> {
        self.read(|t| {
            Ok(t.routetables
                .iter()
                .filter(|rt| rt.tenant_id == tenant_id)
                .cloned()
                .collect())
        })
    }

    async fn update_routetable(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        update: RouteTableUpdate,
    ) -> L3Result<RouteTable> {
        self.mutate(|t| {
            t.routetable(tenant_id, routetable_id)?;
            let routetable = t
                .routetables
                .iter_mut()
                .find(|rt| rt.id == routetable_id)
                .ok_or_else(|| L3Error::routetable_not_found(routetable_id))?;
            if let Some(label) = update.label.filter(|l| !l.is_empty()) {
                routetable.label = label;
            }
            if let Some(description) = update.description.filter(|d| !d.is_empty()) {
                routetable.description = description;
            }
            Ok(routetable.clone())
        })
    }

    async fn delete_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<RouteTable> {
        self.mutate(|t| {
            t.routetable(tenant_id, routetable_id)?;
            let before = t.routes.len();
            t.routes.retain(|r| r.routetable_id != routetable_id);
            for subnet in t.subnets.iter_mut() {
                if subnet.routetable_id == Some(routetable_id) {
                    subnet.routetable_id = None;
                }
            }
            let pos = t
                .routetables
                .iter()
                .position(|rt| rt.id == routetable_id)
                .ok_or_else(|| L3Error::routetable_not_found(routetable_id))?;
            debug!(
                routetable = %routetable_id,
                routes = before - t.routes.len(),
                "Cascaded route table delete"
            );
            Ok(t.routetables.remove(pos))
        })
    }

    async fn associated_subnets(&self, routetable_id: Uuid) -> L3Result<Vec<Subnet>> {
        self.read(|t| {
            Ok(t.subnets
                .iter()
                .filter(|s| s.routetable_id == Some(routetable_id))
                .cloned()
                .collect())
        })
    }

    async fn create_route(&self, new: NewRoute) -> L3Result<Route> {
        self.mutate(|t| {
            t.has_routetable(new.routetable_id)?;
            t.check_duplicate_route(&new, None)?;
            let route = Route {
                id: Uuid::new_v4(),
                routetable_id: new.routetable_id,
                source: new.source,
                destination: new.destination,
                target: new.target,
            };
            t.routes.push(route.clone());
            Ok(route)
        })
    }

    async fn get_route(&self, routetable_id: Uuid, route_id: Uuid) -> L3Result<Route> {
        self.read(|t| {
            let idx = t.route_index(routetable_id, route_id)?;
            Ok(t.routes[idx].clone())
        })
    }

    async fn list_routes(&self, routetable_id: Uuid) -> L3Result<Vec<Route>> {
        self.read(|t| {
            t.has_routetable(routetable_id)?;
            Ok(t.routes
                .iter()
                .filter(|r| r.routetable_id == routetable_id)
                .cloned()
                .collect())
        })
    }

    async fn update_route(
        &self,
        routetable_id: Uuid,
        route_id: Uuid,
        update: RouteUpdate,
    ) -> L3Result<Route> {
        self.mutate(|t| {
            let idx = t.route_index(routetable_id, route_id)?;
            let current = &t.routes[idx];
            let candidate = NewRoute {
                routetable_id,
                source: update.source.unwrap_or(current.source),
                destination: update.destination.unwrap_or(current.destination),
                target: update.target.unwrap_or_else(|| current.target.clone()),
            };
            t.check_duplicate_route(&candidate, Some(route_id))?;
            let route = &mut t.routes[idx];
            route.source = candidate.source;
            route.destination = candidate.destination;
            route.target = candidate.target;
            Ok(route.clone())
        })
    }

    async fn delete_route(&self, routetable_id: Uuid, route_id: Uuid) -> L3Result<Route> {
        self.mutate(|t| {
            let idx = t.route_index(routetable_id, route_id)?;
            Ok(t.routes.remove(idx))
        })
    }

    async fn create_target(
        &self,
        tenant_id: Option<&str>,
        tag: &str,
        description: Option<String>,
    ) -> L3Result<Target> {
        let tag = tag.to_lowercase();
        self.mutate(|t| {
            if t
                .targets
                .iter()
                .any(|x| x.tag == tag && x.tenant_id.as_deref() == tenant_id)
            {
                return Err(L3Error::DuplicateTarget { tag });
            }
            let target = Target {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.map(str::to_string),
                tag,
                description: description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| SYSTEM_TARGET_DESCRIPTION.to_string()),
            };
            t.targets.push(target.clone());
            Ok(target)
        })
    }

    async fn get_target(&self, tenant_id: &str, tag: &str) -> L3Result<Target> {
        let tag = tag.to_lowercase();
        self.read(|t| {
            let visible = |x: &&Target| x.tag == tag;
            t.targets
                .iter()
                .filter(visible)
                .find(|x| x.tenant_id.as_deref() == Some(tenant_id))
                .or_else(|| {
                    t.targets
                        .iter()
                        .filter(visible)
                        .find(|x| x.tenant_id.is_none())
                })
                .cloned()
                .ok_or_else(|| L3Error::target_not_found(tag.clone()))
        })
    }

    async fn list_targets(&self, tenant_id: &str) -> L3Result<Vec<Target>> {
        self.read(|t| {
            let system = t.targets.iter().filter(|x| x.tenant_id.is_none());
            let own = t
                .targets
                .iter()
                .filter(|x| x.tenant_id.as_deref() == Some(tenant_id));
            Ok(system.chain(own).cloned().collect())
        })
    }

    async fn delete_target(&self, tenant_id: &str, target_id: Uuid) -> L3Result<Target> {
        self.mutate(|t| {
            let pos = t
                .targets
                .iter()
                .position(|x| x.id == target_id && x.tenant_id.as_deref() == Some(tenant_id))
                .ok_or_else(|| L3Error::target_not_found(target_id.to_string()))?;
            Ok(t.targets.remove(pos))
        })
    }

    async fn set_association(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        routetable_id: Uuid,
    ) -> L3Result<Subnet> {
        self.mutate(|t| {
            t.routetable(tenant_id, routetable_id)?;
            let subnet = t.subnet_mut(tenant_id, subnet_id)?;
            if let Some(current) = subnet.routetable_id {
                return Err(L3Error::SubnetAlreadyAssociated {
                    subnet_id,
                    routetable_id: current,
                });
            }
            subnet.routetable_id = Some(routetable_id);
            Ok(subnet.clone())
        })
    }

    async fn unset_association(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Option<Uuid>> {
        self.mutate(|t| Ok(t.subnet_mut(tenant_id, subnet_id)?.routetable_id.take()))
    }

    async fn get_association(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Option<Uuid>> {
        self.read(|t| Ok(t.subnet(tenant_id, subnet_id)?.routetable_id))
    }

    async fn all_subnets(&self) -> L3Result<Vec<Subnet>> {
        self.read(|t| Ok(t.subnets.clone()))
    }

    async fn all_routetables(&self) -> L3Result<Vec<RouteTable>> {
        self.read(|t| Ok(t.routetables.clone()))
    }
}
