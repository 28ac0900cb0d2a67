//! Reconciler: validate, then store, then device.
//!
//! The model store is authoritative. A device failure after a successful
//! store write is returned to the caller but never rolled back; the
//! projection is marked dirty and the next [`Reconciler::restore`] brings
//! the device back in line. Deletes clear the device before the record so
//! no device rule outlives the record that describes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipnet::Ipv4Net;
use l3gw_common::types::{SYSTEM_TARGETS, SYSTEM_TARGET_DESCRIPTION};
use l3gw_common::{
    DeviceAdapter, Endpoint, L3Error, L3Result, ResolvedRoute, Route, RouteDestination, RouteTable,
    Subnet, Target,
};
use l3gw_store::{ModelStore, NewRoute, NewSubnet, RouteTableUpdate, RouteUpdate, SubnetUpdate};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::locks::{RouteTableGuard, TenantLocks};
use crate::validator::{subnet_cidr, RouteValidator};

/// Behavior switches taken from the daemon configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Delete a table's routes with it instead of refusing.
    pub cascade_routetable_delete: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            cascade_routetable_delete: true,
        }
    }
}

/// Outcome of replaying the store into the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub subnets: usize,
    pub routes: usize,
    /// Replay calls that failed; the walk continues past them.
    pub failures: usize,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

pub struct Reconciler {
    store: Arc<dyn ModelStore>,
    adapter: Mutex<Box<dyn DeviceAdapter>>,
    adapter_name: String,
    accepts_next_hop: bool,
    options: ReconcilerOptions,
    locks: TenantLocks,
    /// Held shared by every request and exclusively by restore, so a
    /// replay never races a request's store write and device call.
    replay: RwLock<()>,
    dirty: AtomicBool,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ModelStore>,
        adapter: Box<dyn DeviceAdapter>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            adapter_name: adapter.name().to_string(),
            accepts_next_hop: adapter.accepts_next_hop(),
            store,
            adapter: Mutex::new(adapter),
            options,
            locks: TenantLocks::new(),
            replay: RwLock::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// True when a device call failed after its store write and no restore
    /// has run since.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn validator(&self) -> RouteValidator<'_> {
        RouteValidator::new(self.store.as_ref(), self.accepts_next_hop)
    }

    fn device_outcome(&self, operation: &str, result: L3Result<()>) -> L3Result<()> {
        if let Err(e) = &result {
            self.dirty.store(true, Ordering::SeqCst);
            error!(
                operation,
                adapter = %self.adapter_name,
                "Device update failed, projection marked dirty: {}",
                e
            );
        }
        result
    }

    async fn endpoint_net(&self, tenant_id: &str, endpoint: &Endpoint) -> L3Result<Option<Ipv4Net>> {
        Ok(match endpoint {
            Endpoint::Any | Endpoint::Default => None,
            Endpoint::Cidr(net) => Some(*net),
            Endpoint::Subnet(id) => Some(self.store.get_subnet(tenant_id, *id).await?.cidr),
        })
    }

    /// Replaces subnet references with their CIDRs.
    async fn resolve(&self, tenant_id: &str, route: &Route) -> L3Result<ResolvedRoute> {
        let source = self.endpoint_net(tenant_id, &route.source).await?;
        let destination = match self.endpoint_net(tenant_id, &route.destination).await? {
            Some(net) => RouteDestination::Net(net),
            None => RouteDestination::Default,
        };
        Ok(ResolvedRoute {
            route_id: route.id,
            source,
            destination,
            target: route.target.clone(),
        })
    }

    // Lifecycle

    /// Seeds the system targets. Re-seeding is a no-op.
    pub async fn seed_targets(&self) -> L3Result<()> {
        for tag in SYSTEM_TARGETS {
            match self
                .store
                .create_target(None, tag, Some(SYSTEM_TARGET_DESCRIPTION.to_string()))
                .await
            {
                Ok(target) => debug!(tag = %target.tag, "Seeded system target"),
                Err(L3Error::DuplicateTarget { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Seeds targets, initializes the device and replays the store.
    ///
    /// Must run once before serving requests. Initialization errors are
    /// fatal; replay failures are reported and leave the projection dirty.
    pub async fn start(&self) -> L3Result<RestoreReport> {
        self.seed_targets().await?;
        {
            let _replay = self.replay.write().await;
            let mut adapter = self.adapter.lock().await;
            info!(adapter = %self.adapter_name, "Initializing device adapter");
            adapter.initialize().await?;
        }
        self.restore().await
    }

    /// Rebuilds the device projection from the store.
    ///
    /// The adapter re-reads its device state first, so replaying objects the
    /// device already holds issues no commands. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> L3Result<RestoreReport> {
        let _replay = self.replay.write().await;
        let mut adapter = self.adapter.lock().await;
        adapter.restore().await?;

        let mut report = RestoreReport::default();
        for subnet in self.store.all_subnets().await? {
            match adapter.subnet_created(&subnet).await {
                Ok(()) => report.subnets += 1,
                Err(e) => {
                    warn!(subnet_id = %subnet.id, cidr = %subnet.cidr, "Subnet replay failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        for routetable in self.store.all_routetables().await? {
            for route in self.store.list_routes(routetable.id).await? {
                let replayed = match self.resolve(&routetable.tenant_id, &route).await {
                    Ok(resolved) => adapter.route_created(&resolved).await,
                    Err(e) => Err(e),
                };
                match replayed {
                    Ok(()) => report.routes += 1,
                    Err(e) => {
                        warn!(
                            route_id = %route.id,
                            routetable_id = %routetable.id,
                            "Route replay failed: {}",
                            e
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        self.dirty.store(!report.is_clean(), Ordering::SeqCst);
        info!(
            subnets = report.subnets,
            routes = report.routes,
            failures = report.failures,
            "Restore complete"
        );
        Ok(report)
    }

    /// Runs [`Reconciler::restore`] if the projection is dirty.
    pub async fn resync_if_dirty(&self) -> L3Result<Option<RestoreReport>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        info!("Projection dirty, resyncing device");
        self.restore().await.map(Some)
    }

    // Subnets

    /// Creates a subnet and isolates it on the device.
    #[instrument(skip(self))]
    pub async fn create_subnet(
        &self,
        tenant_id: &str,
        cidr: &str,
        network_id: Option<Uuid>,
    ) -> L3Result<Subnet> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let cidr = subnet_cidr(cidr)?;
        let subnet = self
            .store
            .create_subnet(NewSubnet {
                tenant_id: tenant_id.to_string(),
                cidr,
                network_id: network_id.unwrap_or_else(Uuid::new_v4),
            })
            .await?;
        info!(subnet_id = %subnet.id, cidr = %subnet.cidr, "Created subnet");

        let result = self.adapter.lock().await.subnet_created(&subnet).await;
        self.device_outcome("create_subnet", result)?;
        Ok(subnet)
    }

    pub async fn get_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Subnet> {
        self.store.get_subnet(tenant_id, subnet_id).await
    }

    pub async fn list_subnets(&self, tenant_id: &str) -> L3Result<Vec<Subnet>> {
        self.store.list_subnets(tenant_id).await
    }

    /// Updates a subnet. A CIDR change is refused while routes reference the
    /// subnet; otherwise the device drops the old isolation rule and
    /// installs the new one.
    #[instrument(skip(self))]
    pub async fn update_subnet(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        cidr: Option<&str>,
        network_id: Option<Uuid>,
    ) -> L3Result<Subnet> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let current = self.store.get_subnet(tenant_id, subnet_id).await?;
        let cidr = cidr.map(subnet_cidr).transpose()?;
        let cidr_changed = cidr.is_some_and(|c| c != current.cidr);
        if cidr_changed {
            self.ensure_unreferenced(subnet_id, None).await?;
        }

        let updated = self
            .store
            .update_subnet(tenant_id, subnet_id, SubnetUpdate { cidr, network_id })
            .await?;
        if !cidr_changed {
            return Ok(updated);
        }
        info!(old = %current.cidr, new = %updated.cidr, "Subnet CIDR changed");

        let mut adapter = self.adapter.lock().await;
        let mut result = adapter.subnet_deleted(&current).await;
        if result.is_ok() {
            result = adapter.subnet_created(&updated).await;
        }
        self.device_outcome("update_subnet", result)?;
        Ok(updated)
    }

    /// Deletes a subnet no route references.
    #[instrument(skip(self))]
    pub async fn delete_subnet(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<()> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let subnet = self.store.get_subnet(tenant_id, subnet_id).await?;
        self.ensure_unreferenced(subnet_id, None).await?;

        let result = self.adapter.lock().await.subnet_deleted(&subnet).await;
        self.device_outcome("delete_subnet", result)?;
        self.store.delete_subnet(tenant_id, subnet_id).await?;
        info!(cidr = %subnet.cidr, "Deleted subnet");
        Ok(())
    }

    /// Fails with `SubnetRouteError` if a route names the subnet, optionally
    /// counting only routes of one table.
    async fn ensure_unreferenced(&self, subnet_id: Uuid, within: Option<Uuid>) -> L3Result<()> {
        let route_count = self
            .store
            .subnet_routes(subnet_id)
            .await?
            .iter()
            .filter(|r| within.map_or(true, |rt| r.routetable_id == rt))
            .count();
        if route_count > 0 {
            return Err(L3Error::SubnetRouteError {
                subnet_id,
                route_count,
            });
        }
        Ok(())
    }

    // Route tables

    #[instrument(skip(self))]
    pub async fn create_routetable(
        &self,
        tenant_id: &str,
        label: Option<String>,
        description: Option<String>,
    ) -> L3Result<RouteTable> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let routetable = self
            .store
            .create_routetable(tenant_id, label, description)
            .await?;
        info!(routetable_id = %routetable.id, label = %routetable.label, "Created route table");
        Ok(routetable)
    }

    pub async fn get_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<RouteTable> {
        self.store.get_routetable(tenant_id, routetable_id).await
    }

    pub async fn list_routetables(&self, tenant_id: &str) -> L3Result<Vec<RouteTable>> {
        self.store.list_routetables(tenant_id).await
    }

    /// Updates label and description; empty values are ignored.
    #[instrument(skip(self))]
    pub async fn update_routetable(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        label: Option<String>,
        description: Option<String>,
    ) -> L3Result<RouteTable> {
        let _replay = self.replay.read().await;
        let _table = self.lock_routetable(tenant_id, routetable_id).await?;
        self.store
            .update_routetable(
                tenant_id,
                routetable_id,
                RouteTableUpdate { label, description },
            )
            .await
    }

    /// Locks a route table that exists. The mutex of an unknown id is
    /// dropped again so bogus ids leave nothing behind.
    async fn lock_routetable(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
    ) -> L3Result<RouteTableGuard> {
        let guard = self.locks.lock_routetable(tenant_id, routetable_id).await;
        match self.store.get_routetable(tenant_id, routetable_id).await {
            Ok(_) => Ok(guard),
            Err(e) => {
                drop(guard);
                if matches!(e, L3Error::RoutetableNotFound { .. }) {
                    self.locks.forget_routetable(tenant_id, routetable_id);
                }
                Err(e)
            }
        }
    }

    /// Deletes a route table with its routes and associations.
    ///
    /// Device rules of every route are removed before any record.
    #[instrument(skip(self))]
    pub async fn delete_routetable(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<()> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        self.store.get_routetable(tenant_id, routetable_id).await?;
        let routes = self.store.list_routes(routetable_id).await?;
        if !routes.is_empty() && !self.options.cascade_routetable_delete {
            return Err(L3Error::RoutetableRouteError {
                routetable_id,
                route_count: routes.len(),
            });
        }

        let mut resolved = Vec::with_capacity(routes.len());
        for route in &routes {
            resolved.push(self.resolve(tenant_id, route).await?);
        }
        {
            let mut adapter = self.adapter.lock().await;
            for route in &resolved {
                let result = adapter.route_deleted(route).await;
                self.device_outcome("delete_routetable", result)?;
            }
        }

        self.store.delete_routetable(tenant_id, routetable_id).await?;
        self.locks.forget_routetable(tenant_id, routetable_id);
        info!(routes = routes.len(), "Deleted route table");
        Ok(())
    }

    // Routes

    /// Validates, stores and projects a route.
    #[instrument(skip(self))]
    pub async fn create_route(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        source: &str,
        destination: &str,
        target: &str,
    ) -> L3Result<Route> {
        let _replay = self.replay.read().await;
        let _table = self.lock_routetable(tenant_id, routetable_id).await?;
        let (source, destination, target) = self
            .validator()
            .validate_route(tenant_id, routetable_id, source, destination, target)
            .await?;

        let route = self
            .store
            .create_route(NewRoute {
                routetable_id,
                source,
                destination,
                target,
            })
            .await?;
        info!(
            route_id = %route.id,
            source = %route.source,
            destination = %route.destination,
            route_target = %route.target,
            "Created route"
        );

        let resolved = self.resolve(tenant_id, &route).await?;
        let result = self.adapter.lock().await.route_created(&resolved).await;
        self.device_outcome("create_route", result)?;
        Ok(route)
    }

    pub async fn get_route(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        route_id: Uuid,
    ) -> L3Result<Route> {
        self.store.get_routetable(tenant_id, routetable_id).await?;
        self.store.get_route(routetable_id, route_id).await
    }

    pub async fn list_routes(&self, tenant_id: &str, routetable_id: Uuid) -> L3Result<Vec<Route>> {
        self.store.get_routetable(tenant_id, routetable_id).await?;
        self.store.list_routes(routetable_id).await
    }

    /// Changes some fields of a route.
    ///
    /// The store is updated first, then the device removes the old
    /// projection and installs the new one. The device step is not atomic:
    /// a failed install leaves the route missing on the device until the
    /// next restore.
    #[instrument(skip(self))]
    pub async fn update_route(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        route_id: Uuid,
        source: Option<&str>,
        destination: Option<&str>,
        target: Option<&str>,
    ) -> L3Result<Route> {
        let _replay = self.replay.read().await;
        let _table = self.lock_routetable(tenant_id, routetable_id).await?;
        let old = self.store.get_route(routetable_id, route_id).await?;

        let validator = self.validator();
        let mut update = RouteUpdate::default();
        if let Some(source) = source {
            update.source = Some(
                validator
                    .validate_source(tenant_id, routetable_id, source)
                    .await?,
            );
        }
        if let Some(destination) = destination {
            update.destination = Some(
                validator
                    .validate_destination(tenant_id, routetable_id, destination)
                    .await?,
            );
        }
        if let Some(target) = target {
            update.target = Some(validator.validate_target(tenant_id, target).await?);
        }

        let old_resolved = self.resolve(tenant_id, &old).await?;
        let route = self
            .store
            .update_route(routetable_id, route_id, update)
            .await?;
        let new_resolved = self.resolve(tenant_id, &route).await?;
        if new_resolved == old_resolved {
            debug!("Route projection unchanged");
            return Ok(route);
        }

        let result = self
            .adapter
            .lock()
            .await
            .route_updated(&old_resolved, &new_resolved)
            .await;
        self.device_outcome("update_route", result)?;
        Ok(route)
    }

    /// Removes a route from the device, then from the store.
    #[instrument(skip(self))]
    pub async fn delete_route(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        route_id: Uuid,
    ) -> L3Result<()> {
        let _replay = self.replay.read().await;
        let _table = self.lock_routetable(tenant_id, routetable_id).await?;
        let route = self.store.get_route(routetable_id, route_id).await?;
        let resolved = self.resolve(tenant_id, &route).await?;

        let result = self.adapter.lock().await.route_deleted(&resolved).await;
        self.device_outcome("delete_route", result)?;
        self.store.delete_route(routetable_id, route_id).await?;
        info!("Deleted route");
        Ok(())
    }

    // Associations

    /// Binds a subnet to a route table. A bound subnet must be
    /// disassociated first.
    #[instrument(skip(self))]
    pub async fn associate_subnet(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
        routetable_id: Uuid,
    ) -> L3Result<Subnet> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let subnet = self
            .store
            .set_association(tenant_id, subnet_id, routetable_id)
            .await?;
        info!(cidr = %subnet.cidr, "Associated subnet");
        Ok(subnet)
    }

    /// Unbinds a subnet. Refused while routes of its table name it.
    #[instrument(skip(self))]
    pub async fn disassociate_subnet(
        &self,
        tenant_id: &str,
        subnet_id: Uuid,
    ) -> L3Result<Option<Uuid>> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        let Some(routetable_id) = self.store.get_association(tenant_id, subnet_id).await? else {
            debug!("Subnet is not associated");
            return Ok(None);
        };
        self.ensure_unreferenced(subnet_id, Some(routetable_id))
            .await?;
        let previous = self.store.unset_association(tenant_id, subnet_id).await?;
        info!(?previous, "Disassociated subnet");
        Ok(previous)
    }

    pub async fn get_association(&self, tenant_id: &str, subnet_id: Uuid) -> L3Result<Option<Uuid>> {
        self.store.get_association(tenant_id, subnet_id).await
    }

    // Targets

    #[instrument(skip(self))]
    pub async fn create_target(
        &self,
        tenant_id: &str,
        tag: &str,
        description: Option<String>,
    ) -> L3Result<Target> {
        let tag = tag.trim();
        if tag.is_empty() || tag.parse::<std::net::Ipv4Addr>().is_ok() {
            return Err(L3Error::target_not_found(tag));
        }
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        self.store
            .create_target(Some(tenant_id), tag, description)
            .await
    }

    /// Targets usable in the tenant's routes: system targets, then the
    /// tenant's own. With a route table, the table must exist.
    pub async fn list_targets(
        &self,
        tenant_id: &str,
        routetable_id: Option<Uuid>,
    ) -> L3Result<Vec<Target>> {
        if let Some(routetable_id) = routetable_id {
            self.store.get_routetable(tenant_id, routetable_id).await?;
        }
        self.store.list_targets(tenant_id).await
    }

    /// Deletes one of the tenant's own targets. Routes that already use
    /// the tag keep it.
    #[instrument(skip(self))]
    pub async fn delete_target(&self, tenant_id: &str, target_id: Uuid) -> L3Result<Target> {
        let _replay = self.replay.read().await;
        let _tenant = self.locks.lock_tenant(tenant_id).await;
        self.store.delete_target(tenant_id, target_id).await
    }
}
