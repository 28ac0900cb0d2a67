//! Route validation against the tenant's model.
//!
//! Validation is read-only. The reconciler runs all three checks before
//! touching the store or a device, so a rejected route is never partially
//! applied.

use ipnet::Ipv4Net;
use l3gw_common::cidr::{is_default_route, parse_cidr};
use l3gw_common::types::{DESTINATION_DEFAULT, WILDCARD};
use l3gw_common::{Endpoint, L3Error, L3Result, RouteTarget};
use l3gw_store::ModelStore;
use tracing::debug;
use uuid::Uuid;

/// Checks route endpoints and targets for one tenant.
pub struct RouteValidator<'a> {
    store: &'a dyn ModelStore,
    accepts_next_hop: bool,
}

impl<'a> RouteValidator<'a> {
    /// `accepts_next_hop` admits literal next-hop addresses as targets,
    /// which only the dynamic-routing backend can realize.
    pub fn new(store: &'a dyn ModelStore, accepts_next_hop: bool) -> Self {
        Self {
            store,
            accepts_next_hop,
        }
    }

    /// A source is the wildcard, a subnet associated with the route table,
    /// or the exact CIDR of one of the tenant's subnets.
    pub async fn validate_source(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        source: &str,
    ) -> L3Result<Endpoint> {
        let source = source.trim();
        if source == WILDCARD {
            return Ok(Endpoint::Any);
        }

        if let Ok(subnet_id) = Uuid::parse_str(source) {
            return match self.store.get_subnet(tenant_id, subnet_id).await {
                Ok(subnet) if subnet.routetable_id == Some(routetable_id) => {
                    Ok(Endpoint::Subnet(subnet_id))
                }
                Ok(_) | Err(L3Error::SubnetNotFound { .. }) => {
                    debug!(%subnet_id, %routetable_id, "Source subnet is not associated");
                    Err(L3Error::source_invalid(source))
                }
                Err(e) => Err(e),
            };
        }

        // Host bits count: 10.0.0.5/24 is not the subnet 10.0.0.0/24.
        let net = parse_cidr(source).ok_or_else(|| L3Error::invalid_cidr(source))?;
        let owned = self
            .store
            .list_subnets(tenant_id)
            .await?
            .iter()
            .any(|subnet| subnet.cidr == net);
        if owned {
            Ok(Endpoint::Cidr(net))
        } else {
            Err(L3Error::source_invalid(source))
        }
    }

    /// A destination is `default`, the all-zero network, a subnet of the
    /// tenant, or any syntactically valid CIDR.
    ///
    /// Literal CIDRs are not checked against the tenant's subnets.
    pub async fn validate_destination(
        &self,
        tenant_id: &str,
        _routetable_id: Uuid,
        destination: &str,
    ) -> L3Result<Endpoint> {
        let destination = destination.trim();
        if destination.eq_ignore_ascii_case(DESTINATION_DEFAULT) {
            return Ok(Endpoint::Default);
        }

        if let Ok(subnet_id) = Uuid::parse_str(destination) {
            return match self.store.get_subnet(tenant_id, subnet_id).await {
                Ok(_) => Ok(Endpoint::Subnet(subnet_id)),
                Err(L3Error::SubnetNotFound { .. }) => {
                    Err(L3Error::destination_invalid(destination))
                }
                Err(e) => Err(e),
            };
        }

        match parse_cidr(destination) {
            Some(net) if is_default_route(&net) => Ok(Endpoint::Default),
            Some(net) => Ok(Endpoint::Cidr(net.trunc())),
            None => Err(L3Error::invalid_cidr(destination)),
        }
    }

    /// A target is a tag known to the tenant or the system, or, when the
    /// backend supports it, a next-hop address.
    pub async fn validate_target(&self, tenant_id: &str, target: &str) -> L3Result<RouteTarget> {
        let target = target.trim();
        if target.is_empty() {
            return Err(L3Error::target_not_found(target));
        }
        match RouteTarget::parse(target) {
            RouteTarget::NextHop(addr) if self.accepts_next_hop && !addr.is_unspecified() => {
                Ok(RouteTarget::NextHop(addr))
            }
            RouteTarget::NextHop(_) => Err(L3Error::target_not_found(target)),
            RouteTarget::Tag(tag) => match self.store.get_target(tenant_id, &tag).await {
                Ok(found) => Ok(RouteTarget::Tag(found.tag)),
                Err(L3Error::TargetNotFound { .. }) => Err(L3Error::target_not_found(target)),
                Err(e) => Err(e),
            },
        }
    }

    /// Runs all three checks in order and returns the stored forms.
    pub async fn validate_route(
        &self,
        tenant_id: &str,
        routetable_id: Uuid,
        source: &str,
        destination: &str,
        target: &str,
    ) -> L3Result<(Endpoint, Endpoint, RouteTarget)> {
        let source = self.validate_source(tenant_id, routetable_id, source).await?;
        let destination = self
            .validate_destination(tenant_id, routetable_id, destination)
            .await?;
        let target = self.validate_target(tenant_id, target).await?;
        Ok((source, destination, target))
    }
}

/// Parses a subnet CIDR for create/update, truncating host bits.
pub fn subnet_cidr(value: &str) -> L3Result<Ipv4Net> {
    l3gw_common::cidr::parse_subnet_cidr(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use l3gw_common::types::SYSTEM_TARGETS;
    use l3gw_store::{MemoryStore, NewSubnet};
    use pretty_assertions::assert_eq;

    const TENANT: &str = "tenant-a";
    const OTHER: &str = "tenant-b";

    struct Model {
        store: MemoryStore,
        rt: Uuid,
        associated: Uuid,
        loose: Uuid,
        foreign: Uuid,
    }

    async fn model() -> Model {
        let store = MemoryStore::new();
        for tag in SYSTEM_TARGETS {
            store.create_target(None, tag, None).await.unwrap();
        }
        let rt = store.create_routetable(TENANT, None, None).await.unwrap().id;
        let mut ids = Vec::new();
        for (tenant, cidr) in [
            (TENANT, "10.0.0.0/24"),
            (TENANT, "10.0.1.0/24"),
            (OTHER, "10.0.2.0/24"),
        ] {
            let subnet = store
                .create_subnet(NewSubnet {
                    tenant_id: tenant.to_string(),
                    cidr: cidr.parse().unwrap(),
                    network_id: Uuid::new_v4(),
                })
                .await
                .unwrap();
            ids.push(subnet.id);
        }
        store.set_association(TENANT, ids[0], rt).await.unwrap();
        Model {
            store,
            rt,
            associated: ids[0],
            loose: ids[1],
            foreign: ids[2],
        }
    }

    #[tokio::test]
    async fn test_source_rules() {
        let m = model().await;
        let v = RouteValidator::new(&m.store, false);

        assert_eq!(v.validate_source(TENANT, m.rt, "*").await.unwrap(), Endpoint::Any);
        assert_eq!(
            v.validate_source(TENANT, m.rt, &m.associated.to_string())
                .await
                .unwrap(),
            Endpoint::Subnet(m.associated)
        );

        // owned but not associated with this table
        let err = v
            .validate_source(TENANT, m.rt, &m.loose.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));

        let err = v
            .validate_source(TENANT, m.rt, &m.foreign.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));

        // a literal cidr only has to match some subnet of the tenant
        assert_eq!(
            v.validate_source(TENANT, m.rt, "10.0.1.0/24").await.unwrap(),
            Endpoint::Cidr("10.0.1.0/24".parse().unwrap())
        );
        let err = v.validate_source(TENANT, m.rt, "10.0.1.7/24").await.unwrap_err();
        assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));
        let err = v.validate_source(TENANT, m.rt, "10.0.2.0/24").await.unwrap_err();
        assert!(matches!(err, L3Error::RouteSourceInvalid { .. }));

        let err = v.validate_source(TENANT, m.rt, "???").await.unwrap_err();
        assert!(matches!(err, L3Error::InvalidCidr { .. }));
    }

    #[tokio::test]
    async fn test_destination_rules() {
        let m = model().await;
        let v = RouteValidator::new(&m.store, false);

        for value in ["default", "DEFAULT", "0.0.0.0", "0.0.0.0/0"] {
            assert_eq!(
                v.validate_destination(TENANT, m.rt, value).await.unwrap(),
                Endpoint::Default,
                "{}",
                value
            );
        }

        // any subnet of the tenant, associated or not
        assert_eq!(
            v.validate_destination(TENANT, m.rt, &m.loose.to_string())
                .await
                .unwrap(),
            Endpoint::Subnet(m.loose)
        );
        let err = v
            .validate_destination(TENANT, m.rt, &m.foreign.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::RouteDestinationInvalid { .. }));

        // literal cidrs are not checked for membership
        assert_eq!(
            v.validate_destination(TENANT, m.rt, "172.16.0.0/12")
                .await
                .unwrap(),
            Endpoint::Cidr("172.16.0.0/12".parse().unwrap())
        );

        let err = v
            .validate_destination(TENANT, m.rt, "10.0.0.0/33")
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::InvalidCidr { .. }));
    }

    #[tokio::test]
    async fn test_target_rules() {
        let m = model().await;
        let pf = RouteValidator::new(&m.store, false);
        let dr = RouteValidator::new(&m.store, true);

        assert_eq!(
            pf.validate_target(TENANT, "Public").await.unwrap(),
            RouteTarget::Tag("public".to_string())
        );
        let err = pf.validate_target(TENANT, "internet").await.unwrap_err();
        assert!(matches!(err, L3Error::TargetNotFound { .. }));

        let err = pf.validate_target(TENANT, "192.0.2.1").await.unwrap_err();
        assert!(matches!(err, L3Error::TargetNotFound { .. }));
        assert_eq!(
            dr.validate_target(TENANT, "192.0.2.1").await.unwrap(),
            RouteTarget::NextHop("192.0.2.1".parse().unwrap())
        );
        assert!(dr.validate_target(TENANT, "0.0.0.0").await.is_err());
    }

    #[tokio::test]
    async fn test_tenant_targets_are_private() {
        let m = model().await;
        m.store
            .create_target(Some(OTHER), "transit", None)
            .await
            .unwrap();
        let v = RouteValidator::new(&m.store, false);

        assert!(v.validate_target(OTHER, "transit").await.is_ok());
        assert!(v.validate_target(TENANT, "transit").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_route_stops_at_first_failure() {
        let m = model().await;
        let v = RouteValidator::new(&m.store, false);
        let err = v
            .validate_route(TENANT, m.rt, "???", "nowhere", "nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, L3Error::InvalidCidr { .. }));

        let (source, destination, target) = v
            .validate_route(TENANT, m.rt, "10.0.0.0/24", "default", "PUBLIC")
            .await
            .unwrap();
        assert_eq!(source, Endpoint::Cidr("10.0.0.0/24".parse().unwrap()));
        assert_eq!(destination, Endpoint::Default);
        assert_eq!(target, RouteTarget::Tag("public".to_string()));
    }

    #[test]
    fn test_subnet_cidr() {
        assert_eq!(
            subnet_cidr(" 10.0.0.5/24 ").unwrap(),
            "10.0.0.0/24".parse::<Ipv4Net>().unwrap()
        );
        assert!(subnet_cidr("10.0.0.0/31").is_err());
        assert!(subnet_cidr("10.0.0.1").is_err());
    }
}
