//! Dynamic-routing projection of the L3 model.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use l3gw_common::{
    DeviceAdapter, L3Result, RefCountError, RefCounts, ResolvedRoute, RouteTarget, Subnet,
};
use tracing::{debug, info, instrument, warn};

use crate::client::ZebraClient;
use crate::routes::RouteVia;

/// A static route as the daemon stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticRoute {
    pub prefix: Ipv4Net,
    pub next_hop: Ipv4Addr,
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.prefix, self.next_hop)
    }
}

/// Device adapter that mirrors routes into zebra's static route table.
///
/// Each route becomes `ip route <destination> <mask> <next hop>`. Literal
/// next-hop targets are used as is; tags are looked up in the configured
/// next-hop map, and routes whose tag has no entry are not mirrored.
pub struct DynamicRoutingAdapter {
    client: ZebraClient,
    next_hops: HashMap<String, Ipv4Addr>,
    routes: RefCounts<StaticRoute>,
    /// Static routes the daemon is known to hold.
    present: HashSet<StaticRoute>,
}

impl DynamicRoutingAdapter {
    pub fn new(client: ZebraClient, next_hops: HashMap<String, Ipv4Addr>) -> Self {
        Self {
            client,
            next_hops,
            routes: RefCounts::new(),
            present: HashSet::new(),
        }
    }

    /// The static route `route` maps to, if it has one.
    pub fn static_route(&self, route: &ResolvedRoute) -> Option<StaticRoute> {
        let next_hop = match &route.target {
            RouteTarget::NextHop(addr) => *addr,
            RouteTarget::Tag(tag) => *self.next_hops.get(tag)?,
        };
        Some(StaticRoute {
            prefix: route.destination.as_net(),
            next_hop,
        })
    }

    pub fn is_present(&self, route: &StaticRoute) -> bool {
        self.present.contains(route)
    }

    pub fn references(&self, route: &StaticRoute) -> u32 {
        self.routes.count(route)
    }

    async fn withdraw(&mut self, route: StaticRoute) -> L3Result<()> {
        if !self
            .client
            .del_static_route(&route.prefix, route.next_hop)
            .await?
        {
            warn!("Static route {} was already absent from zebra", route);
        }
        self.present.remove(&route);
        Ok(())
    }
}

#[async_trait]
impl DeviceAdapter for DynamicRoutingAdapter {
    fn name(&self) -> &str {
        "dynamic-routing"
    }

    fn accepts_next_hop(&self) -> bool {
        true
    }

    async fn initialize(&mut self) -> L3Result<()> {
        self.routes.clear();
        self.present.clear();
        self.client.connect().await
    }

    #[instrument(skip(self))]
    async fn restore(&mut self) -> L3Result<()> {
        self.routes.clear();
        self.present = self
            .client
            .show_ip_route()
            .await?
            .into_iter()
            .filter(|r| r.is_static())
            .filter_map(|r| match r.via {
                RouteVia::NextHop(next_hop) => Some(StaticRoute {
                    prefix: r.prefix,
                    next_hop,
                }),
                RouteVia::Direct => None,
            })
            .collect();
        info!("Adopted {} static routes from zebra", self.present.len());
        Ok(())
    }

    async fn subnet_created(&mut self, subnet: &Subnet) -> L3Result<()> {
        debug!(cidr = %subnet.cidr, "Subnets have no static route");
        Ok(())
    }

    async fn subnet_deleted(&mut self, _subnet: &Subnet) -> L3Result<()> {
        Ok(())
    }

    #[instrument(skip(self, route), fields(route_id = %route.route_id))]
    async fn route_created(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        let Some(static_route) = self.static_route(route) else {
            warn!(route_target = %route.target, "No next hop configured for target, route not mirrored");
            return Ok(());
        };
        if self.routes.acquire(static_route) > 1 {
            debug!("Static route {} shared with another route", static_route);
            return Ok(());
        }
        if self.present.contains(&static_route) {
            debug!("Static route {} already in zebra", static_route);
            return Ok(());
        }
        if let Err(e) = self
            .client
            .add_static_route(&static_route.prefix, static_route.next_hop)
            .await
        {
            let _ = self.routes.release(&static_route);
            return Err(e);
        }
        self.present.insert(static_route);
        Ok(())
    }

    #[instrument(skip(self, route), fields(route_id = %route.route_id))]
    async fn route_deleted(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        let Some(static_route) = self.static_route(route) else {
            return Ok(());
        };
        match self.routes.release(&static_route) {
            Ok(0) => self.withdraw(static_route).await,
            Ok(remaining) => {
                debug!(remaining, "Static route {} still referenced", static_route);
                Ok(())
            }
            Err(RefCountError::KeyNotFound) if self.present.contains(&static_route) => {
                self.withdraw(static_route).await
            }
            Err(RefCountError::KeyNotFound) => {
                warn!("Static route {} is not tracked, nothing to remove", static_route);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Credentials;
    use crate::session::{FnConnector, VtyStream, SERVICE};
    use l3gw_common::L3Error;
    use l3gw_test::{fixtures, FakeZebra};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn adapter(zebra: &FakeZebra) -> DynamicRoutingAdapter {
        let daemon = zebra.clone();
        let connector = FnConnector::new(move || {
            daemon
                .connect()
                .map(|s| Box::new(s) as Box<dyn VtyStream>)
                .map_err(|e| L3Error::service_contact(SERVICE, e.to_string()))
        });
        let client = ZebraClient::new(
            Box::new(connector),
            Credentials {
                password: "zebra".to_string(),
                enable_password: None,
            },
            Duration::from_millis(500),
        );
        let next_hops = HashMap::from([("vpn".to_string(), "198.51.100.1".parse().unwrap())]);
        DynamicRoutingAdapter::new(client, next_hops)
    }

    #[tokio::test]
    async fn test_next_hop_route_lifecycle() {
        let zebra = FakeZebra::new("zebra", None);
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();

        let route = fixtures::resolved_route(Some("10.0.0.0/24"), "10.0.1.0/24", fixtures::NEXT_HOP);
        dr.route_created(&route).await.unwrap();
        assert_eq!(
            zebra.static_routes(),
            vec![("10.0.1.0/24".to_string(), "192.0.2.1".to_string())]
        );

        dr.route_deleted(&route).await.unwrap();
        assert!(zebra.static_routes().is_empty());
    }

    #[tokio::test]
    async fn test_default_destination_and_tag_lookup() {
        let zebra = FakeZebra::new("zebra", None);
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();

        dr.route_created(&fixtures::resolved_route(Some("10.0.0.0/24"), "default", "VPN"))
            .await
            .unwrap();
        dr.route_created(&fixtures::resolved_route(Some("10.0.0.0/24"), "default", "public"))
            .await
            .unwrap();

        assert_eq!(
            zebra.static_routes(),
            vec![("0.0.0.0/0".to_string(), "198.51.100.1".to_string())]
        );
        assert_eq!(
            zebra.config_commands(),
            vec!["ip route 0.0.0.0 0.0.0.0 198.51.100.1"]
        );
    }

    #[tokio::test]
    async fn test_shared_static_route() {
        let zebra = FakeZebra::new("zebra", None);
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();
        let a = fixtures::resolved_route(Some("10.0.0.0/24"), "10.9.0.0/16", fixtures::NEXT_HOP);
        let b = fixtures::resolved_route(Some("10.0.1.0/24"), "10.9.0.0/16", fixtures::NEXT_HOP);

        dr.route_created(&a).await.unwrap();
        dr.route_created(&b).await.unwrap();
        dr.route_deleted(&a).await.unwrap();
        assert_eq!(zebra.static_routes().len(), 1);

        dr.route_deleted(&b).await.unwrap();
        assert!(zebra.static_routes().is_empty());
        assert_eq!(zebra.config_commands().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_adopts_existing_routes() {
        let zebra = FakeZebra::new("zebra", None);
        zebra.preload_static("10.0.1.0/24", "192.0.2.1");
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();
        dr.restore().await.unwrap();

        let route = fixtures::resolved_route(Some("10.0.0.0/24"), "10.0.1.0/24", fixtures::NEXT_HOP);
        let static_route = dr.static_route(&route).unwrap();
        assert!(dr.is_present(&static_route));

        dr.route_created(&route).await.unwrap();
        dr.restore().await.unwrap();
        dr.route_created(&route).await.unwrap();
        assert!(zebra.config_commands().is_empty());
        assert_eq!(dr.references(&static_route), 1);
    }

    #[tokio::test]
    async fn test_delete_of_missing_route_is_swallowed() {
        let zebra = FakeZebra::new("zebra", None);
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();
        let route = fixtures::resolved_route(Some("10.0.0.0/24"), "10.0.1.0/24", fixtures::NEXT_HOP);
        dr.route_created(&route).await.unwrap();

        zebra.state().static_routes.clear();
        dr.route_deleted(&route).await.unwrap();
        assert_eq!(
            zebra.config_commands().last().map(String::as_str),
            Some("no ip route 10.0.1.0 255.255.255.0 192.0.2.1")
        );
    }

    #[tokio::test]
    async fn test_initialize_fails_when_daemon_unreachable() {
        let zebra = FakeZebra::new("zebra", None);
        zebra.set_refuse_connections(true);
        let mut dr = adapter(&zebra);
        let err = dr.initialize().await.unwrap_err();
        assert!(err.is_device_error());
    }

    #[tokio::test]
    async fn test_rejected_add_is_not_tracked() {
        let zebra = FakeZebra::new("zebra", None);
        zebra.reject_matching("ip route");
        let mut dr = adapter(&zebra);
        dr.initialize().await.unwrap();
        let route = fixtures::resolved_route(Some("10.0.0.0/24"), "10.0.1.0/24", fixtures::NEXT_HOP);

        let err = dr.route_created(&route).await.unwrap_err();
        assert!(matches!(err, L3Error::InvalidCommand { .. }));
        let static_route = dr.static_route(&route).unwrap();
        assert_eq!(dr.references(&static_route), 0);
        assert!(!dr.is_present(&static_route));
    }
}
