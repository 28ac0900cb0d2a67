//! Packet-filter projection of the L3 model.

use async_trait::async_trait;
use l3gw_common::types::{TARGET_PRIVATE, TARGET_PUBLIC};
use l3gw_common::{DeviceAdapter, L3Result, ResolvedRoute, RouteDestination, Subnet};
use tracing::{debug, info};

use crate::manager::IptablesManager;

/// What a route means to the packet filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    PublicEgress,
    Peering,
    Ignored,
}

fn classify(route: &ResolvedRoute) -> RuleAction {
    if route.source.is_none() {
        return RuleAction::Ignored;
    }
    match (route.destination, route.target.tag()) {
        (RouteDestination::Default, Some(TARGET_PUBLIC)) => RuleAction::PublicEgress,
        (RouteDestination::Net(_), Some(TARGET_PRIVATE)) => RuleAction::Peering,
        _ => RuleAction::Ignored,
    }
}

/// Device adapter backed by an iptables forwarding chain.
///
/// Every subnet starts isolated. A `default`/`public` route opens egress
/// through the public interface; a `<cidr>`/`private` route peers the
/// source with the destination network.
pub struct PacketFilterAdapter {
    manager: IptablesManager,
    public_interface: String,
}

impl PacketFilterAdapter {
    pub fn new(manager: IptablesManager, public_interface: impl Into<String>) -> Self {
        Self {
            manager,
            public_interface: public_interface.into(),
        }
    }

    pub fn manager(&self) -> &IptablesManager {
        &self.manager
    }

    /// Removes the managed chain and everything in it.
    pub async fn clear_all(&mut self) -> L3Result<()> {
        self.manager.clear_all().await
    }
}

#[async_trait]
impl DeviceAdapter for PacketFilterAdapter {
    fn name(&self) -> &str {
        "packet-filter"
    }

    async fn initialize(&mut self) -> L3Result<()> {
        info!("Initializing packet filter chain {}", self.manager.chain());
        self.manager.initialize().await
    }

    async fn restore(&mut self) -> L3Result<()> {
        self.manager.restore().await
    }

    async fn subnet_created(&mut self, subnet: &Subnet) -> L3Result<()> {
        self.manager.subnet_drop_all(&subnet.cidr).await
    }

    async fn subnet_deleted(&mut self, subnet: &Subnet) -> L3Result<()> {
        self.manager.subnet_accept_all(&subnet.cidr).await
    }

    async fn route_created(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        let Some(source) = route.source else {
            debug!(route_id = %route.route_id, "Wildcard source has no packet filter rule");
            return Ok(());
        };
        match classify(route) {
            RuleAction::PublicEgress => {
                self.manager
                    .subnet_public_accept(&source, &self.public_interface)
                    .await
            }
            RuleAction::Peering => {
                self.manager
                    .inter_subnet_accept(&source, &route.destination.as_net())
                    .await
            }
            RuleAction::Ignored => {
                debug!(
                    route_id = %route.route_id,
                    destination = %route.destination,
                    route_target = %route.target,
                    "Route has no packet filter rule"
                );
                Ok(())
            }
        }
    }

    async fn route_deleted(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        let Some(source) = route.source else {
            return Ok(());
        };
        match classify(route) {
            RuleAction::PublicEgress => {
                self.manager
                    .subnet_public_drop(&source, &self.public_interface)
                    .await
            }
            RuleAction::Peering => {
                self.manager
                    .inter_subnet_drop(&source, &route.destination.as_net())
                    .await
            }
            RuleAction::Ignored => Ok(()),
        }
    }
}
