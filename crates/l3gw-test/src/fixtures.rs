//! Test fixtures for common model objects

use ipnet::Ipv4Net;
use l3gw_common::{ResolvedRoute, RouteDestination, RouteTarget, Subnet};
use uuid::Uuid;

pub const TENANT_A: &str = "tenant-a";
pub const TENANT_B: &str = "tenant-b";

/// Public interface used by packet-filter fixtures.
pub const PUBLIC_IFACE: &str = "eth0";

/// Next hop used by dynamic-routing fixtures.
pub const NEXT_HOP: &str = "192.0.2.1";

fn net(cidr: &str) -> Ipv4Net {
    cidr.parse()
        .unwrap_or_else(|_| panic!("fixture cidr '{}' is not valid", cidr))
}

/// An unassociated subnet with fresh ids.
pub fn subnet(tenant_id: &str, cidr: &str) -> Subnet {
    Subnet {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        cidr: net(cidr),
        network_id: Uuid::new_v4(),
        routetable_id: None,
    }
}

/// A resolved route. `destination` is a cidr or `default`, `target` a tag
/// or next-hop address.
pub fn resolved_route(source: Option<&str>, destination: &str, target: &str) -> ResolvedRoute {
    let destination = if destination.eq_ignore_ascii_case("default") {
        RouteDestination::Default
    } else {
        RouteDestination::Net(net(destination))
    };
    ResolvedRoute {
        route_id: Uuid::new_v4(),
        source: source.map(net),
        destination,
        target: RouteTarget::parse(target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_route_fixture() {
        let route = resolved_route(Some("10.0.0.0/24"), "DEFAULT", "Public");
        assert_eq!(route.destination, RouteDestination::Default);
        assert_eq!(route.target.tag(), Some("public"));

        let route = resolved_route(None, "10.0.1.0/24", NEXT_HOP);
        assert!(route.source.is_none());
        assert!(route.target.tag().is_none());
    }
}
