//! Typed records for the declarative L3 model.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cidr::{is_default_route, parse_cidr};

/// Literal accepted as a wildcard route source.
pub const WILDCARD: &str = "*";

/// Literal accepted as the default route destination.
pub const DESTINATION_DEFAULT: &str = "default";

/// Target tags seeded at startup.
pub const SYSTEM_TARGETS: [&str; 3] = ["private", "public", "vpn"];

/// Description given to seeded and undescribed targets.
pub const SYSTEM_TARGET_DESCRIPTION: &str = "System";

/// Tag of the target that grants egress through the public interface.
pub const TARGET_PUBLIC: &str = "public";

/// Tag of the target that peers two tenant subnets.
pub const TARGET_PRIVATE: &str = "private";

/// A tenant-owned IPv4 block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: Uuid,
    pub tenant_id: String,
    pub cidr: Ipv4Net,
    pub network_id: Uuid,
    /// Route table this subnet is associated with, if any.
    pub routetable_id: Option<Uuid>,
}

/// A named collection of routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: Uuid,
    pub tenant_id: String,
    pub label: String,
    pub description: String,
}

impl RouteTable {
    /// Label used when the caller supplies none.
    pub fn default_label(tenant_id: &str) -> String {
        format!("label-routetable-{}", tenant_id)
    }

    /// Description used when the caller supplies none.
    pub fn default_description(tenant_id: &str) -> String {
        format!("description-routetable-{}", tenant_id)
    }
}

/// A (source, destination, target) triple inside a route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub routetable_id: Uuid,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub target: RouteTarget,
}

impl Route {
    /// True if the route names `subnet_id` as source or destination.
    pub fn references_subnet(&self, subnet_id: Uuid) -> bool {
        self.source == Endpoint::Subnet(subnet_id) || self.destination == Endpoint::Subnet(subnet_id)
    }

    /// True if both routes describe the same forwarding intent.
    pub fn same_spec(&self, source: &Endpoint, destination: &Endpoint, target: &RouteTarget) -> bool {
        &self.source == source && &self.destination == destination && &self.target == target
    }
}

/// A symbolic egress class. `tenant_id == None` means system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub tag: String,
    pub description: String,
}

/// One side of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// `*`: any source.
    Any,
    /// `default` or the all-zero address.
    Default,
    /// A subnet of the same tenant, by id.
    Subnet(Uuid),
    /// A literal network.
    Cidr(Ipv4Net),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Any => f.write_str(WILDCARD),
            Endpoint::Default => f.write_str(DESTINATION_DEFAULT),
            Endpoint::Subnet(id) => write!(f, "{}", id),
            Endpoint::Cidr(net) => write!(f, "{}", net),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parses the stored form of an endpoint. Caller input goes through
    /// the route validator instead, which applies per-side rules.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == WILDCARD {
            return Ok(Endpoint::Any);
        }
        if value.eq_ignore_ascii_case(DESTINATION_DEFAULT) {
            return Ok(Endpoint::Default);
        }
        if let Ok(id) = Uuid::parse_str(value) {
            return Ok(Endpoint::Subnet(id));
        }
        match parse_cidr(value) {
            Some(net) if is_default_route(&net) => Ok(Endpoint::Default),
            Some(net) => Ok(Endpoint::Cidr(net)),
            None => Err(format!("invalid route endpoint '{}'", value)),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

/// Where a route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteTarget {
    /// A lowercase target tag.
    Tag(String),
    /// A literal next hop.
    NextHop(Ipv4Addr),
}

impl RouteTarget {
    /// Builds a target from caller input, case-folding tags.
    pub fn parse(value: &str) -> Self {
        match value.parse::<Ipv4Addr>() {
            Ok(addr) => RouteTarget::NextHop(addr),
            Err(_) => RouteTarget::Tag(value.to_lowercase()),
        }
    }

    /// The tag, when this is a symbolic target.
    pub fn tag(&self) -> Option<&str> {
        match self {
            RouteTarget::Tag(tag) => Some(tag),
            RouteTarget::NextHop(_) => None,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Tag(tag) => f.write_str(tag),
            RouteTarget::NextHop(addr) => write!(f, "{}", addr),
        }
    }
}

impl TryFrom<String> for RouteTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("empty route target".to_string());
        }
        Ok(RouteTarget::parse(&value))
    }
}

impl From<RouteTarget> for String {
    fn from(value: RouteTarget) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_stored_forms() {
        let id = Uuid::new_v4();
        assert_eq!("*".parse::<Endpoint>().unwrap(), Endpoint::Any);
        assert_eq!("DEFAULT".parse::<Endpoint>().unwrap(), Endpoint::Default);
        assert_eq!("0.0.0.0".parse::<Endpoint>().unwrap(), Endpoint::Default);
        assert_eq!("0.0.0.0/0".parse::<Endpoint>().unwrap(), Endpoint::Default);
        assert_eq!(id.to_string().parse::<Endpoint>().unwrap(), Endpoint::Subnet(id));
        assert_eq!(
            "10.1.0.0/16".parse::<Endpoint>().unwrap(),
            Endpoint::Cidr("10.1.0.0/16".parse().unwrap())
        );
        assert!("???".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_route_serializes_endpoints_as_strings() {
        let route = Route {
            id: Uuid::nil(),
            routetable_id: Uuid::nil(),
            source: Endpoint::Cidr("10.0.0.0/24".parse().unwrap()),
            destination: Endpoint::Default,
            target: RouteTarget::parse("Public"),
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["source"], "10.0.0.0/24");
        assert_eq!(json["destination"], "default");
        assert_eq!(json["target"], "public");

        let back: Route = serde_json::from_value(json).unwrap();
        assert_eq!(back, route);
    }

    #[test]
    fn test_route_target_parse() {
        assert_eq!(RouteTarget::parse("VPN"), RouteTarget::Tag("vpn".into()));
        assert_eq!(
            RouteTarget::parse("192.0.2.1"),
            RouteTarget::NextHop(Ipv4Addr::new(192, 0, 2, 1))
        );
        assert_eq!(RouteTarget::parse("vpn").tag(), Some("vpn"));
    }

    #[test]
    fn test_references_subnet() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let route = Route {
            id: Uuid::new_v4(),
            routetable_id: Uuid::new_v4(),
            source: Endpoint::Subnet(a),
            destination: Endpoint::Default,
            target: RouteTarget::parse("public"),
        };
        assert!(route.references_subnet(a));
        assert!(!route.references_subnet(b));
    }

    #[test]
    fn test_routetable_defaults() {
        assert_eq!(RouteTable::default_label("t1"), "label-routetable-t1");
        assert_eq!(
            RouteTable::default_description("t1"),
            "description-routetable-t1"
        );
    }
}
