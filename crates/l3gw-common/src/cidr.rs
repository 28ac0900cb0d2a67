//! IPv4 CIDR helpers.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{L3Error, L3Result};

/// Smallest number of addresses a subnet may span (network, broadcast
/// and at least one host).
pub const MIN_SUBNET_ADDRESSES: u64 = 3;

/// Parses `a.b.c.d/len`, or a bare address as a host route.
///
/// Host bits are preserved; callers decide whether to truncate.
pub fn parse_cidr(value: &str) -> Option<Ipv4Net> {
    if let Ok(net) = value.parse::<Ipv4Net>() {
        return Some(net);
    }
    value
        .parse::<Ipv4Addr>()
        .ok()
        .and_then(|addr| Ipv4Net::new(addr, 32).ok())
}

/// Parses a subnet CIDR, rejecting networks too small to hold a host.
///
/// The returned network is truncated to its network address.
pub fn parse_subnet_cidr(value: &str) -> L3Result<Ipv4Net> {
    let net = parse_cidr(value).ok_or_else(|| L3Error::invalid_cidr(value))?;
    if address_count(&net) < MIN_SUBNET_ADDRESSES {
        return Err(L3Error::invalid_cidr(value));
    }
    Ok(net.trunc())
}

/// Number of addresses covered by `net`.
pub fn address_count(net: &Ipv4Net) -> u64 {
    1u64 << (32 - u32::from(net.prefix_len()))
}

/// Splits a network into its dotted network address and netmask.
pub fn to_addr_netmask(net: &Ipv4Net) -> (Ipv4Addr, Ipv4Addr) {
    (net.network(), net.netmask())
}

/// Inverse of [`to_addr_netmask`]; `None` for a non-contiguous mask.
pub fn from_addr_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Net> {
    let prefix = ipnet::ipv4_mask_to_prefix(netmask).ok()?;
    Ipv4Net::new(addr, prefix).ok().map(|net| net.trunc())
}

/// True for the all-zero address or the `/0` network.
pub fn is_default_route(net: &Ipv4Net) -> bool {
    net.addr().is_unspecified() && (net.prefix_len() == 0 || net.prefix_len() == 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr_forms() {
        assert_eq!(
            parse_cidr("10.0.0.0/24"),
            Some("10.0.0.0/24".parse().unwrap())
        );
        assert_eq!(parse_cidr("10.0.0.7"), Some("10.0.0.7/32".parse().unwrap()));
        assert_eq!(parse_cidr("???"), None);
        assert_eq!(parse_cidr("10.0.0.0/33"), None);
        assert_eq!(parse_cidr(""), None);
    }

    #[test]
    fn test_parse_subnet_cidr_size() {
        assert_eq!(
            parse_subnet_cidr("10.0.0.9/30").unwrap(),
            "10.0.0.8/30".parse::<Ipv4Net>().unwrap()
        );
        assert!(matches!(
            parse_subnet_cidr("10.0.0.0/31"),
            Err(L3Error::InvalidCidr { .. })
        ));
        assert!(parse_subnet_cidr("10.0.0.1").is_err());
        assert!(parse_subnet_cidr("not-a-cidr").is_err());
    }

    #[test]
    fn test_netmask_conversion() {
        let net: Ipv4Net = "192.168.10.0/23".parse().unwrap();
        let (addr, mask) = to_addr_netmask(&net);
        assert_eq!(addr, Ipv4Addr::new(192, 168, 10, 0));
        assert_eq!(mask, Ipv4Addr::new(255, 255, 254, 0));
        assert_eq!(from_addr_netmask(addr, mask), Some(net));
        assert_eq!(
            from_addr_netmask(addr, Ipv4Addr::new(255, 0, 255, 0)),
            None
        );
    }

    #[test]
    fn test_is_default_route() {
        assert!(is_default_route(&"0.0.0.0/0".parse().unwrap()));
        assert!(is_default_route(&"0.0.0.0/32".parse().unwrap()));
        assert!(!is_default_route(&"10.0.0.0/8".parse().unwrap()));
    }
}
