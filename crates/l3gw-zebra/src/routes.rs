//! Parsing of `show ip route` output.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use regex::Regex;

static SELECTED_ROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z])>\*?\s+(\d+\.\d+\.\d+\.\d+/\d+)\s+(.*)$").expect("Invalid regex pattern")
});

static VIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"via\s+(\d+\.\d+\.\d+\.\d+),\s+([\w.-]+)").expect("Invalid regex pattern")
});

static CONNECTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"is directly connected,\s+([\w.-]+)").expect("Invalid regex pattern")
});

static DETAIL_NEXT_HOP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\*\s+(\d+\.\d+\.\d+\.\d+)").expect("Invalid regex pattern")
});

static DETAIL_CONNECTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\*\s+directly connected").expect("Invalid regex pattern")
});

/// Where a listed route points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteVia {
    Direct,
    NextHop(Ipv4Addr),
}

impl fmt::Display for RouteVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteVia::Direct => f.write_str("direct"),
            RouteVia::NextHop(addr) => write!(f, "{}", addr),
        }
    }
}

/// One selected route from the daemon's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZebraRoute {
    /// Route type code: `S` static, `C` connected, `K` kernel, ...
    pub kind: char,
    pub prefix: Ipv4Net,
    pub via: RouteVia,
    pub interface: String,
}

impl ZebraRoute {
    pub fn is_static(&self) -> bool {
        self.kind == 'S'
    }
}

/// Parses the selected routes of a `show ip route` listing. Loopback
/// routes and lines that do not describe a route are skipped.
pub fn parse_route_table(output: &str) -> Vec<ZebraRoute> {
    output
        .lines()
        .filter_map(|line| {
            let caps = SELECTED_ROUTE_RE.captures(line.trim_end())?;
            let kind = caps[1].chars().next()?;
            let prefix: Ipv4Net = caps[2].parse().ok()?;
            if prefix.addr().is_loopback() {
                return None;
            }
            let rest = &caps[3];
            let (via, interface) = if let Some(v) = VIA_RE.captures(rest) {
                (RouteVia::NextHop(v[1].parse().ok()?), v[2].to_string())
            } else {
                let c = CONNECTED_RE.captures(rest)?;
                (RouteVia::Direct, c[1].to_string())
            };
            Some(ZebraRoute {
                kind,
                prefix,
                via,
                interface,
            })
        })
        .collect()
}

/// Parses `show ip route <prefix>` detail output into the selected target.
pub fn parse_route_target(output: &str) -> Option<RouteVia> {
    let mut target = None;
    for line in output.lines() {
        if let Some(caps) = DETAIL_NEXT_HOP_RE.captures(line) {
            target = caps[1].parse().ok().map(RouteVia::NextHop);
        } else if DETAIL_CONNECTED_RE.is_match(line) {
            target = Some(RouteVia::Direct);
        }
    }
    target
}
