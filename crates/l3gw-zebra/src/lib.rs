//! Dynamic-routing device adapter
//!
//! Drives a Quagga zebra daemon through its telnet vty: login, enable,
//! `configure terminal`, `ip route` / `no ip route`, and `show ip route`
//! to adopt routes already installed.

pub mod adapter;
pub mod client;
pub mod routes;
pub mod session;
pub mod telnet;

pub use adapter::{DynamicRoutingAdapter, StaticRoute};
pub use client::{build_static_route_cmd, Credentials, ZebraClient};
pub use routes::{parse_route_table, RouteVia, ZebraRoute};
pub use session::{Connector, FnConnector, TcpConnector, VtySession, VtyStream};
