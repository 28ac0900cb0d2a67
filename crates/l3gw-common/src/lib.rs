//! Common infrastructure for the L3 gateway control plane.
//!
//! - [`types`]: typed records of the declarative model (subnets, route
//!   tables, routes, targets)
//! - [`adapter`]: the [`DeviceAdapter`] contract implemented by the
//!   packet-filter and dynamic-routing backends
//! - [`shell`]: command execution behind the [`CommandRunner`] seam
//! - [`error`]: the [`L3Error`] kinds shared by every crate
//! - [`cidr`]: IPv4 CIDR parsing and netmask conversion
//! - [`ref_count`]: counted ownership of shared device objects
//!
//! # Architecture
//!
//! Requests flow through the reconciler as validate, then model store,
//! then device adapter. The model store is authoritative; adapter state is
//! a projection that can always be rebuilt by replaying the store.

pub mod adapter;
pub mod cidr;
pub mod error;
pub mod ref_count;
pub mod shell;
pub mod types;

// Re-export commonly used items at crate root
pub use adapter::{AdapterSet, DeviceAdapter, ResolvedRoute, RouteDestination};
pub use error::{ErrorKind, L3Error, L3Result};
pub use ref_count::{RefCountError, RefCounts};
pub use shell::{CommandRunner, ExecResult, ShellRunner};
pub use types::{Endpoint, Route, RouteTable, RouteTarget, Subnet, Target};
