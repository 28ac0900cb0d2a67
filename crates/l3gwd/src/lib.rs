//! l3gwd - L3 gateway control plane daemon
//!
//! Tenants declare subnets, route tables, routes and associations. The
//! [`Reconciler`] validates each change, records it in the model store and
//! projects it onto the configured device adapters: an iptables forwarding
//! chain, zebra static routes, or both.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Reconciler ──► RouteValidator (read-only)
//!                │
//!                ├──► ModelStore      (authoritative)
//!                └──► DeviceAdapter   (projection, rebuilt by restore)
//! ```

pub mod config;
pub mod daemon;
pub mod locks;
pub mod reconciler;
pub mod validator;

pub use config::{Backend, L3gwConfig, DEFAULT_CONFIG_PATH};
pub use locks::TenantLocks;
pub use reconciler::{Reconciler, ReconcilerOptions, RestoreReport};
pub use validator::RouteValidator;
