//! Packet-filter device adapter
//!
//! Projects the L3 model onto a dedicated iptables forwarding chain that the
//! built-in `FORWARD` chain jumps into. Subnets are isolated by a default
//! drop rule; public and private routes insert accept rules ahead of it.

pub mod adapter;
pub mod commands;
pub mod manager;
pub mod table;

pub use adapter::PacketFilterAdapter;
pub use manager::{IptablesManager, DEFAULT_CHAIN, DEFAULT_PARENT_CHAIN};
pub use table::{IptablesRule, IptablesTable, RulePosition};
