//! Test infrastructure for the L3 gateway control plane
//!
//! Provides:
//! - Fixtures for subnets and resolved routes
//! - `RecordingRunner`, a command runner that records and optionally fails
//! - `FakeIptables`, an in-memory simulation of the kernel filter table
//! - `FakeZebra`, an in-process routing-daemon vty
//! - Command verification helpers

pub mod fixtures;
mod runner;
mod verification;
mod zebra;

pub use runner::{FakeIptables, RecordingRunner};
pub use verification::*;
pub use zebra::{FakeZebra, ZebraState};
