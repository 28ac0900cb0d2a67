//! Shared harness for reconciler integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use l3gw_common::L3Error;
use l3gw_store::{MemoryStore, ModelStore};
use l3gw_test::{FakeIptables, FakeZebra};
use l3gw_zebra::session::SERVICE;
use l3gw_zebra::{Connector, FnConnector, VtyStream};
use l3gwd::{daemon, Backend, L3gwConfig, Reconciler, ReconcilerOptions};

pub const VPN_NEXT_HOP: &str = "198.51.100.1";

pub fn config(backend: Backend) -> L3gwConfig {
    let mut config = L3gwConfig::default();
    config.daemon.backend = backend;
    config.zebra.timeout_secs = 1;
    config.zebra.next_hops.insert(
        "vpn".to_string(),
        VPN_NEXT_HOP.parse::<Ipv4Addr>().unwrap(),
    );
    config
}

pub fn zebra_connector(zebra: &FakeZebra) -> Box<dyn Connector> {
    let daemon = zebra.clone();
    Box::new(FnConnector::new(move || {
        daemon
            .connect()
            .map(|s| Box::new(s) as Box<dyn VtyStream>)
            .map_err(|e| L3Error::service_contact(SERVICE, e.to_string()))
    }))
}

/// One gateway host: a store plus fake devices that outlive reconcilers,
/// so a test can restart the daemon against the same device state.
pub struct Host {
    pub store: Arc<dyn ModelStore>,
    pub kernel: Arc<FakeIptables>,
    pub zebra: FakeZebra,
    pub config: L3gwConfig,
}

impl Host {
    pub fn new(backend: Backend) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            kernel: Arc::new(FakeIptables::new()),
            zebra: FakeZebra::new("zebra", None),
            config: config(backend),
        }
    }

    /// A reconciler wired to this host's devices, not yet started.
    pub fn reconciler(&self) -> Reconciler {
        let adapter =
            daemon::assemble_adapter(&self.config, self.kernel.clone(), zebra_connector(&self.zebra));
        Reconciler::new(
            self.store.clone(),
            adapter,
            ReconcilerOptions {
                cascade_routetable_delete: self.config.daemon.cascade_routetable_delete,
            },
        )
    }

    pub async fn start(&self) -> Reconciler {
        let reconciler = self.reconciler();
        reconciler.start().await.unwrap();
        reconciler
    }
}
