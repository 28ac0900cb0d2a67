//! Component wiring for the daemon binary.

use std::sync::Arc;
use std::time::Duration;

use l3gw_common::{AdapterSet, CommandRunner, DeviceAdapter, L3Result, ShellRunner};
use l3gw_iptables::{IptablesManager, PacketFilterAdapter};
use l3gw_store::{MemoryStore, ModelStore};
use l3gw_zebra::{Connector, Credentials, DynamicRoutingAdapter, TcpConnector, ZebraClient};
use tracing::{error, info, warn};

use crate::config::{Backend, L3gwConfig};
use crate::reconciler::{Reconciler, ReconcilerOptions};

/// Opens the model store, persistent if a snapshot path is configured.
pub fn build_store(config: &L3gwConfig) -> L3Result<Arc<dyn ModelStore>> {
    match &config.store.snapshot_path {
        Some(path) => {
            info!("Model store persisted to {}", path.display());
            Ok(Arc::new(MemoryStore::open(path)?))
        }
        None => {
            warn!("No snapshot path configured, model store is in-memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn packet_filter_adapter(
    config: &L3gwConfig,
    runner: Arc<dyn CommandRunner>,
) -> PacketFilterAdapter {
    let manager = IptablesManager::new(
        runner,
        config.iptables.iptables_cmd.clone(),
        config.iptables.chain.clone(),
        config.iptables.parent_chain.clone(),
    );
    PacketFilterAdapter::new(manager, config.iptables.public_interface.clone())
}

pub fn dynamic_routing_adapter(
    config: &L3gwConfig,
    connector: Box<dyn Connector>,
) -> DynamicRoutingAdapter {
    let client = ZebraClient::new(
        connector,
        Credentials {
            password: config.zebra.password.clone(),
            enable_password: config.zebra.enable_password.clone(),
        },
        config.zebra_timeout(),
    );
    DynamicRoutingAdapter::new(client, config.zebra.next_hops.clone())
}

/// Assembles the configured backend from its device seams.
pub fn assemble_adapter(
    config: &L3gwConfig,
    runner: Arc<dyn CommandRunner>,
    connector: Box<dyn Connector>,
) -> Box<dyn DeviceAdapter> {
    match config.daemon.backend {
        Backend::PacketFilter => Box::new(packet_filter_adapter(config, runner)),
        Backend::DynamicRouting => Box::new(dynamic_routing_adapter(config, connector)),
        Backend::Gateway => {
            let adapters: Vec<Box<dyn DeviceAdapter>> = vec![
                Box::new(packet_filter_adapter(config, runner)),
                Box::new(dynamic_routing_adapter(config, connector)),
            ];
            Box::new(AdapterSet::new(adapters))
        }
    }
}

/// The configured backend against the real host: iptables through the
/// shell, zebra over TCP.
pub fn build_adapter(config: &L3gwConfig) -> Box<dyn DeviceAdapter> {
    let connector = TcpConnector::new(
        config.zebra.host.clone(),
        config.zebra.port,
        config.zebra_timeout(),
    );
    assemble_adapter(config, Arc::new(ShellRunner), Box::new(connector))
}

pub fn build_reconciler(config: &L3gwConfig) -> L3Result<Reconciler> {
    let store = build_store(config)?;
    let adapter = build_adapter(config);
    Ok(Reconciler::new(
        store,
        adapter,
        ReconcilerOptions {
            cascade_routetable_delete: config.daemon.cascade_routetable_delete,
        },
    ))
}

/// Restores the device whenever a failed call left the projection dirty.
/// Runs until the task is aborted.
pub async fn resync_loop(reconciler: Arc<Reconciler>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match reconciler.resync_if_dirty().await {
            Ok(Some(report)) if !report.is_clean() => {
                warn!(failures = report.failures, "Resync left failures, will retry");
            }
            Ok(_) => {}
            Err(e) if e.is_retryable() => warn!("Resync failed, will retry: {}", e),
            Err(e) => error!("Resync failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l3gw_common::L3Error;
    use l3gw_test::{FakeIptables, FakeZebra};
    use l3gw_zebra::session::SERVICE;
    use l3gw_zebra::{FnConnector, VtyStream};

    fn fake_connector(zebra: &FakeZebra) -> Box<dyn Connector> {
        let daemon = zebra.clone();
        Box::new(FnConnector::new(move || {
            daemon
                .connect()
                .map(|s| Box::new(s) as Box<dyn VtyStream>)
                .map_err(|e| L3Error::service_contact(SERVICE, e.to_string()))
        }))
    }

    #[tokio::test]
    async fn test_assemble_each_backend() {
        let zebra = FakeZebra::new("zebra", None);
        let mut config = L3gwConfig::default();

        for (backend, name, next_hop) in [
            (Backend::PacketFilter, "packet-filter", false),
            (Backend::DynamicRouting, "dynamic-routing", true),
            (Backend::Gateway, "packet-filter+dynamic-routing", true),
        ] {
            config.daemon.backend = backend;
            let adapter = assemble_adapter(
                &config,
                Arc::new(FakeIptables::new()),
                fake_connector(&zebra),
            );
            assert_eq!(adapter.name(), name);
            assert_eq!(adapter.accepts_next_hop(), next_hop);
        }
    }

    #[tokio::test]
    async fn test_persistent_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = L3gwConfig::default();
        config.store.snapshot_path = Some(dir.path().join("model.json"));

        let store = build_store(&config).unwrap();
        store.create_routetable("tenant-a", None, None).await.unwrap();

        let reopened = build_store(&config).unwrap();
        assert_eq!(reopened.list_routetables("tenant-a").await.unwrap().len(), 1);
    }
}
