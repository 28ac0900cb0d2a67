//! Device adapter trait and the resolved route form adapters consume.
//!
//! The reconciler resolves subnet identifiers to CIDRs before calling an
//! adapter, so adapters never read the model store. Every adapter must be
//! able to rebuild its device state purely from replayed
//! `subnet_created` / `route_created` calls after `initialize` and
//! `restore`.

use std::fmt;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use uuid::Uuid;

use crate::error::L3Result;
use crate::types::{RouteTarget, Subnet};

/// Resolved route destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDestination {
    Default,
    Net(Ipv4Net),
}

impl RouteDestination {
    /// The destination as a network, `0.0.0.0/0` for the default route.
    pub fn as_net(&self) -> Ipv4Net {
        match self {
            RouteDestination::Default => Ipv4Net::default(),
            RouteDestination::Net(net) => *net,
        }
    }
}

impl fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDestination::Default => f.write_str("default"),
            RouteDestination::Net(net) => write!(f, "{}", net),
        }
    }
}

/// A route with every subnet reference replaced by its CIDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub route_id: Uuid,
    /// `None` for the wildcard source.
    pub source: Option<Ipv4Net>,
    pub destination: RouteDestination,
    pub target: RouteTarget,
}

/// Translates model changes into device mutations.
///
/// Implementations keep their own in-memory view of what they have
/// installed and must treat a repeated create of the same object as a
/// no-op, so that replay after `restore` issues no duplicate commands.
#[async_trait]
pub trait DeviceAdapter: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether route targets may be literal next-hop addresses.
    fn accepts_next_hop(&self) -> bool {
        false
    }

    /// Establishes the device session and clears stale state left by an
    /// unclean shutdown. Called once at startup; errors are fatal.
    async fn initialize(&mut self) -> L3Result<()>;

    /// Re-reads device state into in-memory tracking without mutating
    /// the device.
    async fn restore(&mut self) -> L3Result<()>;

    async fn subnet_created(&mut self, subnet: &Subnet) -> L3Result<()>;

    async fn subnet_deleted(&mut self, subnet: &Subnet) -> L3Result<()>;

    async fn route_created(&mut self, route: &ResolvedRoute) -> L3Result<()>;

    async fn route_deleted(&mut self, route: &ResolvedRoute) -> L3Result<()>;

    /// Replaces `old` with `new`. No device offers an atomic update, so the
    /// default removes the old projection before installing the new one.
    async fn route_updated(&mut self, old: &ResolvedRoute, new: &ResolvedRoute) -> L3Result<()> {
        self.route_deleted(old).await?;
        self.route_created(new).await
    }
}

/// Fans every call out to several adapters in order.
///
/// The first error stops the walk; adapters after it are not called.
pub struct AdapterSet {
    name: String,
    adapters: Vec<Box<dyn DeviceAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: Vec<Box<dyn DeviceAdapter>>) -> Self {
        let name = adapters
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, adapters }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[async_trait]
impl DeviceAdapter for AdapterSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_next_hop(&self) -> bool {
        self.adapters.iter().any(|a| a.accepts_next_hop())
    }

    async fn initialize(&mut self) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.initialize().await?;
        }
        Ok(())
    }

    async fn restore(&mut self) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.restore().await?;
        }
        Ok(())
    }

    async fn subnet_created(&mut self, subnet: &Subnet) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.subnet_created(subnet).await?;
        }
        Ok(())
    }

    async fn subnet_deleted(&mut self, subnet: &Subnet) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.subnet_deleted(subnet).await?;
        }
        Ok(())
    }

    async fn route_created(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.route_created(route).await?;
        }
        Ok(())
    }

    async fn route_deleted(&mut self, route: &ResolvedRoute) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.route_deleted(route).await?;
        }
        Ok(())
    }

    async fn route_updated(&mut self, old: &ResolvedRoute, new: &ResolvedRoute) -> L3Result<()> {
        for adapter in &mut self.adapters {
            adapter.route_updated(old, new).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        next_hop: bool,
    }

    #[async_trait]
    impl DeviceAdapter for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn accepts_next_hop(&self) -> bool {
            self.next_hop
        }

        async fn initialize(&mut self) -> L3Result<()> {
            self.log.lock().unwrap().push(format!("{}:init", self.name));
            Ok(())
        }

        async fn restore(&mut self) -> L3Result<()> {
            Ok(())
        }

        async fn subnet_created(&mut self, _subnet: &Subnet) -> L3Result<()> {
            Ok(())
        }

        async fn subnet_deleted(&mut self, _subnet: &Subnet) -> L3Result<()> {
            Ok(())
        }

        async fn route_created(&mut self, route: &ResolvedRoute) -> L3Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:add:{}", self.name, route.destination));
            Ok(())
        }

        async fn route_deleted(&mut self, route: &ResolvedRoute) -> L3Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:del:{}", self.name, route.destination));
            Ok(())
        }
    }

    fn route(dest: &str) -> ResolvedRoute {
        ResolvedRoute {
            route_id: Uuid::new_v4(),
            source: Some("10.0.0.0/24".parse().unwrap()),
            destination: RouteDestination::Net(dest.parse().unwrap()),
            target: RouteTarget::parse("private"),
        }
    }

    #[tokio::test]
    async fn test_default_update_is_delete_then_add() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut probe = Probe {
            name: "p",
            log: log.clone(),
            next_hop: false,
        };
        probe
            .route_updated(&route("10.1.0.0/24"), &route("10.2.0.0/24"))
            .await
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["p:del:10.1.0.0/24", "p:add:10.2.0.0/24"]
        );
    }

    #[tokio::test]
    async fn test_adapter_set_fans_out_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = AdapterSet::new(vec![
            Box::new(Probe {
                name: "a",
                log: log.clone(),
                next_hop: false,
            }),
            Box::new(Probe {
                name: "b",
                log: log.clone(),
                next_hop: true,
            }),
        ]);
        assert_eq!(set.name(), "a+b");
        assert!(set.accepts_next_hop());
        set.initialize().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:init", "b:init"]);
    }

    #[test]
    fn test_destination_as_net() {
        assert_eq!(RouteDestination::Default.as_net().to_string(), "0.0.0.0/0");
        assert_eq!(RouteDestination::Default.to_string(), "default");
    }
}
