//! Packet-filter policy operations on the managed forwarding chain.

use std::sync::Arc;

use ipnet::Ipv4Net;
use l3gw_common::{CommandRunner, L3Result, RefCountError, RefCounts};
use tracing::{debug, info, instrument, warn};

use crate::commands::*;
use crate::table::{IptablesTable, RulePosition};

/// Default name of the managed chain.
pub const DEFAULT_CHAIN: &str = "l3gw-FORWARD";

/// Default built-in chain that jumps into the managed chain.
pub const DEFAULT_PARENT_CHAIN: &str = "FORWARD";

/// Drives the managed chain.
///
/// Every rule is reference counted. Subnets of different tenants may
/// share a CIDR and so share one isolation rule; several routes can derive
/// the same accept rule (two peerings from one source share its
/// return-traffic rule). Isolation rules go at the tail of the chain,
/// accept rules at the head.
pub struct IptablesManager {
    filter: IptablesTable,
    chain: String,
    parent_chain: String,
    subnet_rules: RefCounts<String>,
    route_rules: RefCounts<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Isolation,
    Accept,
}

impl RuleKind {
    fn position(self) -> RulePosition {
        match self {
            RuleKind::Isolation => RulePosition::Tail,
            RuleKind::Accept => RulePosition::Head,
        }
    }
}

impl IptablesManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        iptables_cmd: impl Into<String>,
        chain: impl Into<String>,
        parent_chain: impl Into<String>,
    ) -> Self {
        Self {
            filter: IptablesTable::new(runner, iptables_cmd),
            chain: chain.into(),
            parent_chain: parent_chain.into(),
            subnet_rules: RefCounts::new(),
            route_rules: RefCounts::new(),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Read access to the tracked table.
    pub fn table(&self) -> &IptablesTable {
        &self.filter
    }

    /// Creates the managed chain and hooks it into the parent chain.
    pub async fn ensure_chain(&mut self) -> L3Result<()> {
        self.filter.add_chain(&self.chain).await?;
        self.filter
            .add_rule(&self.parent_chain, &jump_rule(&self.chain), RulePosition::Head)
            .await?;
        Ok(())
    }

    /// Isolates `cidr`: drop anything leaving it for another network.
    #[instrument(skip(self))]
    pub async fn subnet_drop_all(&mut self, cidr: &Ipv4Net) -> L3Result<()> {
        self.ensure_chain().await?;
        self.acquire(RuleKind::Isolation, drop_all_rule(cidr)).await
    }

    /// Withdraws one reference to the isolation rule of `cidr`; the rule
    /// goes once no subnet with that CIDR remains.
    #[instrument(skip(self))]
    pub async fn subnet_accept_all(&mut self, cidr: &Ipv4Net) -> L3Result<()> {
        self.release(RuleKind::Isolation, drop_all_rule(cidr)).await
    }

    /// Lets `cidr` egress through `public_interface`.
    #[instrument(skip(self))]
    pub async fn subnet_public_accept(
        &mut self,
        cidr: &Ipv4Net,
        public_interface: &str,
    ) -> L3Result<()> {
        self.ensure_chain().await?;
        self.acquire(RuleKind::Accept, public_accept_rule(cidr, public_interface)).await
    }

    /// Withdraws one reference to the public egress rule of `cidr`.
    #[instrument(skip(self))]
    pub async fn subnet_public_drop(
        &mut self,
        cidr: &Ipv4Net,
        public_interface: &str,
    ) -> L3Result<()> {
        self.release(RuleKind::Accept, public_accept_rule(cidr, public_interface)).await
    }

    /// Lets `source` reach `destination`, with return traffic.
    #[instrument(skip(self))]
    pub async fn inter_subnet_accept(
        &mut self,
        source: &Ipv4Net,
        destination: &Ipv4Net,
    ) -> L3Result<()> {
        self.ensure_chain().await?;
        self.acquire(RuleKind::Accept, inter_subnet_rule(source, destination)).await?;
        self.acquire(RuleKind::Accept, return_traffic_rule(source)).await
    }

    /// Withdraws one reference to each rule of a peering.
    #[instrument(skip(self))]
    pub async fn inter_subnet_drop(
        &mut self,
        source: &Ipv4Net,
        destination: &Ipv4Net,
    ) -> L3Result<()> {
        self.release(RuleKind::Accept, inter_subnet_rule(source, destination)).await?;
        self.release(RuleKind::Accept, return_traffic_rule(source)).await
    }

    fn counts(&mut self, kind: RuleKind) -> &mut RefCounts<String> {
        match kind {
            RuleKind::Isolation => &mut self.subnet_rules,
            RuleKind::Accept => &mut self.route_rules,
        }
    }

    async fn acquire(&mut self, kind: RuleKind, rule: String) -> L3Result<()> {
        let rule = normalize_rule(&rule);
        if self.counts(kind).acquire(rule.clone()) > 1 {
            debug!(?kind, "Rule shared with another holder: {}", rule);
            return Ok(());
        }
        if let Err(e) = self
            .filter
            .add_rule(&self.chain, &rule, kind.position())
            .await
        {
            // The device never got the rule, so nothing holds it.
            let _ = self.counts(kind).release(&rule);
            return Err(e);
        }
        Ok(())
    }

    async fn release(&mut self, kind: RuleKind, rule: String) -> L3Result<()> {
        let rule = normalize_rule(&rule);
        match self.counts(kind).release(&rule) {
            Ok(0) => {
                self.filter.remove_rule(&self.chain, &rule).await?;
            }
            Ok(remaining) => {
                debug!(?kind, remaining, "Rule still held: {}", rule);
            }
            Err(RefCountError::KeyNotFound) => {
                // Adopted from the device but never replayed.
                warn!("Releasing unreferenced rule: {}", rule);
                self.filter.remove_rule(&self.chain, &rule).await?;
            }
        }
        Ok(())
    }

    /// Startup cleanup.
    ///
    /// If the managed chain does not exist it is created. If it does, every
    /// `iptables -S` entry mentioning it is undone in reverse order (rules
    /// deleted, chain removed) and the chain is recreated empty, so stale
    /// rules never accumulate across restarts.
    #[instrument(skip(self))]
    pub async fn initialize(&mut self) -> L3Result<()> {
        self.filter.clear_tracking();
        self.subnet_rules.clear();
        self.route_rules.clear();

        let probe = build_list_chain_cmd(self.filter.iptables_cmd(), &self.chain);
        if !self.filter.probe(&probe).await? {
            info!("Chain {} not present, creating it", self.chain);
            return self.ensure_chain().await;
        }

        let listing = self
            .filter
            .query(&build_dump_rules_cmd(self.filter.iptables_cmd()))
            .await?;
        let stale: Vec<ListedEntry> = parse_listing(&listing)
            .into_iter()
            .filter(|entry| entry.mentions(&self.chain))
            .collect();

        info!("Removing {} stale entries of chain {}", stale.len(), self.chain);
        for entry in stale.iter().rev() {
            let Some(cmd) = entry.undo_cmd(self.filter.iptables_cmd()) else {
                continue;
            };
            if !self.filter.probe(&cmd).await? {
                warn!(command = %cmd, "Failed to remove stale entry");
            }
        }

        self.ensure_chain().await
    }

    /// Rebuilds tracking from the device without mutating it.
    #[instrument(skip(self))]
    pub async fn restore(&mut self) -> L3Result<()> {
        self.filter.clear_tracking();
        self.subnet_rules.clear();
        self.route_rules.clear();

        let listing = self
            .filter
            .query(&build_dump_rules_cmd(self.filter.iptables_cmd()))
            .await?;
        let jump = jump_rule(&self.chain);
        let mut adopted = 0usize;
        for entry in parse_listing(&listing) {
            match entry {
                ListedEntry::Chain { chain } if chain == self.chain => {
                    self.filter.adopt_chain(&chain);
                }
                ListedEntry::Rule { chain, rule } if chain == self.chain => {
                    self.filter.adopt_rule(&chain, &rule);
                    adopted += 1;
                }
                ListedEntry::Rule { chain, rule }
                    if chain == self.parent_chain && normalize_rule(&rule) == jump =>
                {
                    self.filter.adopt_rule(&chain, &rule);
                }
                _ => {}
            }
        }
        info!("Adopted {} rules of chain {}", adopted, self.chain);
        Ok(())
    }

    /// Tears down the managed chain entirely.
    #[instrument(skip(self))]
    pub async fn clear_all(&mut self) -> L3Result<()> {
        let chain = self.chain.clone();
        let parent = self.parent_chain.clone();
        self.filter.remove_chain(&chain, &parent).await?;
        self.subnet_rules.clear();
        self.route_rules.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l3gw_test::FakeIptables;
    use pretty_assertions::assert_eq;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn manager(kernel: &Arc<FakeIptables>) -> IptablesManager {
        IptablesManager::new(
            kernel.clone(),
            "/sbin/iptables",
            DEFAULT_CHAIN,
            DEFAULT_PARENT_CHAIN,
        )
    }

    #[tokio::test]
    async fn test_drop_then_accept_leaves_no_subnet_rules() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);
        let cidr = net("10.0.0.0/24");

        mgr.subnet_drop_all(&cidr).await.unwrap();
        assert_eq!(
            kernel.rules(DEFAULT_CHAIN),
            vec!["-s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP"]
        );

        mgr.subnet_accept_all(&cidr).await.unwrap();
        assert!(mgr.table().rules_in(DEFAULT_CHAIN).is_empty());
        assert!(kernel.rules(DEFAULT_CHAIN).is_empty());
    }

    #[tokio::test]
    async fn test_shared_isolation_rule_outlives_first_subnet() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);
        let cidr = net("10.0.0.0/24");

        mgr.subnet_drop_all(&cidr).await.unwrap();
        mgr.subnet_drop_all(&cidr).await.unwrap();
        assert_eq!(kernel.rules(DEFAULT_CHAIN).len(), 1);

        mgr.subnet_accept_all(&cidr).await.unwrap();
        assert_eq!(
            kernel.rules(DEFAULT_CHAIN),
            vec!["-s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP"]
        );

        mgr.subnet_accept_all(&cidr).await.unwrap();
        assert!(kernel.rules(DEFAULT_CHAIN).is_empty());
    }

    #[tokio::test]
    async fn test_jump_rule_added_once() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);

        mgr.subnet_drop_all(&net("10.0.0.0/24")).await.unwrap();
        mgr.subnet_drop_all(&net("10.0.1.0/24")).await.unwrap();

        assert_eq!(kernel.rules("FORWARD"), vec!["-j l3gw-FORWARD"]);
        assert_eq!(kernel.rules(DEFAULT_CHAIN).len(), 2);
    }

    #[tokio::test]
    async fn test_public_accept_precedes_drop() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);
        let cidr = net("10.0.0.0/24");

        mgr.subnet_drop_all(&cidr).await.unwrap();
        mgr.subnet_public_accept(&cidr, "eth0").await.unwrap();

        assert_eq!(
            kernel.rules(DEFAULT_CHAIN),
            vec![
                "-s 10.0.0.0/24 -o eth0 -j ACCEPT",
                "-s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP",
            ]
        );

        mgr.subnet_public_drop(&cidr, "eth0").await.unwrap();
        assert_eq!(
            kernel.rules(DEFAULT_CHAIN),
            vec!["-s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP"]
        );
    }

    #[tokio::test]
    async fn test_shared_return_rule_survives_first_drop() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);
        let a = net("10.0.0.0/24");
        let b = net("10.0.1.0/24");
        let c = net("10.0.2.0/24");

        mgr.inter_subnet_accept(&a, &b).await.unwrap();
        mgr.inter_subnet_accept(&a, &c).await.unwrap();
        assert_eq!(kernel.rules(DEFAULT_CHAIN).len(), 3);

        mgr.inter_subnet_drop(&a, &b).await.unwrap();
        assert_eq!(
            kernel.rules(DEFAULT_CHAIN),
            vec![
                "-s 10.0.0.0/24 -d 10.0.2.0/24 -j ACCEPT",
                "-d 10.0.0.0/24 -m state --state RELATED,ESTABLISHED -j ACCEPT",
            ]
        );

        mgr.inter_subnet_drop(&a, &c).await.unwrap();
        assert!(kernel.rules(DEFAULT_CHAIN).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_creates_missing_chain() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);

        mgr.initialize().await.unwrap();

        assert!(kernel.has_chain(DEFAULT_CHAIN));
        assert_eq!(kernel.rules("FORWARD"), vec!["-j l3gw-FORWARD"]);
    }

    #[tokio::test]
    async fn test_initialize_clears_stale_rules() {
        let kernel = Arc::new(FakeIptables::new());
        {
            let mut previous = manager(&kernel);
            previous.subnet_drop_all(&net("10.0.0.0/24")).await.unwrap();
            previous
                .subnet_public_accept(&net("10.0.0.0/24"), "eth0")
                .await
                .unwrap();
        }
        kernel.append_foreign("FORWARD", "-i lo -j ACCEPT");

        let mut mgr = manager(&kernel);
        mgr.initialize().await.unwrap();

        assert!(kernel.has_chain(DEFAULT_CHAIN));
        assert!(kernel.rules(DEFAULT_CHAIN).is_empty());
        assert_eq!(
            kernel.rules("FORWARD"),
            vec!["-j l3gw-FORWARD", "-i lo -j ACCEPT"]
        );
    }

    #[tokio::test]
    async fn test_restore_adopts_without_mutation() {
        let kernel = Arc::new(FakeIptables::new());
        {
            let mut previous = manager(&kernel);
            previous.subnet_drop_all(&net("10.0.0.0/24")).await.unwrap();
        }
        let before = kernel.mutation_count();

        let mut mgr = manager(&kernel);
        mgr.restore().await.unwrap();
        assert_eq!(kernel.mutation_count(), before);
        assert!(mgr.table().has_chain(DEFAULT_CHAIN));
        assert!(mgr.table().has_rule("FORWARD", "-j l3gw-FORWARD"));

        // Replaying the subnet issues nothing new.
        mgr.subnet_drop_all(&net("10.0.0.0/24")).await.unwrap();
        assert_eq!(kernel.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let kernel = Arc::new(FakeIptables::new());
        let mut mgr = manager(&kernel);
        mgr.subnet_drop_all(&net("10.0.0.0/24")).await.unwrap();
        mgr.inter_subnet_accept(&net("10.0.0.0/24"), &net("10.0.1.0/24"))
            .await
            .unwrap();

        mgr.clear_all().await.unwrap();

        assert!(!kernel.has_chain(DEFAULT_CHAIN));
        assert!(kernel.rules("FORWARD").is_empty());
    }
}
