//! In-memory mirror of the kernel filter table.
//!
//! Only chains and rules this process created (or adopted on restore) are
//! tracked. Adds are idempotent on the normalized rule text; removes are
//! best-effort.

use std::collections::HashSet;
use std::sync::Arc;

use l3gw_common::{CommandRunner, L3Result};
use tracing::{debug, instrument, warn};

use crate::commands::*;

/// Where a new rule goes in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePosition {
    /// Inserted at position 1, ahead of existing rules.
    Head,
    /// Appended after existing rules.
    Tail,
}

/// A tracked rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IptablesRule {
    pub chain: String,
    /// Whitespace-normalized rule text.
    pub rule: String,
}

impl IptablesRule {
    pub fn new(chain: &str, rule: &str) -> Self {
        Self {
            chain: chain.to_string(),
            rule: normalize_rule(rule),
        }
    }
}

/// The filter table as this process knows it.
pub struct IptablesTable {
    runner: Arc<dyn CommandRunner>,
    iptables_cmd: String,
    chains: HashSet<String>,
    rules: Vec<IptablesRule>,
}

impl IptablesTable {
    pub fn new(runner: Arc<dyn CommandRunner>, iptables_cmd: impl Into<String>) -> Self {
        Self {
            runner,
            iptables_cmd: iptables_cmd.into(),
            chains: HashSet::new(),
            rules: Vec::new(),
        }
    }

    /// Path of the iptables binary commands are built with.
    pub fn iptables_cmd(&self) -> &str {
        &self.iptables_cmd
    }

    /// Creates `chain` unless it is already tracked.
    #[instrument(skip(self))]
    pub async fn add_chain(&mut self, chain: &str) -> L3Result<()> {
        if self.chains.contains(chain) {
            return Ok(());
        }
        let cmd = build_new_chain_cmd(&self.iptables_cmd, chain);
        self.runner.run_or_throw(&cmd).await?;
        self.chains.insert(chain.to_string());
        debug!("Created chain {}", chain);
        Ok(())
    }

    /// Adds `rule` to `chain` unless an equal rule is tracked.
    ///
    /// Returns true if a device command was issued.
    #[instrument(skip(self))]
    pub async fn add_rule(
        &mut self,
        chain: &str,
        rule: &str,
        position: RulePosition,
    ) -> L3Result<bool> {
        let tracked = IptablesRule::new(chain, rule);
        if self.rules.contains(&tracked) {
            debug!("Rule already present in {}: {}", chain, tracked.rule);
            return Ok(false);
        }
        let cmd = match position {
            RulePosition::Head => build_insert_rule_cmd(&self.iptables_cmd, chain, 1, &tracked.rule),
            RulePosition::Tail => build_append_rule_cmd(&self.iptables_cmd, chain, &tracked.rule),
        };
        self.runner.run_or_throw(&cmd).await?;
        self.rules.push(tracked);
        Ok(true)
    }

    /// Removes `rule` from `chain`.
    ///
    /// An untracked rule is skipped and a failing delete is logged; in both
    /// cases the rule is no longer tracked afterwards. Returns true if the
    /// device confirmed the removal.
    #[instrument(skip(self))]
    pub async fn remove_rule(&mut self, chain: &str, rule: &str) -> L3Result<bool> {
        let tracked = IptablesRule::new(chain, rule);
        let Some(pos) = self.rules.iter().position(|r| r == &tracked) else {
            warn!("Failed to remove rule: {} from chain: {} (not tracked)", tracked.rule, chain);
            return Ok(false);
        };
        self.rules.remove(pos);

        let cmd = build_delete_rule_cmd(&self.iptables_cmd, chain, &tracked.rule);
        let result = self.runner.run(&cmd).await?;
        if !result.success() {
            warn!(
                command = %cmd,
                output = %result.combined_output(),
                "Rule removal failed, treating rule as absent"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Deletes every tracked rule of `chain`, the jump into it from
    /// `parent`, and the chain itself. Individual failures are logged.
    #[instrument(skip(self))]
    pub async fn remove_chain(&mut self, chain: &str, parent: &str) -> L3Result<()> {
        let own: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.chain == chain)
            .map(|r| r.rule.clone())
            .collect();
        for rule in own {
            self.remove_rule(chain, &rule).await?;
        }
        self.remove_rule(parent, &jump_rule(chain)).await?;

        if self.chains.remove(chain) {
            let cmd = build_delete_chain_cmd(&self.iptables_cmd, chain);
            let result = self.runner.run(&cmd).await?;
            if !result.success() {
                warn!(command = %cmd, output = %result.combined_output(), "Chain removal failed");
            }
        }
        Ok(())
    }

    /// Tracks a chain found on the device without issuing commands.
    pub fn adopt_chain(&mut self, chain: &str) {
        self.chains.insert(chain.to_string());
    }

    /// Tracks a rule found on the device without issuing commands.
    pub fn adopt_rule(&mut self, chain: &str, rule: &str) {
        let tracked = IptablesRule::new(chain, rule);
        if !self.rules.contains(&tracked) {
            self.rules.push(tracked);
        }
    }

    /// Forgets all tracked state.
    pub fn clear_tracking(&mut self) {
        self.chains.clear();
        self.rules.clear();
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.chains.contains(chain)
    }

    pub fn has_rule(&self, chain: &str, rule: &str) -> bool {
        self.rules.contains(&IptablesRule::new(chain, rule))
    }

    /// Tracked rules of `chain`, in tracking order.
    pub fn rules_in(&self, chain: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.chain == chain)
            .map(|r| r.rule.as_str())
            .collect()
    }

    /// Runs a read-only command and returns its stdout.
    pub(crate) async fn query(&self, cmd: &str) -> L3Result<String> {
        self.runner.run_or_throw(cmd).await
    }

    /// Runs a command and reports whether it exited zero.
    pub(crate) async fn probe(&self, cmd: &str) -> L3Result<bool> {
        Ok(self.runner.run(cmd).await?.success())
    }
}
