//! iptables command and rule-text builders.
//!
//! Rule texts are written in the same canonical form `iptables -S` prints
//! them, so rules adopted from a listing compare equal to rules we build.

use ipnet::Ipv4Net;

/// Collapses runs of whitespace so rule texts compare structurally.
pub fn normalize_rule(rule: &str) -> String {
    rule.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build chain creation command
pub fn build_new_chain_cmd(iptables: &str, chain: &str) -> String {
    format!("{} -t filter -N {}", iptables, chain)
}

/// Build chain deletion command
pub fn build_delete_chain_cmd(iptables: &str, chain: &str) -> String {
    format!("{} -t filter -X {}", iptables, chain)
}

/// Build append-rule command
pub fn build_append_rule_cmd(iptables: &str, chain: &str, rule: &str) -> String {
    format!("{} -t filter -A {} {}", iptables, chain, rule)
}

/// Build insert-rule command (`position` is 1-based)
pub fn build_insert_rule_cmd(iptables: &str, chain: &str, position: u32, rule: &str) -> String {
    format!("{} -t filter -I {} {} {}", iptables, chain, position, rule)
}

/// Build delete-rule command
pub fn build_delete_rule_cmd(iptables: &str, chain: &str, rule: &str) -> String {
    format!("{} -t filter -D {} {}", iptables, chain, rule)
}

/// Build chain existence probe
///
/// Exits non-zero when the chain does not exist.
pub fn build_list_chain_cmd(iptables: &str, chain: &str) -> String {
    format!("{} -t filter -n --list {}", iptables, chain)
}

/// Build full filter-table dump in `-S` (rule-spec) form
pub fn build_dump_rules_cmd(iptables: &str) -> String {
    format!("{} -t filter -S", iptables)
}

/// Jump from the parent chain into the managed chain
pub fn jump_rule(chain: &str) -> String {
    format!("-j {}", chain)
}

/// Drop everything leaving `cidr` except traffic staying inside it
pub fn drop_all_rule(cidr: &Ipv4Net) -> String {
    format!("-s {0} ! -d {0} -j DROP", cidr)
}

/// Accept egress from `cidr` through the public interface
pub fn public_accept_rule(cidr: &Ipv4Net, public_interface: &str) -> String {
    format!("-s {} -o {} -j ACCEPT", cidr, public_interface)
}

/// Accept forward traffic from `source` to `destination`
pub fn inter_subnet_rule(source: &Ipv4Net, destination: &Ipv4Net) -> String {
    format!("-s {} -d {} -j ACCEPT", source, destination)
}

/// Accept return traffic of connections opened from `source`
pub fn return_traffic_rule(source: &Ipv4Net) -> String {
    format!("-d {} -m state --state RELATED,ESTABLISHED -j ACCEPT", source)
}

/// One line of `iptables -S` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedEntry {
    /// `-P CHAIN POLICY`
    Policy { chain: String },
    /// `-N CHAIN`
    Chain { chain: String },
    /// `-A CHAIN RULE...`
    Rule { chain: String, rule: String },
}

impl ListedEntry {
    /// True if the entry defines, populates, or jumps to `chain`.
    pub fn mentions(&self, chain: &str) -> bool {
        match self {
            ListedEntry::Policy { chain: c } | ListedEntry::Chain { chain: c } => c == chain,
            ListedEntry::Rule { chain: c, rule } => {
                c == chain || rule.split_whitespace().any(|token| token == chain)
            }
        }
    }

    /// The command that undoes this entry, if any.
    pub fn undo_cmd(&self, iptables: &str) -> Option<String> {
        match self {
            ListedEntry::Policy { .. } => None,
            ListedEntry::Chain { chain } => Some(build_delete_chain_cmd(iptables, chain)),
            ListedEntry::Rule { chain, rule } => Some(build_delete_rule_cmd(iptables, chain, rule)),
        }
    }
}

/// Parses `iptables -S` output, skipping lines it does not understand.
pub fn parse_listing(output: &str) -> Vec<ListedEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let op = tokens.next()?;
            let chain = tokens.next()?.to_string();
            let rest = tokens.collect::<Vec<_>>().join(" ");
            match op {
                "-P" => Some(ListedEntry::Policy { chain }),
                "-N" => Some(ListedEntry::Chain { chain }),
                "-A" if !rest.is_empty() => Some(ListedEntry::Rule { chain, rule: rest }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPT: &str = "/sbin/iptables";

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalize_rule() {
        assert_eq!(
            normalize_rule("  -s 10.0.0.0/24\t! -d  10.0.0.0/24 -j DROP "),
            "-s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP"
        );
    }

    #[test]
    fn test_build_rule_cmds() {
        assert_eq!(
            build_insert_rule_cmd(IPT, "FORWARD", 1, "-j l3gw-FORWARD"),
            "/sbin/iptables -t filter -I FORWARD 1 -j l3gw-FORWARD"
        );
        assert_eq!(
            build_append_rule_cmd(IPT, "l3gw-FORWARD", &drop_all_rule(&net("10.0.0.0/24"))),
            "/sbin/iptables -t filter -A l3gw-FORWARD -s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP"
        );
        assert!(build_delete_rule_cmd(IPT, "c", "-j ACCEPT").contains(" -D c -j ACCEPT"));
    }

    #[test]
    fn test_rule_texts() {
        assert_eq!(
            public_accept_rule(&net("10.0.0.0/24"), "eth0"),
            "-s 10.0.0.0/24 -o eth0 -j ACCEPT"
        );
        assert_eq!(
            inter_subnet_rule(&net("10.0.0.0/24"), &net("10.0.1.0/24")),
            "-s 10.0.0.0/24 -d 10.0.1.0/24 -j ACCEPT"
        );
        assert_eq!(
            return_traffic_rule(&net("10.0.0.0/24")),
            "-d 10.0.0.0/24 -m state --state RELATED,ESTABLISHED -j ACCEPT"
        );
    }

    #[test]
    fn test_parse_listing() {
        let output = "-P INPUT ACCEPT\n\
                      -P FORWARD ACCEPT\n\
                      -N l3gw-FORWARD\n\
                      -N l3gw-FORWARD-old\n\
                      -A FORWARD -j l3gw-FORWARD\n\
                      -A l3gw-FORWARD -s 10.0.0.0/24 ! -d 10.0.0.0/24 -j DROP\n\
                      garbage\n";
        let entries = parse_listing(output);
        assert_eq!(entries.len(), 6);

        let mentioning: Vec<_> = entries
            .iter()
            .filter(|e| e.mentions("l3gw-FORWARD"))
            .collect();
        assert_eq!(mentioning.len(), 3);
        assert_eq!(
            mentioning[1],
            &ListedEntry::Rule {
                chain: "FORWARD".into(),
                rule: "-j l3gw-FORWARD".into()
            }
        );
    }

    #[test]
    fn test_undo_cmd() {
        let chain = ListedEntry::Chain {
            chain: "l3gw-FORWARD".into(),
        };
        assert_eq!(
            chain.undo_cmd(IPT).unwrap(),
            "/sbin/iptables -t filter -X l3gw-FORWARD"
        );
        let policy = ListedEntry::Policy {
            chain: "INPUT".into(),
        };
        assert_eq!(policy.undo_cmd(IPT), None);
    }
}
