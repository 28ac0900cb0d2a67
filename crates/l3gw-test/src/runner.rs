//! Command runners for adapter tests.

use async_trait::async_trait;
use l3gw_common::{CommandRunner, ExecResult, L3Result};
use parking_lot::Mutex;

/// Canned response for commands containing `pattern`.
#[derive(Debug, Clone)]
struct Canned {
    pattern: String,
    result: ExecResult,
}

fn canned_for(canned: &[Canned], cmd: &str) -> Option<ExecResult> {
    canned
        .iter()
        .rev()
        .find(|c| cmd.contains(&c.pattern))
        .map(|c| c.result.clone())
}

/// Records every command and answers with exit code 0 unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    canned: Mutex<Vec<Canned>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` fail with `exit_code` and `stderr`.
    pub fn fail_matching(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.canned.lock().push(Canned {
            pattern: pattern.to_string(),
            result: ExecResult::failed(exit_code, stderr),
        });
    }

    /// Commands containing `pattern` succeed printing `stdout`.
    pub fn respond_matching(&self, pattern: &str, stdout: &str) {
        self.canned.lock().push(Canned {
            pattern: pattern.to_string(),
            result: ExecResult::ok(stdout),
        });
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &str) -> L3Result<ExecResult> {
        self.commands.lock().push(cmd.to_string());
        Ok(canned_for(&self.canned.lock(), cmd).unwrap_or_else(|| ExecResult::ok("")))
    }
}

const BUILTIN_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];
const BUILTIN_TARGETS: [&str; 6] = ["ACCEPT", "DROP", "RETURN", "REJECT", "LOG", "MASQUERADE"];

const NO_SUCH_CHAIN: &str = "iptables: No chain/target/match by that name.";
const CHAIN_EXISTS: &str = "iptables: Chain already exists.";
const BAD_RULE: &str = "iptables: Bad rule (does a matching rule exist in that chain?).";
const CHAIN_NOT_EMPTY: &str = "iptables: Directory not empty.";
const CHAIN_IN_USE: &str = "iptables: Too many links.";
const BUILTIN_IMMUTABLE: &str = "iptables: Invalid argument.";
const BAD_INDEX: &str = "iptables: Index of insertion too big.";

#[derive(Debug)]
struct Chain {
    name: String,
    rules: Vec<String>,
}

#[derive(Debug)]
struct Kernel {
    chains: Vec<Chain>,
    commands: Vec<String>,
    canned: Vec<Canned>,
}

impl Kernel {
    fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|c| c.name == name)
    }

    fn is_referenced(&self, name: &str) -> bool {
        self.chains
            .iter()
            .flat_map(|c| c.rules.iter())
            .any(|rule| jump_target(rule) == Some(name))
    }

    fn check_jump(&self, rule: &str) -> Result<(), ExecResult> {
        match jump_target(rule) {
            Some(target)
                if !BUILTIN_TARGETS.contains(&target) && self.chain(target).is_none() =>
            {
                Err(ExecResult::failed(2, format!(
                    "iptables v1.8.7 (legacy): Couldn't load target `{}':No such file or directory",
                    target
                )))
            }
            _ => Ok(()),
        }
    }

    fn dump(&self) -> String {
        let mut lines = Vec::new();
        for chain in &self.chains {
            if BUILTIN_CHAINS.contains(&chain.name.as_str()) {
                lines.push(format!("-P {} ACCEPT", chain.name));
            }
        }
        for chain in &self.chains {
            if !BUILTIN_CHAINS.contains(&chain.name.as_str()) {
                lines.push(format!("-N {}", chain.name));
            }
        }
        for chain in &self.chains {
            for rule in &chain.rules {
                lines.push(format!("-A {} {}", chain.name, rule));
            }
        }
        lines.join("\n")
    }

    fn apply(&mut self, args: &[&str]) -> ExecResult {
        let no_chain = || ExecResult::failed(1, NO_SUCH_CHAIN);
        match args {
            ["-S"] => ExecResult::ok(self.dump()),
            ["-n", "--list", name] | ["-L", name] | ["-L", name, "-n"] => match self.chain(name) {
                Some(chain) => ExecResult::ok(format!(
                    "Chain {} ({} references)\ntarget     prot opt source               destination",
                    chain.name,
                    usize::from(self.is_referenced(name))
                )),
                None => no_chain(),
            },
            ["-N", name] => {
                if self.chain(name).is_some() {
                    return ExecResult::failed(1, CHAIN_EXISTS);
                }
                self.chains.push(Chain {
                    name: name.to_string(),
                    rules: Vec::new(),
                });
                ExecResult::ok("")
            }
            ["-X", name] => {
                if BUILTIN_CHAINS.contains(name) {
                    return ExecResult::failed(1, BUILTIN_IMMUTABLE);
                }
                let Some(chain) = self.chain(name) else {
                    return no_chain();
                };
                if !chain.rules.is_empty() {
                    return ExecResult::failed(1, CHAIN_NOT_EMPTY);
                }
                if self.is_referenced(name) {
                    return ExecResult::failed(1, CHAIN_IN_USE);
                }
                self.chains.retain(|c| c.name != *name);
                ExecResult::ok("")
            }
            ["-A", name, rule @ ..] => {
                let rule = rule.join(" ");
                if let Err(e) = self.check_jump(&rule) {
                    return e;
                }
                match self.chain_mut(name) {
                    Some(chain) => {
                        chain.rules.push(rule);
                        ExecResult::ok("")
                    }
                    None => no_chain(),
                }
            }
            ["-I", name, position, rule @ ..] => {
                let Ok(position) = position.parse::<usize>() else {
                    return ExecResult::failed(2, format!("iptables: Bad argument `{}'", position));
                };
                let rule = rule.join(" ");
                if let Err(e) = self.check_jump(&rule) {
                    return e;
                }
                let Some(chain) = self.chain_mut(name) else {
                    return no_chain();
                };
                if position == 0 || position > chain.rules.len() + 1 {
                    return ExecResult::failed(1, BAD_INDEX);
                }
                chain.rules.insert(position - 1, rule);
                ExecResult::ok("")
            }
            ["-D", name, rule @ ..] => {
                let rule = rule.join(" ");
                let Some(chain) = self.chain_mut(name) else {
                    return no_chain();
                };
                match chain.rules.iter().position(|r| *r == rule) {
                    Some(index) => {
                        chain.rules.remove(index);
                        ExecResult::ok("")
                    }
                    None => ExecResult::failed(1, BAD_RULE),
                }
            }
            _ => ExecResult::failed(2, format!("iptables: unsupported arguments {:?}", args)),
        }
    }
}

fn jump_target(rule: &str) -> Option<&str> {
    let mut tokens = rule.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-j" {
            return tokens.next();
        }
    }
    None
}

fn is_mutation(cmd: &str) -> bool {
    [" -N ", " -X ", " -A ", " -I ", " -D "]
        .iter()
        .any(|op| cmd.contains(op))
}

/// In-memory filter table that answers iptables commands the way the
/// kernel does, including its error messages.
///
/// Only the `filter` table is simulated. Rules are stored with collapsed
/// whitespace, which is also how `-S` prints them.
#[derive(Debug)]
pub struct FakeIptables {
    kernel: Mutex<Kernel>,
}

impl Default for FakeIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIptables {
    /// A kernel with empty built-in chains.
    pub fn new() -> Self {
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|name| Chain {
                name: name.to_string(),
                rules: Vec::new(),
            })
            .collect();
        Self {
            kernel: Mutex::new(Kernel {
                chains,
                commands: Vec::new(),
                canned: Vec::new(),
            }),
        }
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.kernel.lock().chain(chain).is_some()
    }

    /// Rules of `chain` in kernel order; empty if the chain is missing.
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.kernel
            .lock()
            .chain(chain)
            .map(|c| c.rules.clone())
            .unwrap_or_default()
    }

    /// Appends a rule installed by someone else, without recording a command.
    pub fn append_foreign(&self, chain: &str, rule: &str) {
        let rule = rule.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut kernel = self.kernel.lock();
        match kernel.chain_mut(chain) {
            Some(c) => c.rules.push(rule),
            None => kernel.chains.push(Chain {
                name: chain.to_string(),
                rules: vec![rule],
            }),
        }
    }

    /// Commands containing `pattern` fail without touching the table.
    pub fn fail_matching(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.kernel.lock().canned.push(Canned {
            pattern: pattern.to_string(),
            result: ExecResult::failed(exit_code, stderr),
        });
    }

    /// Clears injected failures.
    pub fn heal(&self) {
        self.kernel.lock().canned.clear();
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.kernel.lock().commands.clone()
    }

    /// Commands that create, delete or modify chains and rules.
    pub fn mutation_commands(&self) -> Vec<String> {
        self.kernel
            .lock()
            .commands
            .iter()
            .filter(|cmd| is_mutation(cmd))
            .cloned()
            .collect()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutation_commands().len()
    }
}

#[async_trait]
impl CommandRunner for FakeIptables {
    async fn run(&self, cmd: &str) -> L3Result<ExecResult> {
        let mut kernel = self.kernel.lock();
        kernel.commands.push(cmd.to_string());
        if let Some(result) = canned_for(&kernel.canned, cmd) {
            return Ok(result);
        }

        let tokens: Vec<&str> = cmd.split_whitespace().skip(1).collect();
        let args = match tokens.as_slice() {
            ["-t", "filter", rest @ ..] => rest,
            ["-t", table, ..] => {
                return Ok(ExecResult::failed(
                    3,
                    format!("iptables: table `{}' is not simulated", table),
                ))
            }
            rest => rest,
        };
        let result = kernel.apply(args);
        if !result.success() {
            tracing::debug!(command = %cmd, stderr = %result.stderr, "Simulated iptables failure");
        }
        Ok(result)
    }
}
