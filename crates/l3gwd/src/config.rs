//! Configuration file support for l3gwd
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/l3gw/l3gwd.toml

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use l3gw_common::{L3Error, L3Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default configuration path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/l3gw/l3gwd.toml";

/// Chain and interface names that are safe to splice into an iptables
/// command line.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,28}$").expect("Invalid regex pattern"));

static COMMAND_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/?[A-Za-z0-9_./-]+$").expect("Invalid regex pattern"));

/// Which device adapters the reconciler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// iptables chain only.
    PacketFilter,
    /// zebra static routes only.
    DynamicRouting,
    /// Both, packet filter first.
    Gateway,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::PacketFilter => "packet-filter",
            Backend::DynamicRouting => "dynamic-routing",
            Backend::Gateway => "gateway",
        };
        f.write_str(name)
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "packet-filter" => Ok(Backend::PacketFilter),
            "dynamic-routing" => Ok(Backend::DynamicRouting),
            "gateway" => Ok(Backend::Gateway),
            other => Err(format!(
                "unknown backend '{}' (expected packet-filter, dynamic-routing or gateway)",
                other
            )),
        }
    }
}

/// Daemon-wide behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Delete routes together with their table; when false a non-empty
    /// table cannot be deleted.
    #[serde(default = "default_cascade_routetable_delete")]
    pub cascade_routetable_delete: bool,

    /// Interval of the background resync of a dirty projection, 0 disables
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

/// Model store persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot written after each mutation; in-memory only if unset
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Packet-filter adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IptablesConfig {
    #[serde(default = "default_chain")]
    pub chain: String,

    #[serde(default = "default_parent_chain")]
    pub parent_chain: String,

    #[serde(default = "default_public_interface")]
    pub public_interface: String,

    #[serde(default = "default_iptables_cmd")]
    pub iptables_cmd: String,
}

/// Dynamic-routing adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZebraConfig {
    #[serde(default = "default_zebra_host")]
    pub host: String,

    #[serde(default = "default_zebra_port")]
    pub port: u16,

    #[serde(default = "default_zebra_password")]
    pub password: String,

    #[serde(default)]
    pub enable_password: Option<String>,

    /// Connect and per-prompt timeout in seconds
    #[serde(default = "default_zebra_timeout")]
    pub timeout_secs: u64,

    /// Next hop per target tag
    #[serde(default)]
    pub next_hops: HashMap<String, Ipv4Addr>,
}

/// Complete l3gwd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct L3gwConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub iptables: IptablesConfig,

    #[serde(default)]
    pub zebra: ZebraConfig,
}

// Default functions
fn default_backend() -> Backend {
    Backend::PacketFilter
}

fn default_cascade_routetable_delete() -> bool {
    true
}

fn default_resync_interval() -> u64 {
    30
}

fn default_chain() -> String {
    l3gw_iptables::DEFAULT_CHAIN.to_string()
}

fn default_parent_chain() -> String {
    l3gw_iptables::DEFAULT_PARENT_CHAIN.to_string()
}

fn default_public_interface() -> String {
    "eth0".to_string()
}

fn default_iptables_cmd() -> String {
    l3gw_common::shell::IPTABLES_CMD.to_string()
}

fn default_zebra_host() -> String {
    "127.0.0.1".to_string()
}

fn default_zebra_port() -> u16 {
    2601
}

fn default_zebra_password() -> String {
    "zebra".to_string()
}

fn default_zebra_timeout() -> u64 {
    5
}

// Default implementations
impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            cascade_routetable_delete: default_cascade_routetable_delete(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

impl Default for IptablesConfig {
    fn default() -> Self {
        Self {
            chain: default_chain(),
            parent_chain: default_parent_chain(),
            public_interface: default_public_interface(),
            iptables_cmd: default_iptables_cmd(),
        }
    }
}

impl Default for ZebraConfig {
    fn default() -> Self {
        Self {
            host: default_zebra_host(),
            port: default_zebra_port(),
            password: default_zebra_password(),
            enable_password: None,
            timeout_secs: default_zebra_timeout(),
            next_hops: HashMap::new(),
        }
    }
}

impl L3gwConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> L3Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                L3Error::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse config file: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(L3Error::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> L3Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| L3Error::serialization(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// zebra connect and prompt timeout as Duration
    pub fn zebra_timeout(&self) -> Duration {
        Duration::from_secs(self.zebra.timeout_secs)
    }

    /// Resync interval, `None` when disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        match self.daemon.resync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Whether the configured backend drives the packet filter.
    pub fn uses_packet_filter(&self) -> bool {
        matches!(self.daemon.backend, Backend::PacketFilter | Backend::Gateway)
    }

    /// Whether the configured backend drives zebra.
    pub fn uses_zebra(&self) -> bool {
        matches!(self.daemon.backend, Backend::DynamicRouting | Backend::Gateway)
    }

    /// Validate configuration
    pub fn validate(&self) -> L3Result<()> {
        for (field, value) in [
            ("iptables.chain", &self.iptables.chain),
            ("iptables.parent_chain", &self.iptables.parent_chain),
            ("iptables.public_interface", &self.iptables.public_interface),
        ] {
            if !IDENTIFIER_RE.is_match(value) {
                return Err(L3Error::invalid_config(
                    field,
                    format!("'{}' is not a valid iptables name", value),
                ));
            }
        }

        if !COMMAND_PATH_RE.is_match(&self.iptables.iptables_cmd) {
            return Err(L3Error::invalid_config(
                "iptables.iptables_cmd",
                format!("'{}' is not a plain command path", self.iptables.iptables_cmd),
            ));
        }

        if self.zebra.port == 0 {
            return Err(L3Error::invalid_config("zebra.port", "must be > 0"));
        }

        if self.zebra.timeout_secs == 0 {
            return Err(L3Error::invalid_config("zebra.timeout_secs", "must be > 0"));
        }

        if self.uses_zebra() && self.zebra.host.trim().is_empty() {
            return Err(L3Error::invalid_config("zebra.host", "must not be empty"));
        }

        if let Some(tag) = self
            .zebra
            .next_hops
            .keys()
            .find(|tag| tag.is_empty() || **tag != tag.to_lowercase())
        {
            return Err(L3Error::invalid_config(
                "zebra.next_hops",
                format!("target tag '{}' must be non-empty lowercase", tag),
            ));
        }

        Ok(())
    }
}
