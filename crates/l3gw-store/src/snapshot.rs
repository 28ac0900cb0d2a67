//! On-disk JSON snapshot of the model tables.

use std::fs;
use std::path::Path;

use l3gw_common::{L3Error, L3Result, Route, RouteTable, Subnet, Target};
use serde::{Deserialize, Serialize};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// All model rows, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub routetables: Vec<RouteTable>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    tables: Tables,
}

/// Writes `tables` to `path` through a sibling temp file and rename, so a
/// crash never leaves a truncated snapshot behind.
pub fn save(path: &Path, tables: &Tables) -> L3Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        tables: tables.clone(),
    };
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| L3Error::serialization(format!("Failed to encode snapshot: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a snapshot; a missing file yields empty tables.
pub fn load(path: &Path) -> L3Result<Tables> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No model snapshot found, starting empty");
            return Ok(Tables::default());
        }
        Err(e) => return Err(e.into()),
    };

    let snapshot: Snapshot = serde_json::from_str(&json).map_err(|e| {
        L3Error::serialization(format!(
            "Failed to decode snapshot {}: {}",
            path.display(),
            e
        ))
    })?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(L3Error::serialization(format!(
            "Unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }
    Ok(snapshot.tables)
}
