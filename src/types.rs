use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What to do when a chain is submitted under a name that is already in use.
///
/// - `Replace`: cancel whatever is active under the name, then start the new
///   chain.
/// - `Keep`: leave an active chain alone and drop the new one.
/// - `Append`: start the new chain once the active one has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingWorkPolicy {
    Replace,
    Keep,
    Append,
}

impl Default for ExistingWorkPolicy {
    fn default() -> Self {
        ExistingWorkPolicy::Replace
    }
}

impl FromStr for ExistingWorkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(ExistingWorkPolicy::Replace),
            "keep" => Ok(ExistingWorkPolicy::Keep),
            "append" => Ok(ExistingWorkPolicy::Append),
            other => Err(format!(
                "invalid policy: {other} (expected \"replace\", \"keep\" or \"append\")"
            )),
        }
    }
}

impl fmt::Display for ExistingWorkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExistingWorkPolicy::Replace => "replace",
            ExistingWorkPolicy::Keep => "keep",
            ExistingWorkPolicy::Append => "append",
        };
        f.write_str(s)
    }
}

/// Where chain state is kept between process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Keep chain state in memory only (lost on restart).
    Memory,
    /// Write chain state as JSON under the configured state directory.
    File,
}

impl Default for PersistenceMode {
    fn default() -> Self {
        PersistenceMode::Memory
    }
}
