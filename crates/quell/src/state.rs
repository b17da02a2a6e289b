//! Persisted pass-to-pass state.
//!
//! The engine needs two things to survive between short-lived CLI
//! invocations: the last applied mode (fed back as the reconcile hint)
//! and the zero-watch set. Both live in one small JSON file next to the
//! backup map, written atomically.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use quell_core::Mode;
use serde::{Deserialize, Serialize};

/// State carried between reconciliation passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliState {
    /// Mode the last completed pass applied.
    pub last_applied_mode: Option<Mode>,

    /// Groups observed at the override sentinel with no record while
    /// inactive; see the engine's zero-watch semantics.
    pub zero_watch: BTreeSet<String>,
}

impl CliState {
    /// Load state from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("reading state {}", path.display()))?;
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("parsing state {}", path.display()))
    }

    /// Write state to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(self).context("serializing state")?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("writing state {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replacing state {}", path.display()))?;
        Ok(())
    }
}
