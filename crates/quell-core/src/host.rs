//! External host collaborators.
//!
//! The configuration groups this system overrides are owned by the host
//! application; quell only ever sees them through the [`Host`] trait. The
//! live group list is enumerated fresh at the start of every pass and
//! never cached across passes, because the set can change between calls.
//! Values arrive as duck-typed JSON on purpose: nothing from a host blob
//! is trusted until it passes through [`crate::validate`].

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Name of the quota field inside each group object of the file-backed
/// host document.
pub const QUOTA_FIELD: &str = "new_per_day";

/// Error from a host enumeration or mutation call.
#[derive(Error, Debug)]
pub enum HostError {
    /// The named group does not exist in the host's data.
    #[error("group {group_id} not found")]
    GroupNotFound {
        /// Identifier the caller asked for
        group_id: String,
    },

    /// Underlying I/O failure while talking to the host.
    #[error("host I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The host's data did not have the expected shape.
    #[error("host document malformed: {0}")]
    Malformed(String),

    /// Any other host-side failure.
    #[error("host failure: {0}")]
    Failure(String),
}

/// One externally-owned configuration group as enumerated by the host.
#[derive(Debug, Clone)]
pub struct LiveGroup {
    /// Opaque, string-comparable identifier.
    pub group_id: String,
    /// Raw quota value exactly as the host stores it. Unvalidated.
    pub current_value: Value,
}

/// Host-side enumeration and mutation of configuration groups.
///
/// Implementations are expected to mark mutations for the host's own
/// external synchronization; quell neither triggers nor waits for it.
pub trait Host {
    /// Enumerate all groups with their current quota values.
    fn list_groups(&self) -> Result<Vec<LiveGroup>, HostError>;

    /// Read one group's current quota value.
    fn get_value(&self, group_id: &str) -> Result<Value, HostError>;

    /// Write one group's quota value.
    fn set_value(&mut self, group_id: &str, value: u32) -> Result<(), HostError>;
}

/// File-backed host: a JSON document mapping group ids to configuration
/// objects, each carrying a [`QUOTA_FIELD`] entry among whatever else the
/// host keeps there. Used by the CLI and tests; a real embedding
/// implements [`Host`] against the application's own APIs instead.
///
/// The document is re-read on every call so that concurrent edits by the
/// host are observed, and rewritten atomically (temp file and rename) so
/// a torn write can never corrupt it.
#[derive(Debug, Clone)]
pub struct JsonFileHost {
    path: PathBuf,
}

impl JsonFileHost {
    /// Create a host over the given document path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_doc(&self) -> Result<serde_json::Map<String, Value>, HostError> {
        let bytes = std::fs::read(&self.path)?;
        let doc: Value = serde_json::from_slice(&bytes)
            .map_err(|err| HostError::Malformed(err.to_string()))?;
        match doc {
            Value::Object(map) => Ok(map),
            _ => Err(HostError::Malformed(
                "expected a top-level object of groups".to_string(),
            )),
        }
    }

    fn write_doc(&self, doc: &serde_json::Map<String, Value>) -> Result<(), HostError> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|err| HostError::Malformed(err.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Host for JsonFileHost {
    fn list_groups(&self) -> Result<Vec<LiveGroup>, HostError> {
        let doc = self.read_doc()?;
        Ok(doc
            .iter()
            .map(|(group_id, config)| LiveGroup {
                group_id: group_id.clone(),
                current_value: config.get(QUOTA_FIELD).cloned().unwrap_or(Value::Null),
            })
            .collect())
    }

    fn get_value(&self, group_id: &str) -> Result<Value, HostError> {
        let doc = self.read_doc()?;
        let config = doc.get(group_id).ok_or_else(|| HostError::GroupNotFound {
            group_id: group_id.to_string(),
        })?;
        Ok(config.get(QUOTA_FIELD).cloned().unwrap_or(Value::Null))
    }

    fn set_value(&mut self, group_id: &str, value: u32) -> Result<(), HostError> {
        let mut doc = self.read_doc()?;
        let config = doc
            .get_mut(group_id)
            .ok_or_else(|| HostError::GroupNotFound {
                group_id: group_id.to_string(),
            })?;
        let Value::Object(fields) = config else {
            return Err(HostError::Malformed(format!(
                "group {group_id} is not an object"
            )));
        };
        fields.insert(QUOTA_FIELD.to_string(), Value::from(value));
        self.write_doc(&doc)
    }
}
