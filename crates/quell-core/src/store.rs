//! Redundant original-value persistence.
//!
//! Two ordered storage backends hold the same logical map of group id to
//! serialized [`OriginalRecord`]. Primary is authoritative and assumed to
//! ride the host's own cross-device synchronization; Backup is local-only,
//! lower trust, consulted for a key only when Primary is absent,
//! unreadable, or fails validation for that key. Every write is a
//! whole-map rewrite so a torn single-key patch can never corrupt the
//! serialized form.
//!
//! Failure semantics: a Primary write failure is the only failure that
//! propagates to the caller, and it is fatal only for the affected group.
//! Backup failures are soft (logged and noted, never raised). Invalid
//! entries encountered on read are dropped from the in-memory view and
//! reported; the backend itself is never rewritten during a read, so
//! self-healing happens only through the next successful [`RedundantStore::put`].

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::OriginalRecord;
use crate::report::ErrorReporter;
use crate::validate::{self, QuotaCheck};

/// Result alias for single-backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Error from a single storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// I/O failure
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Database failure
    #[error("database failure: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization failure
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    /// Anything else (injected failures, embedder-specific transports)
    #[error("{0}")]
    Other(String),
}

/// Store-level errors, distinct from backend transport errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record failed boundary validation; nothing was written.
    #[error("invalid record for group {group_id}: {reason}")]
    InvalidRecord {
        /// Group the rejected record was keyed by
        group_id: String,
        /// What the validation found
        reason: String,
    },

    /// The primary backend could not be read or written during a mutation.
    /// Fatal for the affected group only; retried next pass.
    #[error("primary backend unavailable: {source}")]
    PrimaryUnavailable {
        /// Underlying backend failure
        #[source]
        source: BackendError,
    },
}

/// Position of a backend in the redundancy order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    /// Authoritative, host-synced.
    Primary,
    /// Local-only fallback.
    Backup,
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        })
    }
}

/// A single persistence location for the original-value map.
///
/// The map value is the opaque serialized form of an [`OriginalRecord`];
/// backends move bytes and never interpret them. An absent store reads as
/// an empty map.
pub trait StoreBackend {
    /// Read the entire stored map.
    fn read_all(&self) -> BackendResult<BTreeMap<String, Vec<u8>>>;

    /// Replace the entire stored map.
    fn write_all(&mut self, map: &BTreeMap<String, Vec<u8>>) -> BackendResult<()>;
}

/// Durable, redundant key-value persistence of original-value records,
/// with validation on every read and write boundary.
pub struct RedundantStore {
    primary: Box<dyn StoreBackend>,
    backup: Box<dyn StoreBackend>,
}

impl RedundantStore {
    /// Build a store over an ordered pair of backends.
    #[must_use]
    pub fn new(primary: Box<dyn StoreBackend>, backup: Box<dyn StoreBackend>) -> Self {
        Self { primary, backup }
    }

    /// Persist a record for a group.
    ///
    /// Both fields are validated first; on validation failure nothing is
    /// written. The record goes to Primary, then independently to Backup.
    /// A Backup failure is noted but does not fail the call.
    pub fn put(
        &mut self,
        group_id: &str,
        record: &OriginalRecord,
        reporter: &mut ErrorReporter,
    ) -> Result<(), StoreError> {
        if !validate::valid_group_id(group_id) {
            return Err(StoreError::InvalidRecord {
                group_id: group_id.to_string(),
                reason: "empty group id".to_string(),
            });
        }
        if validate::validate_quota(Some(&Value::from(record.value))).value()
            != Some(record.value)
        {
            return Err(StoreError::InvalidRecord {
                group_id: group_id.to_string(),
                reason: format!("quota {} out of range", record.value),
            });
        }
        let bytes = record.to_bytes().map_err(|err| StoreError::InvalidRecord {
            group_id: group_id.to_string(),
            reason: err.to_string(),
        })?;

        let mut primary_map = self
            .primary
            .read_all()
            .map_err(|source| StoreError::PrimaryUnavailable { source })?;
        primary_map.insert(group_id.to_string(), bytes.clone());
        self.primary
            .write_all(&primary_map)
            .map_err(|source| StoreError::PrimaryUnavailable { source })?;
        debug!(group_id, value = record.value, "record written to primary");

        let backup_result = match self.backup.read_all() {
            Ok(mut map) => {
                map.insert(group_id.to_string(), bytes);
                self.backup.write_all(&map)
            }
            Err(err) => Err(err),
        };
        if let Err(err) = backup_result {
            warn!(group_id, error = %err, "backup write failed; primary remains authoritative");
            reporter.note(format!("group {group_id}: backup write failed: {err}"));
        }
        Ok(())
    }

    /// Fetch the record for a group: Primary first, Backup only if Primary
    /// is absent, unreadable, or invalid for this key. Returns `None` when
    /// neither yields a valid record.
    pub fn get(&self, group_id: &str, reporter: &mut ErrorReporter) -> Option<OriginalRecord> {
        for role in [BackendRole::Primary, BackendRole::Backup] {
            if let Some(record) = self.read_one(role, group_id, reporter) {
                return Some(record);
            }
        }
        None
    }

    /// Remove a group's record from both backends, independently. A Backup
    /// failure is noted but non-fatal.
    pub fn delete(
        &mut self,
        group_id: &str,
        reporter: &mut ErrorReporter,
    ) -> Result<(), StoreError> {
        let mut primary_map = self
            .primary
            .read_all()
            .map_err(|source| StoreError::PrimaryUnavailable { source })?;
        if primary_map.remove(group_id).is_some() {
            self.primary
                .write_all(&primary_map)
                .map_err(|source| StoreError::PrimaryUnavailable { source })?;
        }

        let backup_result = match self.backup.read_all() {
            Ok(mut map) => {
                if map.remove(group_id).is_some() {
                    self.backup.write_all(&map)
                } else {
                    Ok(())
                }
            }
            Err(err) => Err(err),
        };
        if let Err(err) = backup_result {
            warn!(group_id, error = %err, "backup delete failed");
            reporter.note(format!("group {group_id}: backup delete failed: {err}"));
        }
        Ok(())
    }

    /// A restore completed: the record has served its purpose and must not
    /// leak into a future, unrelated override episode.
    pub fn invalidate(
        &mut self,
        group_id: &str,
        reporter: &mut ErrorReporter,
    ) -> Result<(), StoreError> {
        debug!(group_id, "invalidating record after restore");
        self.delete(group_id, reporter)
    }

    /// Merged valid view of both backends, Primary taking precedence.
    /// Used for status reporting and previous-mode inference; never
    /// written back.
    pub fn snapshot(&self, reporter: &mut ErrorReporter) -> BTreeMap<String, OriginalRecord> {
        let mut view = BTreeMap::new();
        for role in [BackendRole::Backup, BackendRole::Primary] {
            match self.backend(role).read_all() {
                Ok(map) => {
                    for (group_id, bytes) in &map {
                        if let Some(record) = Self::decode(role, group_id, bytes, reporter) {
                            view.insert(group_id.clone(), record);
                        }
                    }
                }
                Err(err) => {
                    reporter.note(format!("{role} backend read failed: {err}"));
                }
            }
        }
        view
    }

    fn backend(&self, role: BackendRole) -> &dyn StoreBackend {
        match role {
            BackendRole::Primary => self.primary.as_ref(),
            BackendRole::Backup => self.backup.as_ref(),
        }
    }

    fn read_one(
        &self,
        role: BackendRole,
        group_id: &str,
        reporter: &mut ErrorReporter,
    ) -> Option<OriginalRecord> {
        let map = match self.backend(role).read_all() {
            Ok(map) => map,
            Err(err) => {
                warn!(%role, error = %err, "backend read failed");
                reporter.note(format!("{role} backend read failed: {err}"));
                return None;
            }
        };
        let bytes = map.get(group_id)?;
        Self::decode(role, group_id, bytes, reporter)
    }

    /// Decode and validate one stored entry. Invalid entries are dropped
    /// from the view (treated as absent) and noted; a stored value that
    /// merely needs clamping is recovered.
    fn decode(
        role: BackendRole,
        group_id: &str,
        bytes: &[u8],
        reporter: &mut ErrorReporter,
    ) -> Option<OriginalRecord> {
        let record = match OriginalRecord::from_bytes(bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(%role, group_id, error = %err, "dropping undecodable record");
                reporter.note(format!(
                    "group {group_id}: undecodable record in {role} backend, treated as absent"
                ));
                return None;
            }
        };
        match validate::validate_quota(Some(&Value::from(record.value))) {
            QuotaCheck::Valid(value) => Some(OriginalRecord {
                value,
                captured_by: record.captured_by,
            }),
            QuotaCheck::Clamped(value) => {
                reporter.note(format!(
                    "group {group_id}: stored quota {} clamped to {value}",
                    record.value
                ));
                Some(OriginalRecord {
                    value,
                    captured_by: record.captured_by,
                })
            }
            QuotaCheck::Invalid | QuotaCheck::Absent => {
                reporter.note(format!(
                    "group {group_id}: invalid stored quota in {role} backend, treated as absent"
                ));
                None
            }
        }
    }
}
