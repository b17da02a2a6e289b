//! Per-group failure aggregation.
//!
//! One bad group must never abort processing of the rest, so every
//! per-group operation reports into an [`ErrorReporter`] and a pass always
//! completes with a [`Summary`] instead of raising. No error here is ever
//! converted into a mutation of a different group's data.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::record::Mode;

/// A failure scoped to a single group within one reconciliation pass.
#[derive(Error, Debug, Clone)]
pub enum GroupError {
    /// A field failed validation. Local to the group, non-fatal to the pass.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The primary backend failed for this group. The group is skipped for
    /// this pass and retried on the next one.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A host enumeration or mutation call failed.
    #[error("host API error: {0}")]
    HostApi(String),

    /// The override sentinel was observed with no stored record and no way
    /// to infer the original. Needs manual intervention; never silently
    /// "fixed" with a guessed value.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl GroupError {
    /// The serializable failure classification.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::BackendUnavailable(_) => FailureKind::BackendUnavailable,
            Self::HostApi(_) => FailureKind::HostApi,
            Self::Unrecoverable(_) => FailureKind::Unrecoverable,
        }
    }
}

/// Failure classification carried in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    BackendUnavailable,
    HostApi,
    Unrecoverable,
}

/// One group's failure, as carried in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    /// Group the failure is scoped to
    pub group_id: String,
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

/// Collects per-group outcomes during one reconciliation pass.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    succeeded: Vec<String>,
    skipped: Vec<String>,
    deferred: Vec<String>,
    failed: Vec<GroupFailure>,
    unrecoverable: Vec<String>,
    notes: Vec<String>,
    drift_detected: bool,
}

impl ErrorReporter {
    /// Create an empty reporter for one pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The group was mutated (or restored) as requested.
    pub fn success(&mut self, group_id: &str) {
        self.succeeded.push(group_id.to_string());
    }

    /// Nothing to do for the group this pass.
    pub fn skip(&mut self, group_id: &str) {
        self.skipped.push(group_id.to_string());
    }

    /// Capture was deferred; the group stays uncaptured until its live
    /// value can be trusted.
    pub fn defer(&mut self, group_id: &str) {
        self.deferred.push(group_id.to_string());
    }

    /// The group failed; the rest of the batch proceeds.
    pub fn fail(&mut self, group_id: &str, error: &GroupError) {
        warn!(group_id, error = %error, "group failed");
        if matches!(error, GroupError::Unrecoverable(_)) {
            self.unrecoverable.push(group_id.to_string());
        }
        self.failed.push(GroupFailure {
            group_id: group_id.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Record a noteworthy non-fatal event (clamped value, soft backup
    /// failure, dropped invalid entry).
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(detail = %message, "noteworthy");
        self.notes.push(message);
    }

    /// Live observation contradicted the caller's last-known-mode hint.
    /// Live state wins; this only flags the divergence.
    pub fn drift(&mut self, observed: Mode, hinted: Mode) {
        warn!(%observed, %hinted, "mode drift; live observation wins");
        self.drift_detected = true;
        self.notes
            .push(format!("mode drift: hint said {hinted}, live state shows {observed}"));
    }

    /// Finish the pass and produce its summary.
    #[must_use]
    pub fn finish(self) -> Summary {
        Summary {
            succeeded: self.succeeded,
            skipped: self.skipped,
            deferred: self.deferred,
            failed: self.failed,
            unrecoverable: self.unrecoverable,
            notes: self.notes,
            drift_detected: self.drift_detected,
        }
    }
}

/// Outcome of one reconciliation pass. The pass always completes and
/// returns this; it never raises a pass-level error.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Groups mutated or restored as requested
    pub succeeded: Vec<String>,
    /// Groups with nothing to do this pass
    pub skipped: Vec<String>,
    /// Groups whose capture was deferred (live value not yet trustworthy)
    pub deferred: Vec<String>,
    /// Per-group failures (includes unrecoverable groups)
    pub failed: Vec<GroupFailure>,
    /// Groups needing manual intervention; surface these prominently
    pub unrecoverable: Vec<String>,
    /// Noteworthy non-fatal events
    pub notes: Vec<String>,
    /// Whether live state contradicted the last-known-mode hint
    pub drift_detected: bool,
}

impl Summary {
    /// Whether the pass completed with no failures at all.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unrecoverable.is_empty()
    }
}
