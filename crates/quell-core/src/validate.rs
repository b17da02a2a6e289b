//! Quota and group-id validation.
//!
//! Host configuration blobs are duck-typed JSON, so every value crossing
//! into the core goes through these checks. They are pure and total: no
//! error signal, only an outcome the caller branches on. Absence, wrong
//! type, and recoverable out-of-range values are distinct outcomes because
//! they demand different handling (absence is not invalidity, and a
//! clamped value is usable but noteworthy).

use serde_json::Value;

/// Minimum accepted quota value.
pub const MIN_QUOTA: u32 = 0;

/// Maximum accepted quota value (the host UI's own limit).
pub const MAX_QUOTA: u32 = 9999;

/// Outcome of validating a duck-typed quota value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    /// In-range integer (or integer-valued float), usable as-is.
    Valid(u32),
    /// Out-of-range numeric, clamped into `[MIN_QUOTA, MAX_QUOTA]`.
    /// Usable, but callers log it.
    Clamped(u32),
    /// Wrong type entirely (string, bool, array, object).
    Invalid,
    /// No value present (missing field or JSON null).
    Absent,
}

impl QuotaCheck {
    /// The usable value, if validation recovered one.
    #[must_use]
    pub fn value(self) -> Option<u32> {
        match self {
            Self::Valid(v) | Self::Clamped(v) => Some(v),
            Self::Invalid | Self::Absent => None,
        }
    }

    /// Whether the value was recovered by clamping.
    #[must_use]
    pub fn is_clamped(self) -> bool {
        matches!(self, Self::Clamped(_))
    }
}

/// Validate a raw quota value from a host configuration blob.
///
/// Integers and floats are accepted; floats are truncated toward zero
/// before range checking. Negative values clamp to [`MIN_QUOTA`], values
/// above [`MAX_QUOTA`] clamp down to it. Strings, booleans, arrays, and
/// objects are [`QuotaCheck::Invalid`]; `None` and JSON null are
/// [`QuotaCheck::Absent`].
#[must_use]
pub fn validate_quota(raw: Option<&Value>) -> QuotaCheck {
    let Some(raw) = raw else {
        return QuotaCheck::Absent;
    };
    match raw {
        Value::Null => QuotaCheck::Absent,
        Value::Number(n) => {
            let truncated = if let Some(i) = n.as_i64() {
                i
            } else if n.as_u64().is_some() {
                // Larger than i64::MAX, so far above MAX_QUOTA either way.
                i64::MAX
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return QuotaCheck::Invalid;
                }
                f.trunc() as i64
            } else {
                return QuotaCheck::Invalid;
            };
            if truncated < i64::from(MIN_QUOTA) {
                QuotaCheck::Clamped(MIN_QUOTA)
            } else if truncated > i64::from(MAX_QUOTA) {
                QuotaCheck::Clamped(MAX_QUOTA)
            } else {
                QuotaCheck::Valid(truncated as u32)
            }
        }
        _ => QuotaCheck::Invalid,
    }
}

/// Validate a raw group identifier from a host blob. Non-empty strings
/// only; any other type is rejected.
#[must_use]
pub fn validate_group_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Whether an already-string group id is acceptable at the persistence
/// boundary.
#[must_use]
pub fn valid_group_id(id: &str) -> bool {
    !id.is_empty()
}
