//! Mode and original-value record types.
//!
//! An [`OriginalRecord`] is the unit of persistence: the quota value a
//! group had immediately before an override episode began, plus the mode
//! under which the capture was taken. The serialized form is a small,
//! versionless JSON object; the redundant store owns encoding and decoding
//! at its boundaries and treats anything that fails to decode as absent.

use serde::{Deserialize, Serialize};

/// Quota value a group is forced to while the override is active.
pub const OVERRIDE_SENTINEL: u32 = 0;

/// The system-wide override mode.
///
/// The whole system has one mode at a time; there is no per-group mode. A
/// third conceptual state (override requested but the live value already
/// looks overridden and no original was captured) is deliberately not
/// representable here: the engine defers such groups instead of encoding
/// the ambiguity into stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Quotas hold their user-chosen values.
    Inactive,
    /// Quotas are forced to [`OVERRIDE_SENTINEL`].
    Override,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Inactive => "inactive",
            Self::Override => "override",
        })
    }
}

/// A captured original quota value for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalRecord {
    /// The quota value in effect immediately before the override episode.
    pub value: u32,
    /// Mode under which the capture was trusted.
    ///
    /// `Inactive` means the value was observed (or vouched for) while no
    /// override was in effect, including a genuine steady-state zero.
    /// `Override` means the value was captured at the start of an override
    /// pass, where a zero is never trusted and never committed.
    pub captured_by: Mode,
}

impl OriginalRecord {
    /// Encode to the on-disk form.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode from the on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_bytes() {
        let record = OriginalRecord {
            value: 20,
            captured_by: Mode::Override,
        };
        let bytes = record.to_bytes().unwrap();
        assert_eq!(OriginalRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn serialized_form_is_flat_json() {
        let record = OriginalRecord {
            value: 7,
            captured_by: Mode::Inactive,
        };
        let text = String::from_utf8(record.to_bytes().unwrap()).unwrap();
        assert_eq!(text, r#"{"value":7,"captured_by":"inactive"}"#);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(OriginalRecord::from_bytes(b"not json").is_err());
        assert!(OriginalRecord::from_bytes(br#"{"value":"twenty"}"#).is_err());
    }

    #[test]
    fn mode_display_matches_wire_names() {
        assert_eq!(Mode::Inactive.to_string(), "inactive");
        assert_eq!(Mode::Override.to_string(), "override");
    }
}
