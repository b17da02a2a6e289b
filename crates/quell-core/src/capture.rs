//! Two-phase safe capture.
//!
//! Multiple managed entities can reference one shared configuration group,
//! so capturing and mutating one entity at a time would let a later
//! capture observe a sibling's already-overridden value. The protocol
//! prevents that: phase 1 reads every group's current value exactly once
//! into an uncommitted plan without mutating anything; phase 2 commits the
//! planned captures, and only then may the caller mutate live values.
//!
//! The deferred-capture gate lives in phase 1: when an override is being
//! requested and a group's live value already equals the override
//! sentinel, recording that sentinel as "the original" would poison every
//! future restore. Such a group stays uncaptured until a pass can trust
//! its value, either because the live value turned non-zero or because an
//! inactive-mode observation vouched that zero really is the user's
//! steady-state value.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::host::LiveGroup;
use crate::record::{Mode, OVERRIDE_SENTINEL, OriginalRecord};
use crate::report::{ErrorReporter, GroupError};
use crate::store::{RedundantStore, StoreError};
use crate::validate::{self, QuotaCheck};

/// What phase 2 should do for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureAction {
    /// No record exists and the live value is trustworthy; commit it.
    Capture(OriginalRecord),
    /// A record already exists for this override episode.
    AlreadyCaptured,
    /// Live value is the override sentinel and cannot be trusted yet.
    Deferred,
    /// The live value failed validation; nothing can be recorded and the
    /// group must not be mutated (an unrecorded original would be lost).
    Invalid(String),
}

/// One group's planned outcome, with the live value read in phase 1.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Planned phase-2 action
    pub action: CaptureAction,
    /// Live quota at planning time, when it validated
    pub live: Option<u32>,
}

/// Uncommitted output of phase 1. One decision per group id, even when
/// the live enumeration lists an id more than once.
#[derive(Debug, Default)]
pub struct CapturePlan {
    decisions: BTreeMap<String, Decision>,
}

impl CapturePlan {
    /// All planned decisions, keyed by group id.
    #[must_use]
    pub fn decisions(&self) -> &BTreeMap<String, Decision> {
        &self.decisions
    }

    /// The decision for one group, if it was in the enumeration.
    #[must_use]
    pub fn decision(&self, group_id: &str) -> Option<&Decision> {
        self.decisions.get(group_id)
    }
}

/// Phase 1: read every group's current value once and decide, without
/// mutating anything and without writing to the store, what phase 2 will
/// commit.
///
/// `trusted_zeros` carries the group ids whose sentinel-valued quota was
/// already observed during an inactive pass; for those, a zero is captured
/// as a genuine steady-state original instead of deferred.
pub fn plan(
    groups: &[LiveGroup],
    desired: Mode,
    store: &RedundantStore,
    trusted_zeros: &BTreeSet<String>,
    reporter: &mut ErrorReporter,
) -> CapturePlan {
    let mut plan = CapturePlan::default();
    for group in groups {
        if plan.decisions.contains_key(&group.group_id) {
            // Shared configuration: one decision per group id.
            continue;
        }
        let check = validate::validate_quota(Some(&group.current_value));
        let live = check.value();
        if check.is_clamped() {
            reporter.note(format!(
                "group {}: live quota out of range, clamped to {}",
                group.group_id,
                live.unwrap_or(0)
            ));
        }

        let action = if store.get(&group.group_id, reporter).is_some() {
            CaptureAction::AlreadyCaptured
        } else {
            match live {
                Some(value) if value == OVERRIDE_SENTINEL && desired == Mode::Override => {
                    if trusted_zeros.contains(&group.group_id) {
                        // An inactive-mode pass vouched for this zero.
                        CaptureAction::Capture(OriginalRecord {
                            value,
                            captured_by: Mode::Inactive,
                        })
                    } else {
                        debug!(group_id = %group.group_id, "live value already at sentinel; deferring capture");
                        CaptureAction::Deferred
                    }
                }
                Some(value) => CaptureAction::Capture(OriginalRecord {
                    value,
                    captured_by: desired,
                }),
                None => match check {
                    QuotaCheck::Absent => {
                        CaptureAction::Invalid("quota value missing".to_string())
                    }
                    _ => CaptureAction::Invalid("quota value has wrong type".to_string()),
                },
            }
        };
        plan.decisions
            .insert(group.group_id.clone(), Decision { action, live });
    }
    plan
}

/// Phase 2, commit half: persist every planned capture. Runs only after
/// phase 1 completed for all groups in the pass.
///
/// Returns the ids whose capture failed on the primary backend; the
/// caller must not mutate those groups this pass (they are retried on the
/// next one).
pub fn commit(
    plan: &CapturePlan,
    store: &mut RedundantStore,
    reporter: &mut ErrorReporter,
) -> BTreeSet<String> {
    let mut failed = BTreeSet::new();
    for (group_id, decision) in plan.decisions() {
        let CaptureAction::Capture(record) = &decision.action else {
            continue;
        };
        match store.put(group_id, record, reporter) {
            Ok(()) => {
                debug!(group_id, value = record.value, "original value captured");
            }
            Err(err) => {
                let group_err = match &err {
                    StoreError::InvalidRecord { .. } => GroupError::InvalidInput(err.to_string()),
                    StoreError::PrimaryUnavailable { .. } => {
                        GroupError::BackendUnavailable(err.to_string())
                    }
                };
                reporter.fail(group_id, &group_err);
                failed.insert(group_id.clone());
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use serde_json::{Value, json};

    fn group(id: &str, value: Value) -> LiveGroup {
        LiveGroup {
            group_id: id.to_string(),
            current_value: value,
        }
    }

    fn store_with_primary() -> (RedundantStore, MemoryBackend) {
        let primary = MemoryBackend::new();
        let store = RedundantStore::new(Box::new(primary.clone()), Box::new(MemoryBackend::new()));
        (store, primary)
    }

    #[test]
    fn plans_captures_for_unrecorded_nonzero_groups() {
        let (store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("default", json!(20)), group("physics", json!(50))];

        let plan = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );

        let decision = plan.decision("default").unwrap();
        assert_eq!(
            decision.action,
            CaptureAction::Capture(OriginalRecord {
                value: 20,
                captured_by: Mode::Override,
            })
        );
        assert_eq!(decision.live, Some(20));
    }

    #[test]
    fn existing_record_means_no_recapture() {
        let (mut store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        store
            .put(
                "default",
                &OriginalRecord {
                    value: 20,
                    captured_by: Mode::Override,
                },
                &mut reporter,
            )
            .unwrap();

        // Live value is already overridden; the record must not change.
        let groups = vec![group("default", json!(0))];
        let plan = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );
        assert_eq!(
            plan.decision("default").unwrap().action,
            CaptureAction::AlreadyCaptured
        );
    }

    #[test]
    fn sentinel_under_override_is_deferred() {
        let (store, primary) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("default", json!(0))];

        let plan_out = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );
        assert_eq!(
            plan_out.decision("default").unwrap().action,
            CaptureAction::Deferred
        );

        // Commit writes nothing for a deferred group.
        let mut store = store;
        commit(&plan_out, &mut store, &mut reporter);
        assert!(primary.contents().is_empty());
    }

    #[test]
    fn vouched_zero_is_captured_as_inactive_steady_state() {
        let (store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("default", json!(0))];
        let trusted: BTreeSet<String> = ["default".to_string()].into_iter().collect();

        let plan_out = plan(&groups, Mode::Override, &store, &trusted, &mut reporter);
        assert_eq!(
            plan_out.decision("default").unwrap().action,
            CaptureAction::Capture(OriginalRecord {
                value: 0,
                captured_by: Mode::Inactive,
            })
        );
    }

    #[test]
    fn sentinel_under_inactive_capture_commits() {
        // The gate only fires when an override is being requested.
        let (store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("default", json!(0))];

        let plan_out = plan(
            &groups,
            Mode::Inactive,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );
        assert_eq!(
            plan_out.decision("default").unwrap().action,
            CaptureAction::Capture(OriginalRecord {
                value: 0,
                captured_by: Mode::Inactive,
            })
        );
    }

    #[test]
    fn invalid_live_values_are_not_capturable() {
        let (store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![
            group("strings", json!("20")),
            group("missing", Value::Null),
        ];

        let plan_out = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );
        assert!(matches!(
            plan_out.decision("strings").unwrap().action,
            CaptureAction::Invalid(_)
        ));
        assert!(matches!(
            plan_out.decision("missing").unwrap().action,
            CaptureAction::Invalid(_)
        ));
    }

    #[test]
    fn duplicate_group_ids_get_one_decision() {
        let (store, _) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("shared", json!(20)), group("shared", json!(20))];

        let plan_out = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );
        assert_eq!(plan_out.decisions().len(), 1);
    }

    #[test]
    fn commit_reports_primary_failures_and_skips_those_groups() {
        let (store, primary) = store_with_primary();
        let mut reporter = ErrorReporter::new();
        let groups = vec![group("default", json!(20))];
        let plan_out = plan(
            &groups,
            Mode::Override,
            &store,
            &BTreeSet::new(),
            &mut reporter,
        );

        primary.set_fail_writes(true);
        let mut store = store;
        let failed = commit(&plan_out, &mut store, &mut reporter);
        assert!(failed.contains("default"));
        let summary = reporter.finish();
        assert_eq!(summary.failed.len(), 1);
    }
}
