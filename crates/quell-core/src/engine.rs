//! Reconciliation engine.
//!
//! The whole system has one mode at a time. A pass takes the desired mode
//! and the host's freshly-enumerated group list and drives capture,
//! mutation, and restoration. Every per-group operation is individually
//! isolated: one group's failure never aborts the batch and never touches
//! another group's data. A pass always runs to completion and returns a
//! [`Summary`].
//!
//! Passes are unconditionally idempotent rather than skipped on a cached
//! "last applied mode": a repeated override pass must re-attempt capture
//! of previously deferred groups, and a repeated inactive pass must keep
//! watching for sentinel values with no record. The caller's
//! last-known-mode hint is used only to detect mode drift (a second,
//! unsynchronized replica having already pushed changes through the
//! host's own sync layer); when live observation contradicts the hint,
//! live observation wins.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::capture::{self, CaptureAction};
use crate::host::{Host, LiveGroup};
use crate::record::{Mode, OVERRIDE_SENTINEL};
use crate::report::{ErrorReporter, GroupError, Summary};
use crate::store::RedundantStore;
use crate::validate;

/// Drives reconciliation passes against one redundant store.
///
/// `&mut self` keeps at most one pass in flight within a process; the
/// host-facing entry point must guarantee the same across processes (the
/// CLI holds a file lock for the duration of a pass). There is no
/// suspension point and no cancellation inside a pass: it either completes,
/// possibly with per-group errors, or the process dies. Completed group
/// mutations are never rolled back by a later group's failure.
pub struct ApplyEngine {
    store: RedundantStore,
    /// Groups observed at the override sentinel with no record during an
    /// inactive pass. One observation earns a watch; a second consecutive
    /// one is unrecoverable; an override pass treats a watched zero as the
    /// user's vouched-for steady-state value.
    zero_watch: BTreeSet<String>,
}

impl ApplyEngine {
    /// Build an engine over a redundant store.
    #[must_use]
    pub fn new(store: RedundantStore) -> Self {
        Self {
            store,
            zero_watch: BTreeSet::new(),
        }
    }

    /// The current zero-watch set, for callers that persist it between
    /// short-lived processes.
    #[must_use]
    pub fn zero_watch(&self) -> &BTreeSet<String> {
        &self.zero_watch
    }

    /// Restore a zero-watch set persisted by the caller.
    pub fn set_zero_watch(&mut self, watch: BTreeSet<String>) {
        self.zero_watch = watch;
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &RedundantStore {
        &self.store
    }

    /// Run one reconciliation pass to completion.
    ///
    /// `hint` is the caller's last-known applied mode, typically persisted
    /// in the host's own state. The engine trusts it unless live
    /// observation contradicts it.
    pub fn reconcile(&mut self, host: &mut dyn Host, desired: Mode, hint: Option<Mode>) -> Summary {
        let mut reporter = ErrorReporter::new();

        let groups = match host.list_groups() {
            Ok(groups) => groups,
            Err(err) => {
                warn!(error = %err, "group enumeration failed; nothing reconciled this pass");
                reporter.note(format!("group enumeration failed: {err}"));
                return reporter.finish();
            }
        };
        info!(desired = %desired, groups = groups.len(), "reconciling");

        if let Some(hinted) = hint {
            if let Some(observed) = self.infer_previous_mode(&groups, &mut reporter) {
                if observed != hinted {
                    reporter.drift(observed, hinted);
                }
            }
        }

        match desired {
            Mode::Override => self.apply_override(host, &groups, &mut reporter),
            Mode::Inactive => self.apply_inactive(host, &groups, &mut reporter),
        }

        let summary = reporter.finish();
        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            deferred = summary.deferred.len(),
            failed = summary.failed.len(),
            drift = summary.drift_detected,
            "pass complete"
        );
        summary
    }

    /// Infer the previously applied mode from stored records and live
    /// values. Only affirmative evidence counts: a group with a record and
    /// a sentinel live value was overridden; a group with a record and a
    /// non-sentinel live value was not. With no records at all there is no
    /// evidence, and no drift claim is made against the hint.
    fn infer_previous_mode(
        &self,
        groups: &[LiveGroup],
        reporter: &mut ErrorReporter,
    ) -> Option<Mode> {
        for group in groups {
            if self.store.get(&group.group_id, reporter).is_some() {
                let live = validate::validate_quota(Some(&group.current_value)).value();
                let observed = if live == Some(OVERRIDE_SENTINEL) {
                    Mode::Override
                } else {
                    Mode::Inactive
                };
                debug!(group_id = %group.group_id, %observed, "previous mode inferred from live state");
                return Some(observed);
            }
        }
        None
    }

    /// Transition to `Override`: two-phase capture, then mutate every
    /// capturable group's live value to the sentinel.
    fn apply_override(
        &mut self,
        host: &mut dyn Host,
        groups: &[LiveGroup],
        reporter: &mut ErrorReporter,
    ) {
        // Phase 1: read everything before mutating anything, so a capture
        // can never observe a sibling's already-overridden value.
        let plan = capture::plan(
            groups,
            Mode::Override,
            &self.store,
            &self.zero_watch,
            reporter,
        );
        // Phase 2: commit captures first, then mutate.
        let capture_failures = capture::commit(&plan, &mut self.store, reporter);

        for (group_id, decision) in plan.decisions() {
            match &decision.action {
                CaptureAction::Capture(_) | CaptureAction::AlreadyCaptured => {
                    if capture_failures.contains(group_id) {
                        // Reported by commit; retried next pass.
                        continue;
                    }
                    if decision.live == Some(OVERRIDE_SENTINEL) {
                        reporter.skip(group_id);
                        continue;
                    }
                    match host.set_value(group_id, OVERRIDE_SENTINEL) {
                        Ok(()) => {
                            debug!(group_id, "quota overridden");
                            reporter.success(group_id);
                        }
                        Err(err) => {
                            reporter.fail(group_id, &GroupError::HostApi(err.to_string()));
                        }
                    }
                }
                CaptureAction::Deferred => {
                    reporter.defer(group_id);
                }
                CaptureAction::Invalid(reason) => {
                    // Not mutated: zeroing a value we could not record
                    // would make it unrecoverable.
                    reporter.fail(group_id, &GroupError::InvalidInput(reason.clone()));
                }
            }
        }

        // Committed captures consumed their vouchers.
        for (group_id, decision) in plan.decisions() {
            if matches!(decision.action, CaptureAction::Capture(_))
                && !capture_failures.contains(group_id)
            {
                self.zero_watch.remove(group_id);
            }
        }
    }

    /// Transition to `Inactive`: restore each recorded group and
    /// invalidate its record; groups without a record are integrity-checked
    /// but otherwise left alone.
    fn apply_inactive(
        &mut self,
        host: &mut dyn Host,
        groups: &[LiveGroup],
        reporter: &mut ErrorReporter,
    ) {
        let mut next_watch = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for group in groups {
            if !seen.insert(group.group_id.as_str()) {
                continue;
            }
            match self.store.get(&group.group_id, reporter) {
                Some(record) => match host.set_value(&group.group_id, record.value) {
                    Ok(()) => {
                        debug!(group_id = %group.group_id, value = record.value, "original value restored");
                        match self.store.invalidate(&group.group_id, reporter) {
                            Ok(()) => reporter.success(&group.group_id),
                            Err(err) => {
                                // Value restored, record kept; the next
                                // pass re-restores the same value.
                                reporter.fail(
                                    &group.group_id,
                                    &GroupError::BackendUnavailable(err.to_string()),
                                );
                            }
                        }
                    }
                    Err(err) => {
                        reporter.fail(&group.group_id, &GroupError::HostApi(err.to_string()));
                    }
                },
                None => {
                    // Nothing to restore. Watch for a sentinel value that
                    // should not be there.
                    let live = validate::validate_quota(Some(&group.current_value)).value();
                    if live == Some(OVERRIDE_SENTINEL) {
                        if self.zero_watch.contains(&group.group_id) {
                            reporter.fail(
                                &group.group_id,
                                &GroupError::Unrecoverable(
                                    "override sentinel with no stored original; needs manual fix"
                                        .to_string(),
                                ),
                            );
                        } else {
                            debug!(group_id = %group.group_id, "sentinel value with no record; watching");
                            reporter.skip(&group.group_id);
                        }
                        next_watch.insert(group.group_id.clone());
                    } else {
                        reporter.skip(&group.group_id);
                    }
                }
            }
        }
        self.zero_watch = next_watch;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::*;
    use crate::backends::MemoryBackend;
    use crate::host::HostError;
    use crate::record::OriginalRecord;
    use crate::report::FailureKind;

    /// Host fake over an in-memory map, with injectable mutation failures.
    struct FakeHost {
        groups: BTreeMap<String, Value>,
        fail_set_for: BTreeSet<String>,
    }

    impl FakeHost {
        fn new(groups: &[(&str, Value)]) -> Self {
            Self {
                groups: groups
                    .iter()
                    .map(|(id, v)| ((*id).to_string(), v.clone()))
                    .collect(),
                fail_set_for: BTreeSet::new(),
            }
        }

        fn value(&self, group_id: &str) -> &Value {
            &self.groups[group_id]
        }
    }

    impl Host for FakeHost {
        fn list_groups(&self) -> Result<Vec<LiveGroup>, HostError> {
            Ok(self
                .groups
                .iter()
                .map(|(group_id, current_value)| LiveGroup {
                    group_id: group_id.clone(),
                    current_value: current_value.clone(),
                })
                .collect())
        }

        fn get_value(&self, group_id: &str) -> Result<Value, HostError> {
            self.groups
                .get(group_id)
                .cloned()
                .ok_or_else(|| HostError::GroupNotFound {
                    group_id: group_id.to_string(),
                })
        }

        fn set_value(&mut self, group_id: &str, value: u32) -> Result<(), HostError> {
            if self.fail_set_for.contains(group_id) {
                return Err(HostError::Failure("injected mutation failure".to_string()));
            }
            match self.groups.get_mut(group_id) {
                Some(slot) => {
                    *slot = json!(value);
                    Ok(())
                }
                None => Err(HostError::GroupNotFound {
                    group_id: group_id.to_string(),
                }),
            }
        }
    }

    fn engine_with_handles() -> (ApplyEngine, MemoryBackend, MemoryBackend) {
        let primary = MemoryBackend::new();
        let backup = MemoryBackend::new();
        let store = RedundantStore::new(Box::new(primary.clone()), Box::new(backup.clone()));
        (ApplyEngine::new(store), primary, backup)
    }

    #[test]
    fn override_then_inactive_round_trips() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(20)), ("physics", json!(50))]);

        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(host.value("default"), &json!(0));
        assert_eq!(host.value("physics"), &json!(0));
        assert_eq!(primary.contents().len(), 2);

        let summary = engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(host.value("default"), &json!(20));
        assert_eq!(host.value("physics"), &json!(50));
        assert!(primary.contents().is_empty());
    }

    #[test]
    fn repeated_override_is_idempotent() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(20))]);

        engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        let stored_after_first = primary.contents();

        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Override));
        assert_eq!(summary.succeeded.len(), 0);
        assert_eq!(summary.skipped, vec!["default"]);
        assert_eq!(primary.contents(), stored_after_first);
        assert_eq!(host.value("default"), &json!(0));
    }

    #[test]
    fn deferred_capture_waits_for_a_trustworthy_value() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(0))]);

        // Live value is already the sentinel: no record may be written.
        let summary = engine.reconcile(&mut host, Mode::Override, None);
        assert_eq!(summary.deferred, vec!["default"]);
        assert!(primary.contents().is_empty());
        assert_eq!(host.value("default"), &json!(0));

        // The user raises the quota mid-episode; the next override pass
        // captures it without an intervening inactive pass.
        host.groups.insert("default".to_string(), json!(12));
        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Override));
        assert_eq!(summary.succeeded, vec!["default"]);
        assert_eq!(host.value("default"), &json!(0));

        let mut reporter = ErrorReporter::new();
        let record = engine.store().get("default", &mut reporter).unwrap();
        assert_eq!(record.value, 12);
        assert_eq!(record.captured_by, Mode::Override);
    }

    #[test]
    fn partial_failure_is_isolated_to_the_failing_group() {
        let (mut engine, _primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[
            ("g1", json!(10)),
            ("g2", json!(20)),
            ("g3", json!(30)),
            ("g4", json!(40)),
            ("g5", json!(50)),
        ]);
        host.fail_set_for.insert("g3".to_string());

        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        assert_eq!(summary.succeeded, vec!["g1", "g2", "g4", "g5"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].group_id, "g3");
        assert_eq!(summary.failed[0].kind, FailureKind::HostApi);
        assert_eq!(host.value("g1"), &json!(0));
        assert_eq!(host.value("g3"), &json!(30));

        // g3's original was still captured; a later pass can finish the job.
        host.fail_set_for.clear();
        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Override));
        assert_eq!(summary.succeeded, vec!["g3"]);
        assert_eq!(host.value("g3"), &json!(0));
    }

    #[test]
    fn restore_works_from_backup_after_primary_loss() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(20))]);

        engine.reconcile(&mut host, Mode::Override, None);
        primary.clear();

        let summary = engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
        assert_eq!(summary.succeeded, vec!["default"]);
        assert_eq!(host.value("default"), &json!(20));
    }

    #[test]
    fn full_episode_scenario() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("A", json!(20))]);

        // Override: zeroed, record {A: 20} written.
        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        assert_eq!(summary.succeeded, vec!["A"]);
        assert_eq!(host.value("A"), &json!(0));
        assert_eq!(primary.contents().len(), 1);

        // Inactive: restored, record cleared.
        let summary = engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
        assert_eq!(summary.succeeded, vec!["A"]);
        assert_eq!(host.value("A"), &json!(20));
        assert!(primary.contents().is_empty());

        // Inactive again: nothing to do, no drift claimed without records.
        let summary = engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
        assert_eq!(summary.skipped, vec!["A"]);
        assert!(summary.succeeded.is_empty());
        assert!(!summary.drift_detected);
    }

    #[test]
    fn drift_is_detected_when_live_state_contradicts_the_hint() {
        let (mut engine, _primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(20))]);

        engine.reconcile(&mut host, Mode::Override, None);
        // Another replica already restored and the hint is stale: records
        // exist but the hint claims inactive while live shows override.
        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        assert!(summary.drift_detected);
    }

    #[test]
    fn sentinel_with_no_record_becomes_unrecoverable_after_two_passes() {
        let (mut engine, _primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("stuck", json!(0))]);

        let summary = engine.reconcile(&mut host, Mode::Inactive, None);
        assert_eq!(summary.skipped, vec!["stuck"]);
        assert!(summary.unrecoverable.is_empty());
        assert_eq!(engine.zero_watch().len(), 1);

        let summary = engine.reconcile(&mut host, Mode::Inactive, None);
        assert_eq!(summary.unrecoverable, vec!["stuck"]);
        assert_eq!(summary.failed[0].kind, FailureKind::Unrecoverable);
        // Never "fixed" with a guessed value.
        assert_eq!(host.value("stuck"), &json!(0));
    }

    #[test]
    fn vouched_zero_is_captured_on_the_next_override_pass() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("zero-by-choice", json!(0))]);

        // An inactive pass observes the zero and vouches for it.
        engine.reconcile(&mut host, Mode::Inactive, None);
        assert_eq!(engine.zero_watch().len(), 1);

        // The override pass trusts it and records it as the original.
        let summary = engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
        assert_eq!(summary.skipped, vec!["zero-by-choice"]);
        assert_eq!(primary.contents().len(), 1);
        assert!(engine.zero_watch().is_empty());

        let mut reporter = ErrorReporter::new();
        let record = engine.store().get("zero-by-choice", &mut reporter).unwrap();
        assert_eq!(record.value, 0);
        assert_eq!(record.captured_by, Mode::Inactive);

        // And the restore brings back the same zero.
        let summary = engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
        assert_eq!(summary.succeeded, vec!["zero-by-choice"]);
        assert_eq!(host.value("zero-by-choice"), &json!(0));
    }

    #[test]
    fn invalid_live_value_is_reported_and_left_untouched() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("broken", json!("20")), ("fine", json!(20))]);

        let summary = engine.reconcile(&mut host, Mode::Override, None);
        assert_eq!(summary.succeeded, vec!["fine"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kind, FailureKind::InvalidInput);
        assert_eq!(host.value("broken"), &json!("20"));
        assert_eq!(primary.contents().len(), 1);
    }

    #[test]
    fn primary_outage_skips_the_group_and_recovers_next_pass() {
        let (mut engine, primary, _backup) = engine_with_handles();
        let mut host = FakeHost::new(&[("default", json!(20))]);

        primary.set_fail_writes(true);
        let summary = engine.reconcile(&mut host, Mode::Override, None);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kind, FailureKind::BackendUnavailable);
        // Not mutated: a capture that never landed must not be zeroed.
        assert_eq!(host.value("default"), &json!(20));

        primary.set_fail_writes(false);
        let summary = engine.reconcile(&mut host, Mode::Override, None);
        assert_eq!(summary.succeeded, vec!["default"]);
        assert_eq!(host.value("default"), &json!(0));
    }

    #[test]
    fn enumeration_failure_reconciles_nothing() {
        struct DownHost;
        impl Host for DownHost {
            fn list_groups(&self) -> Result<Vec<LiveGroup>, HostError> {
                Err(HostError::Failure("host is down".to_string()))
            }
            fn get_value(&self, _group_id: &str) -> Result<Value, HostError> {
                Err(HostError::Failure("host is down".to_string()))
            }
            fn set_value(&mut self, _group_id: &str, _value: u32) -> Result<(), HostError> {
                Err(HostError::Failure("host is down".to_string()))
            }
        }

        let (mut engine, _primary, _backup) = engine_with_handles();
        let summary = engine.reconcile(&mut DownHost, Mode::Override, None);
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.notes.len(), 1);
    }

    proptest! {
        #[test]
        fn any_valid_quota_survives_an_override_episode(value in 1u32..=9999) {
            let (mut engine, _primary, _backup) = engine_with_handles();
            let mut host = FakeHost::new(&[("default", json!(value))]);

            engine.reconcile(&mut host, Mode::Override, Some(Mode::Inactive));
            prop_assert_eq!(host.value("default"), &json!(0));

            engine.reconcile(&mut host, Mode::Inactive, Some(Mode::Override));
            prop_assert_eq!(host.value("default"), &json!(value));
        }
    }
}
