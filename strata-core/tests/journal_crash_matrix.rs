//! Crash at every step of the commit pipeline, restart, recover.
//!
//! The device file survives the crash; recovery must leave the live region
//! either exactly without the change (header never became valid) or exactly
//! with it (header was valid).

mod common;

use common::{create_group, open_manager};
use strata_core::hooks::{HookAction, HookPoint};
use strata_core::journal::RecoveryOutcome;
use strata_core::types::{ControllerId, ObjectKind};
use strata_core::StrataError;
use tempfile::tempdir;

fn crash_and_recover(point: HookPoint) -> (RecoveryOutcome, usize, bool) {
    let dir = tempdir().unwrap();

    {
        let tm = open_manager(dir.path(), ControllerId::SpA);
        tm.journal().hooks().add_hook(point, HookAction::Crash);
        let err = create_group(&tm, 5, 3).unwrap_err();
        assert!(matches!(err, StrataError::NodeCrashed { .. }), "{point}: {err}");
        // Dropping the manager releases the device lock
    }

    let tm = open_manager(dir.path(), ControllerId::SpB);
    let outcome = tm.journal().recover().unwrap();
    tm.reload().unwrap();

    let snapshot = tm.snapshot();
    assert!(snapshot.dangling_edges().is_empty(), "{point}: dangling edges");
    let found = tm.lookup_by_number(ObjectKind::RaidGroup, 5).is_some();
    (outcome, tm.objects().len(), found)
}

#[test]
fn crash_while_writing_journal() {
    let (outcome, objects, found) = crash_and_recover(HookPoint::JournalRegionWrite);
    assert_eq!(outcome, RecoveryOutcome::Clean);
    assert_eq!(objects, 0);
    assert!(!found);
}

#[test]
fn crash_before_header_valid() {
    let (outcome, objects, found) = crash_and_recover(HookPoint::BeforeMarkJournalValid);
    assert_eq!(outcome, RecoveryOutcome::Clean);
    assert_eq!(objects, 0);
    assert!(!found);
}

#[test]
fn crash_after_header_valid() {
    let (outcome, objects, found) = crash_and_recover(HookPoint::AfterJournalValid);
    assert!(matches!(outcome, RecoveryOutcome::Replayed { records_applied: 7, .. }));
    assert_eq!(objects, 4);
    assert!(found);
}

#[test]
fn crash_while_writing_live() {
    let (outcome, objects, found) = crash_and_recover(HookPoint::LiveRegionWrite);
    assert!(matches!(outcome, RecoveryOutcome::Replayed { .. }));
    assert_eq!(objects, 4);
    assert!(found);
}

#[test]
fn crash_before_header_invalidated() {
    let (outcome, objects, found) = crash_and_recover(HookPoint::BeforeInvalidateHeader);
    assert!(matches!(outcome, RecoveryOutcome::Replayed { .. }));
    assert_eq!(objects, 4);
    assert!(found);
}

#[test]
fn recovery_is_idempotent() {
    let dir = tempdir().unwrap();
    {
        let tm = open_manager(dir.path(), ControllerId::SpA);
        tm.journal()
            .hooks()
            .add_hook(HookPoint::BeforeInvalidateHeader, HookAction::Crash);
        assert!(create_group(&tm, 1, 3).is_err());
    }

    // First recovery crashes again, half way through the live apply
    {
        let tm = open_manager(dir.path(), ControllerId::SpB);
        tm.journal()
            .hooks()
            .add_hook(HookPoint::LiveRegionWrite, HookAction::Crash);
        assert!(tm.journal().recover().is_err());
    }

    let tm = open_manager(dir.path(), ControllerId::SpA);
    assert!(matches!(
        tm.journal().recover().unwrap(),
        RecoveryOutcome::Replayed { .. }
    ));
    assert_eq!(tm.journal().recover().unwrap(), RecoveryOutcome::Clean);
    tm.reload().unwrap();
    assert_eq!(tm.objects().len(), 4);
}

#[test]
fn committed_state_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let tm = open_manager(dir.path(), ControllerId::SpA);
        create_group(&tm, 2, 4).unwrap();
    }

    let tm = open_manager(dir.path(), ControllerId::SpA);
    assert_eq!(tm.journal().recover().unwrap(), RecoveryOutcome::Clean);
    let rg = tm.lookup_by_number(ObjectKind::RaidGroup, 2).unwrap();
    assert_eq!(tm.consumes_of(rg.id).len(), 4);
}
