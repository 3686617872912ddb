//! Crash and resume against durable stores.

use crate::integration::support::{fast_limiter, start_time, Harness, ScriptedBackend, Step};
use genloop::clock::ManualClock;
use genloop::ledger::{CostLedger, CostLimits};
use genloop::orchestrator::RunOutcome;
use genloop::session::{ItemStatus, ResumeCheck, SessionSettings, SessionStore};
use genloop::store::{FileRecordStore, SharedStore};
use genloop::types::Tier;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn payloads(n: usize) -> Vec<serde_json::Value> {
    (1..=n).map(|i| json!({ "prompt": format!("p{}", i) })).collect()
}

fn assert_resumes_three_of_ten(open: impl Fn() -> SharedStore) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let created_ids: Vec<String> = {
        let sessions = SessionStore::new(open(), clock.clone());
        let state = sessions
            .create(payloads(10), SessionSettings::sequential(10))
            .unwrap();
        for item in state.items.iter().take(3) {
            sessions
                .update_progress(&item.id, ItemStatus::Done, 0.134, Tier::Primary, None)
                .unwrap();
        }
        state.items.iter().map(|i| i.id.clone()).collect()
        // Store dropped here without closing the session.
    };

    let sessions = SessionStore::new(open(), clock);
    let ResumeCheck::Resumable(state) = sessions.check_for_resume().unwrap() else {
        panic!("expected a resumable session");
    };
    assert_eq!(state.done_count(), 3);
    assert_eq!(state.pending_count(), 7);
    assert_eq!(state.items.len(), 10);
    assert_eq!(state.progress.generated, 3);
    assert!((state.progress.session_cost - 0.402).abs() < 1e-9);

    let ids: Vec<String> = state.items.iter().map(|i| i.id.clone()).collect();
    assert_eq!(ids, created_ids);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);

    let pending: Vec<String> = sessions
        .pending_items()
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(pending, created_ids[3..].to_vec());
}

#[test]
fn resume_after_crash_with_file_store() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("records");
    assert_resumes_three_of_ten(|| Arc::new(FileRecordStore::new(&root).unwrap()));
}

#[test]
fn item_ids_continue_across_sessions_on_the_same_day() {
    let dir = TempDir::new().unwrap();
    let store: SharedStore = Arc::new(FileRecordStore::new(dir.path()).unwrap());
    let clock = Arc::new(ManualClock::new(start_time()));
    let sessions = SessionStore::new(store, clock.clone());

    let first = sessions
        .create(payloads(2), SessionSettings::sequential(2))
        .unwrap();
    sessions.discard().unwrap();
    clock.advance(chrono::Duration::minutes(5));
    let second = sessions
        .create(payloads(2), SessionSettings::sequential(2))
        .unwrap();

    assert_eq!(first.items[1].id, "261017_0002");
    assert_eq!(second.items[0].id, "261017_0003");
}

#[tokio::test]
async fn resumed_run_finishes_only_pending_items() {
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.create_session(10, SessionSettings::sequential(10));
    let state = h.sessions.current().unwrap().unwrap();
    for item in state.items.iter().take(3) {
        h.ledger.add_cost(0.134, Tier::Primary).unwrap();
        h.sessions
            .update_progress(&item.id, ItemStatus::Done, 0.134, Tier::Primary, None)
            .unwrap();
    }

    let report = h.run().await;

    assert!(matches!(report.outcome, RunOutcome::Halted(_)));
    assert_eq!(report.progress.generated, 10);
    assert_eq!(report.calls, 7);
    let ledger = CostLedger::new(h.store.clone(), Arc::new(h.clock.clone()), CostLimits::default());
    assert_eq!(ledger.summary().unwrap().daily.primary_count, 10);
}
