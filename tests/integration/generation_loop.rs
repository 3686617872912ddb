//! End-to-end loop behavior against a scripted backend.

use crate::integration::support::{fast_limiter, Harness, ScriptedBackend, Step};
use genloop::ledger::CostLimits;
use genloop::limiter::LimiterConfig;
use genloop::orchestrator::{OverheadScope, RunOutcome};
use genloop::session::{ItemStatus, SessionSettings};
use genloop::stop::{HaltReason, StopReason};
use genloop::store::{keys, RecordStore};
use genloop::types::Tier;
use tokio::sync::watch;

fn archived_reason(h: &Harness, session_id: &str) -> Option<String> {
    h.sessions
        .list_archives()
        .unwrap()
        .into_iter()
        .find(|s| s.session_id == session_id)
        .and_then(|s| s.stop_reason)
}

#[tokio::test]
async fn stops_when_target_reached() {
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.create_session(8, SessionSettings::sequential(5));

    let report = h.run().await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Halted(HaltReason::Stop(StopReason::TargetReached {
            generated: 5,
            target: 5
        }))
    ));
    assert_eq!(report.progress.generated, 5);
    assert_eq!(report.calls, 5);
    assert_eq!(h.sink.stored.lock().len(), 5);

    let summary = h.ledger.summary().unwrap();
    assert_eq!(summary.daily.primary_count, 5);
    assert!((summary.daily.total_cost - 0.67).abs() < 1e-9);

    assert!(h.sessions.current().unwrap().is_none());
    assert_eq!(
        archived_reason(&h, &report.session_id).as_deref(),
        Some("target reached (5/5)")
    );
    assert_eq!(h.notifier.kinds(), vec!["session_complete"]);
}

#[tokio::test]
async fn five_consecutive_failures_trigger_emergency_stop() {
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Fail("content rejected")),
    );
    h.create_session(10, SessionSettings::sequential(10));

    let report = h.run().await;

    assert_eq!(
        report.outcome,
        RunOutcome::Halted(HaltReason::ConsecutiveFailures { count: 5 })
    );
    assert_eq!(report.progress.failed, 5);
    assert_eq!(h.ledger.daily_total().unwrap(), 0.0);

    let archive = h
        .sessions
        .list_archives()
        .unwrap()
        .pop()
        .expect("session archived");
    assert_eq!(archive.pending_count(), 5);
    assert_eq!(
        archive.stop_reason.as_deref(),
        Some("emergency stop: 5 consecutive failures")
    );
    assert!(archive
        .items
        .iter()
        .filter(|i| i.status == ItemStatus::Failed)
        .all(|i| i.error.as_deref() == Some("content rejected")));
    assert_eq!(
        h.notifier.kinds(),
        vec!["consecutive_failures", "session_complete"]
    );
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let mut script = vec![Step::Fail("x"); 4];
    script.push(Step::Image);
    script.extend(vec![Step::Fail("x"); 4]);
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(script, Step::Image),
    );
    h.create_session(9, SessionSettings::sequential(0));

    let report = h.run().await;

    assert_eq!(report.outcome, RunOutcome::Halted(HaltReason::Complete));
    assert_eq!(report.progress.failed, 8);
    assert_eq!(report.progress.generated, 1);
}

#[tokio::test]
async fn daily_cap_stops_before_overspending() {
    let limits = CostLimits {
        daily_cost_cap: 0.5,
        ..CostLimits::default()
    };
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        limits,
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.create_session(10, SessionSettings::sequential(10));

    let report = h.run().await;

    // 3 x 0.134 = 0.402; a fourth primary unit would reach 0.536.
    assert_eq!(report.progress.generated, 3);
    assert!(matches!(
        report.outcome,
        RunOutcome::Halted(HaltReason::Stop(StopReason::DailyCostCap { .. }))
    ));
    assert!(h.ledger.daily_total().unwrap() <= 0.5);
    assert_eq!(h.notifier.kinds(), vec!["cost_limit", "session_complete"]);
}

#[tokio::test]
async fn quota_error_rotates_to_next_credential() {
    let h = Harness::new(
        &["k1", "k2"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![Step::Quota], Step::Image),
    );
    h.create_session(1, SessionSettings::sequential(1));

    let report = h.run().await;

    assert_eq!(report.progress.generated, 1);
    assert_eq!(report.calls, 2);
    assert_eq!(report.attempts, 1);
    assert_eq!(
        h.backend.call_log(),
        vec![
            ("k1".to_string(), Tier::Primary),
            ("k2".to_string(), Tier::Primary)
        ]
    );
    let snapshot = h.pool.snapshot();
    assert!(snapshot[0].cooldown_remaining_secs > 0);
    assert_eq!(snapshot[1].cooldown_remaining_secs, 0);
}

#[tokio::test]
async fn overload_is_not_retried() {
    let h = Harness::new(
        &["k1", "k2"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![Step::Overload], Step::Image),
    );
    h.create_session(2, SessionSettings::sequential(0));

    let report = h.run().await;

    assert_eq!(report.progress.failed, 1);
    assert_eq!(report.progress.generated, 1);
    assert_eq!(report.calls, 2);
}

#[tokio::test]
async fn capped_primary_degrades_to_fallback_then_exhausts() {
    let limiter = LimiterConfig {
        daily_cap: 1,
        ..fast_limiter()
    };
    let h = Harness::new(
        &["k1"],
        limiter,
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.create_session(3, SessionSettings::sequential(3));

    let report = h.run().await;

    assert_eq!(
        report.outcome,
        RunOutcome::Halted(HaltReason::Stop(StopReason::Exhausted))
    );
    assert_eq!(report.progress.primary_count, 1);
    assert_eq!(report.progress.fallback_count, 1);
    assert_eq!(
        h.backend.call_log(),
        vec![
            ("k1".to_string(), Tier::Primary),
            ("k1".to_string(), Tier::Fallback)
        ]
    );
    let summary = h.ledger.summary().unwrap();
    assert!((summary.daily.total_cost - 0.173).abs() < 1e-9);
    assert_eq!(
        h.notifier.kinds(),
        vec!["tier_switch", "session_complete"]
    );
}

#[tokio::test]
async fn batch_pre_check_halts_without_calls() {
    let limits = CostLimits {
        daily_cost_cap: 0.5,
        ..CostLimits::default()
    };
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        limits,
        ScriptedBackend::new(vec![], Step::Image),
    );
    let settings = SessionSettings {
        batch: true,
        ..SessionSettings::sequential(10)
    };
    h.create_session(10, settings);

    let report = h.run().await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Halted(HaltReason::PreCheck { period: "daily", .. })
    ));
    assert!(h.backend.call_log().is_empty());
    assert_eq!(h.notifier.kinds(), vec!["cost_limit", "session_complete"]);
}

#[tokio::test]
async fn shutdown_leaves_session_resumable() {
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.create_session(4, SessionSettings::sequential(4));

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let report = genloop::orchestrator::GenerationLoop::new(h.deps(), rx)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    let active = h.sessions.current().unwrap().expect("still active");
    assert_eq!(active.pending_count(), 4);
    assert!(h.store.exists(keys::ACTIVE_SESSION).unwrap());
}

#[tokio::test]
async fn session_cost_cap_from_settings() {
    let h = Harness::new(
        &["k1"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    let settings = SessionSettings {
        session_cost_cap: Some(0.3),
        ..SessionSettings::sequential(10)
    };
    h.create_session(10, settings);

    let report = h.run().await;

    assert_eq!(report.progress.generated, 2);
    assert!(matches!(
        report.outcome,
        RunOutcome::Halted(HaltReason::Stop(StopReason::SessionCostCap { .. }))
    ));
}

/// Cool-downs end immediately so quota errors rotate without stalling.
fn rotating_limiter() -> LimiterConfig {
    LimiterConfig {
        cooldown_secs: 0,
        ..fast_limiter()
    }
}

#[tokio::test]
async fn quota_churn_trips_call_overhead_guard() {
    let mut script = Vec::new();
    for _ in 0..12 {
        script.extend([Step::Quota, Step::Quota, Step::Image]);
    }
    let h = Harness::new(
        &["k1", "k2"],
        rotating_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(script, Step::Image),
    );
    h.create_session(12, SessionSettings::sequential(0));

    let report = h.run().await;

    // Every item succeeds on its third call, so the failure streak never grows.
    assert_eq!(
        report.outcome,
        RunOutcome::Halted(HaltReason::OverheadExceeded {
            calls: 30,
            attempts: 10
        })
    );
    assert_eq!(report.progress.generated, 10);
    assert_eq!(report.progress.failed, 0);
    assert_eq!(h.backend.call_log().len(), 30);

    let archive = h.sessions.list_archives().unwrap().pop().unwrap();
    assert_eq!(archive.pending_count(), 2);
    assert_eq!(archive.total_calls, Some(30));
    assert_eq!(
        archive.stop_reason.as_deref(),
        Some("emergency stop: call overhead 30 calls for 10 attempts")
    );
    assert_eq!(h.notifier.kinds(), vec!["session_complete"]);
}

/// 20 calls already on today's counters, as if issued by an earlier run.
fn harness_with_earlier_calls(scope: OverheadScope) -> Harness {
    let mut h = Harness::new(
        &["k1", "k2"],
        fast_limiter(),
        CostLimits::default(),
        ScriptedBackend::new(vec![], Step::Image),
    );
    h.policy.overhead_scope = scope;
    for _ in 0..10 {
        h.pool.mark_used("k1", Tier::Primary).unwrap();
        h.pool.mark_used("k2", Tier::Primary).unwrap();
    }
    h.create_session(12, SessionSettings::sequential(0));
    h
}

#[tokio::test]
async fn pool_lifetime_scope_counts_earlier_calls() {
    let h = harness_with_earlier_calls(OverheadScope::PoolLifetime);

    let report = h.run().await;

    assert_eq!(
        report.outcome,
        RunOutcome::Halted(HaltReason::OverheadExceeded {
            calls: 30,
            attempts: 10
        })
    );
    assert_eq!(report.progress.generated, 10);
    assert_eq!(report.calls, 10);
}

#[tokio::test]
async fn session_scope_ignores_earlier_calls() {
    let h = harness_with_earlier_calls(OverheadScope::Session);

    let report = h.run().await;

    assert_eq!(report.outcome, RunOutcome::Halted(HaltReason::Complete));
    assert_eq!(report.progress.generated, 12);
    assert_eq!(report.calls, 12);
    assert_eq!(h.pool.total_calls_today(), 32);
}
