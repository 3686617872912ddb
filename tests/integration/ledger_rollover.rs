//! Ledger persistence and calendar rollover over a file store.

use chrono::{Duration, Local, TimeZone};
use genloop::clock::ManualClock;
use genloop::ledger::{CostLedger, CostLimits};
use genloop::store::{FileRecordStore, SharedStore};
use genloop::types::Tier;
use std::sync::Arc;
use tempfile::TempDir;

fn ledger(dir: &TempDir, clock: &ManualClock) -> CostLedger {
    let store: SharedStore = Arc::new(FileRecordStore::new(dir.path()).unwrap());
    CostLedger::new(store, Arc::new(clock.clone()), CostLimits::default())
}

#[test]
fn month_end_resets_both_periods_then_day_resets_only_daily() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 9, 30, 23, 58, 0).unwrap());

    ledger(&dir, &clock).add_cost(1.0, Tier::Primary).unwrap();
    ledger(&dir, &clock).add_cost(0.5, Tier::Fallback).unwrap();
    let reopened = ledger(&dir, &clock);
    assert_eq!(reopened.daily_total().unwrap(), 1.5);
    assert_eq!(reopened.monthly_total().unwrap(), 1.5);

    clock.advance(Duration::minutes(5));
    assert_eq!(reopened.daily_total().unwrap(), 0.0);
    assert_eq!(reopened.monthly_total().unwrap(), 0.0);

    reopened.add_cost(2.0, Tier::Primary).unwrap();
    clock.advance(Duration::days(1));
    let summary = ledger(&dir, &clock).summary().unwrap();
    assert_eq!(summary.daily.total_cost, 0.0);
    assert_eq!(summary.daily.period, "2026-10-02");
    assert_eq!(summary.monthly.total_cost, 2.0);
    assert_eq!(summary.monthly.primary_count, 1);
}

#[test]
fn limits_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap());
    ledger(&dir, &clock).set_limits(Some(10.0), None).unwrap();

    let limits = ledger(&dir, &clock).limits().unwrap();
    assert_eq!(limits.daily_cost_cap, 10.0);
    assert_eq!(limits.monthly_cost_cap, 500.0);
}
