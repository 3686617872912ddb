//! Ledger totals equal the sum of recorded amounts within a period.

use chrono::{Duration, Local, TimeZone};
use genloop::clock::ManualClock;
use genloop::ledger::{CostLedger, CostLimits};
use genloop::store::MemoryRecordStore;
use genloop::types::{round_cost, Tier};
use proptest::prelude::*;
use std::sync::Arc;

fn charge() -> impl Strategy<Value = (f64, Tier)> {
    (
        (1u32..500).prop_map(|mills| mills as f64 / 1000.0),
        prop_oneof![Just(Tier::Primary), Just(Tier::Fallback)],
    )
}

fn ledger(clock: &ManualClock) -> CostLedger {
    CostLedger::new(
        Arc::new(MemoryRecordStore::new()),
        Arc::new(clock.clone()),
        CostLimits::default(),
    )
}

proptest! {
    #[test]
    fn daily_total_is_sum_of_charges(charges in prop::collection::vec(charge(), 0..50)) {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 10, 14, 8, 0, 0).unwrap());
        let ledger = ledger(&clock);
        let mut expected = 0.0;
        for (amount, tier) in &charges {
            ledger.add_cost(*amount, *tier).unwrap();
            expected = round_cost(expected + amount);
            clock.advance(Duration::minutes(1));
        }
        let summary = ledger.summary().unwrap();
        prop_assert!((summary.daily.total_cost - expected).abs() < 1e-6);
        prop_assert_eq!(summary.daily.total_cost, summary.monthly.total_cost);
        prop_assert_eq!(
            summary.daily.primary_count + summary.daily.fallback_count,
            charges.len() as u64
        );
    }

    #[test]
    fn day_boundary_resets_only_daily(
        before in prop::collection::vec(charge(), 1..20),
        after in prop::collection::vec(charge(), 0..20),
    ) {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 10, 14, 22, 0, 0).unwrap());
        let ledger = ledger(&clock);
        for (amount, tier) in &before {
            ledger.add_cost(*amount, *tier).unwrap();
        }
        let month_before = ledger.monthly_total().unwrap();

        clock.advance(Duration::hours(3));
        prop_assert_eq!(ledger.daily_total().unwrap(), 0.0);
        prop_assert!((ledger.monthly_total().unwrap() - month_before).abs() < 1e-9);

        let mut daily = 0.0;
        for (amount, tier) in &after {
            ledger.add_cost(*amount, *tier).unwrap();
            daily = round_cost(daily + amount);
        }
        prop_assert!((ledger.daily_total().unwrap() - daily).abs() < 1e-6);
        prop_assert!((ledger.monthly_total().unwrap() - (month_before + daily)).abs() < 1e-6);
    }
}
