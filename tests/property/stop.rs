//! The evaluator checks conditions in fixed priority order.

use genloop::stop::{evaluate, StopDecision, StopInputs, StopReason};
use genloop::types::{Pricing, Tier};
use proptest::prelude::*;

fn inputs() -> impl Strategy<Value = StopInputs> {
    (
        (0u64..20, -2i64..20),
        (0.0f64..10_000.0, -1.0f64..3.0),
        (0.0f64..20.0, prop::option::of(-1.0f64..20.0)),
        (0.0f64..60.0, -1.0f64..60.0),
        (0.0f64..600.0, -1.0f64..600.0),
        any::<bool>(),
        prop_oneof![Just(Tier::Primary), Just(Tier::Fallback)],
        any::<bool>(),
    )
        .prop_map(
            |(
                (generated, target_count),
                (elapsed_secs, max_duration_hours),
                (session_cost, session_cost_cap),
                (daily_total, daily_cap),
                (monthly_total, monthly_cap),
                all_exhausted,
                next_tier,
                batch,
            )| StopInputs {
                generated,
                target_count,
                elapsed_secs,
                max_duration_hours,
                session_cost,
                session_cost_cap,
                daily_total,
                daily_cap,
                monthly_total,
                monthly_cap,
                all_exhausted,
                next_tier,
                batch,
            },
        )
}

proptest! {
    #[test]
    fn reached_target_always_wins(i in inputs()) {
        prop_assume!(i.target_count > 0);
        let mut i = i;
        i.generated = i.generated.max(i.target_count as u64);
        let decision = evaluate(&i, &Pricing::default());
        let is_target = matches!(
            decision,
            StopDecision::Stop(StopReason::TargetReached { .. })
        );
        prop_assert!(is_target);
    }

    #[test]
    fn exhaustion_only_reported_when_nothing_else_applies(i in inputs()) {
        let decision = evaluate(&i, &Pricing::default());
        if decision == StopDecision::Stop(StopReason::Exhausted) {
            let mut cleared = i.clone();
            cleared.all_exhausted = false;
            prop_assert_eq!(evaluate(&cleared, &Pricing::default()), StopDecision::Continue);
        }
        if !i.all_exhausted {
            prop_assert_ne!(decision, StopDecision::Stop(StopReason::Exhausted));
        }
    }
}

fn custom_pricing() -> Pricing {
    Pricing {
        primary: 0.6,
        fallback: 0.4,
        primary_batch: 0.3,
        fallback_batch: 0.2,
    }
}

fn near_daily_cap(next_tier: Tier) -> StopInputs {
    StopInputs {
        generated: 3,
        target_count: 0,
        elapsed_secs: 60.0,
        max_duration_hours: 0.0,
        session_cost: 0.0,
        session_cost_cap: None,
        daily_total: 9.5,
        daily_cap: 10.0,
        monthly_total: 9.5,
        monthly_cap: 500.0,
        all_exhausted: false,
        next_tier,
        batch: false,
    }
}

#[test]
fn daily_cap_accounts_for_next_unit() {
    let pricing = custom_pricing();
    assert_eq!(
        evaluate(&near_daily_cap(Tier::Primary), &pricing),
        StopDecision::Stop(StopReason::DailyCostCap { cap: 10.0 })
    );
    assert_eq!(
        evaluate(&near_daily_cap(Tier::Fallback), &pricing),
        StopDecision::Continue
    );
}
