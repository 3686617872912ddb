//! Acquire never hands out a cooling or capped credential.

use chrono::{Duration as ChronoDuration, Local, TimeZone};
use genloop::clock::ManualClock;
use genloop::limiter::{Credential, CredentialPool, LimiterConfig};
use genloop::store::MemoryRecordStore;
use genloop::types::Tier;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    RateLimit(usize),
    Advance(i64),
    Degrade,
    Recover,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => Just(Op::Acquire),
        1 => (0usize..3).prop_map(Op::RateLimit),
        2 => (0i64..90).prop_map(Op::Advance),
        1 => Just(Op::Degrade),
        1 => Just(Op::Recover),
    ]
}

proptest! {
    #[test]
    fn acquire_respects_cooldown_and_caps(ops in prop::collection::vec(op(), 1..80)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap());
        let config = LimiterConfig {
            min_interval_secs: 10,
            daily_cap: 3,
            cooldown_secs: 60,
            poll_interval_ms: 1,
            recover_every: 2,
        };
        let credentials = vec![
            Credential::new("a", "sa"),
            Credential::new("b", "sb").with_daily_cap(1),
            Credential::new("c", "sc"),
        ];
        let ids = ["a", "b", "c"];
        let pool = CredentialPool::new(
            credentials,
            config,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(clock.clone()),
        )
        .unwrap();

        for op in ops {
            match op {
                Op::Acquire => {
                    if let Some(lease) = runtime.block_on(pool.acquire(Duration::ZERO)) {
                        let snap = pool
                            .snapshot()
                            .into_iter()
                            .find(|s| s.id == lease.credential_id)
                            .unwrap();
                        prop_assert_eq!(snap.cooldown_remaining_secs, 0);
                        let used = match lease.tier {
                            Tier::Primary => snap.primary_calls,
                            Tier::Fallback => snap.fallback_calls,
                        };
                        prop_assert!(used < snap.daily_cap);
                        prop_assert_eq!(lease.tier, pool.tier());
                        pool.mark_used(&lease.credential_id, lease.tier).unwrap();
                    }
                }
                Op::RateLimit(index) => pool.mark_rate_limited(ids[index]).unwrap(),
                Op::Advance(secs) => clock.advance(ChronoDuration::seconds(secs)),
                Op::Degrade => {
                    pool.degrade_tier();
                }
                Op::Recover => {
                    pool.try_recover();
                }
            }
        }

        let snapshot = pool.snapshot();
        for s in &snapshot {
            prop_assert!(s.primary_calls <= s.daily_cap);
            prop_assert!(s.fallback_calls <= s.daily_cap);
        }
    }
}
