//! Credential Pool / Rate Limiter
//!
//! Selects the credential and quality tier for the next external call. A
//! credential is eligible under a tier when it is not cooling down after a
//! rate-limit signal, its tier-scoped daily counter is under its cap, and at
//! least `min_interval` has passed since it was last used.
//!
//! Daily counters are persisted through the record store so caps hold across
//! restarts; cool-down and last-use state is process-local.

mod counts;
mod credential;

pub use counts::DailyCounts;
pub use credential::{Credential, CredentialSnapshot, Lease};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::StorageError;
use crate::ledger::PeriodKeys;
use crate::store::{keys, load_json, replace_json, SharedStore};
use crate::types::Tier;
use credential::CredentialState;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Limiter policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Daily cap per credential and tier, unless the credential overrides it.
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Recovery to Primary is attempted on every Nth Fallback success.
    #[serde(default = "default_recover_every")]
    pub recover_every: u32,
}

fn default_min_interval_secs() -> u64 {
    20
}

fn default_daily_cap() -> u32 {
    40
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_recover_every() -> u32 {
    10
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            daily_cap: default_daily_cap(),
            cooldown_secs: default_cooldown_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            recover_every: default_recover_every(),
        }
    }
}

impl LimiterConfig {
    fn min_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_interval_secs as i64)
    }

    fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

struct PoolState {
    credentials: Vec<CredentialState>,
    next_index: usize,
    tier: Tier,
    exhausted: bool,
    fallback_successes: u32,
    counts: DailyCounts,
    session_calls: u64,
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
    config: LimiterConfig,
    store: SharedStore,
    clock: SharedClock,
}

impl CredentialPool {
    pub fn new(
        credentials: Vec<Credential>,
        config: LimiterConfig,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, LimiterError> {
        let day = PeriodKeys::at(&clock.now()).day;
        let mut counts = load_json::<DailyCounts>(store.as_ref(), keys::DAILY_COUNTS)?
            .unwrap_or_else(|| DailyCounts::for_day(&day));
        counts.roll_to(&day);

        info!(credentials = credentials.len(), "credential pool loaded");
        Ok(Self {
            state: Mutex::new(PoolState {
                credentials: credentials.into_iter().map(CredentialState::new).collect(),
                next_index: 0,
                tier: Tier::Primary,
                exhausted: false,
                fallback_successes: 0,
                counts,
                session_calls: 0,
            }),
            config,
            store,
            clock,
        })
    }

    fn cap_for(&self, state: &CredentialState) -> u32 {
        state.credential.daily_cap.unwrap_or(self.config.daily_cap)
    }

    fn capped(&self, counts: &DailyCounts, state: &CredentialState, tier: Tier) -> bool {
        counts.get(state.id(), tier) >= self.cap_for(state)
    }

    fn eligible(
        &self,
        counts: &DailyCounts,
        state: &CredentialState,
        tier: Tier,
        now: DateTime<Local>,
    ) -> bool {
        !state.cooling_down(now)
            && !self.capped(counts, state, tier)
            && !state.within_interval(now, self.config.min_interval())
    }

    fn roll_counts(&self, pool: &mut PoolState, now: DateTime<Local>) {
        let day = PeriodKeys::at(&now).day;
        if pool.counts.roll_to(&day) {
            debug!(day = %day, "daily credential counters reset");
        }
    }

    /// One round-robin pass starting after the last returned index.
    fn try_acquire(&self) -> Option<Lease> {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        self.roll_counts(&mut pool, now);
        let n = pool.credentials.len();
        let tier = pool.tier;
        for _ in 0..n {
            let index = pool.next_index % n;
            pool.next_index = (index + 1) % n;
            let candidate = &pool.credentials[index];
            if self.eligible(&pool.counts, candidate, tier, now) {
                return Some(Lease {
                    credential_id: candidate.credential.id.clone(),
                    secret: candidate.credential.secret.clone(),
                    tier,
                });
            }
        }
        None
    }

    /// True when waiting cannot help before the day changes.
    fn all_capped_under_current_tier(&self) -> bool {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        self.roll_counts(&mut pool, now);
        let tier = pool.tier;
        pool.credentials
            .iter()
            .all(|c| self.capped(&pool.counts, c, tier))
    }

    /// Wait for an eligible credential under the current tier.
    ///
    /// Polls every `poll_interval` until one becomes eligible or `timeout`
    /// elapses. Returns `None` immediately when no credentials are configured
    /// or every credential has hit its cap for the current tier.
    pub async fn acquire(&self, timeout: Duration) -> Option<Lease> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire() {
                debug!(credential = %lease.credential_id, tier = %lease.tier, "credential acquired");
                return Some(lease);
            }
            if self.all_capped_under_current_tier() {
                debug!("every credential capped under current tier");
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(timeout_secs = timeout.as_secs(), "credential acquire timed out");
                return None;
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Record a call issued with `credential_id` on `tier`.
    pub fn mark_used(&self, credential_id: &str, tier: Tier) -> Result<u32, LimiterError> {
        let now = self.clock.now();
        let (count, snapshot) = {
            let mut pool = self.state.lock();
            self.roll_counts(&mut pool, now);
            let state = pool
                .credentials
                .iter_mut()
                .find(|c| c.id() == credential_id)
                .ok_or_else(|| LimiterError::UnknownCredential(credential_id.to_string()))?;
            state.last_used = Some(now);
            let count = pool.counts.increment(credential_id, tier);
            pool.session_calls += 1;
            (count, pool.counts.clone())
        };
        replace_json(self.store.as_ref(), keys::DAILY_COUNTS, &snapshot)?;
        debug!(credential = %credential_id, tier = %tier, daily_count = count, "credential used");
        Ok(count)
    }

    /// Start the cool-down window for `credential_id`.
    pub fn mark_rate_limited(&self, credential_id: &str) -> Result<(), LimiterError> {
        let until = self.clock.now() + self.config.cooldown();
        let mut pool = self.state.lock();
        let state = pool
            .credentials
            .iter_mut()
            .find(|c| c.id() == credential_id)
            .ok_or_else(|| LimiterError::UnknownCredential(credential_id.to_string()))?;
        state.rate_limited_until = Some(until);
        warn!(
            credential = %credential_id,
            cooldown_secs = self.config.cooldown_secs,
            "credential rate limited"
        );
        Ok(())
    }

    pub fn tier(&self) -> Tier {
        self.state.lock().tier
    }

    /// Switch to Fallback. Returns false when already there.
    pub fn degrade_tier(&self) -> bool {
        let mut pool = self.state.lock();
        if pool.tier == Tier::Fallback {
            return false;
        }
        pool.tier = Tier::Fallback;
        pool.fallback_successes = 0;
        info!(from = %Tier::Primary, to = %Tier::Fallback, "tier degraded");
        true
    }

    /// Count a Fallback success and, on every Nth one, return to Primary if
    /// some credential is eligible there right now.
    pub fn try_recover(&self) -> bool {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        if pool.tier != Tier::Fallback {
            return false;
        }
        pool.fallback_successes += 1;
        let every = self.config.recover_every.max(1);
        if pool.fallback_successes % every != 0 {
            return false;
        }
        self.roll_counts(&mut pool, now);
        let primary_ready = pool
            .credentials
            .iter()
            .any(|c| self.eligible(&pool.counts, c, Tier::Primary, now));
        if primary_ready {
            pool.tier = Tier::Primary;
            pool.fallback_successes = 0;
            info!(from = %Tier::Fallback, to = %Tier::Primary, "tier recovered");
        }
        primary_ready
    }

    /// Latch the exhausted condition until the next reload or session.
    pub fn mark_exhausted(&self) {
        let mut pool = self.state.lock();
        if !pool.exhausted {
            warn!("credential pool exhausted");
        }
        pool.exhausted = true;
    }

    /// Every credential is unusable under every tier: cooling down or capped.
    /// The minimum interval is ignored since it always resolves by waiting.
    pub fn is_exhausted(&self) -> bool {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        if pool.exhausted {
            return true;
        }
        self.roll_counts(&mut pool, now);
        pool.credentials.iter().all(|c| {
            c.cooling_down(now) || Tier::ALL.iter().all(|t| self.capped(&pool.counts, c, *t))
        })
    }

    /// Replace the configured credentials, keeping runtime state for ids that
    /// remain.
    pub fn reload(&self, credentials: Vec<Credential>) {
        let mut pool = self.state.lock();
        let previous = std::mem::take(&mut pool.credentials);
        pool.credentials = credentials
            .into_iter()
            .map(|credential| {
                match previous.iter().find(|p| p.credential.id == credential.id) {
                    Some(existing) => CredentialState {
                        credential,
                        last_used: existing.last_used,
                        rate_limited_until: existing.rate_limited_until,
                    },
                    None => CredentialState::new(credential),
                }
            })
            .collect();
        pool.next_index = 0;
        pool.exhausted = false;
        info!(credentials = pool.credentials.len(), "credential pool reloaded");
    }

    pub fn len(&self) -> usize {
        self.state.lock().credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        self.roll_counts(&mut pool, now);
        pool.credentials
            .iter()
            .map(|c| CredentialSnapshot {
                id: c.credential.id.clone(),
                daily_cap: self.cap_for(c),
                primary_calls: pool.counts.get(c.id(), Tier::Primary),
                fallback_calls: pool.counts.get(c.id(), Tier::Fallback),
                cooldown_remaining_secs: c
                    .rate_limited_until
                    .map(|until| (until - now).num_seconds().max(0))
                    .unwrap_or(0),
                last_used: c.last_used,
            })
            .collect()
    }

    /// Calls issued today across all credentials, including earlier processes.
    pub fn total_calls_today(&self) -> u64 {
        let now = self.clock.now();
        let mut pool = self.state.lock();
        self.roll_counts(&mut pool, now);
        pool.counts.total()
    }

    /// Calls issued since the last `begin_session_accounting`.
    pub fn session_calls(&self) -> u64 {
        self.state.lock().session_calls
    }

    pub fn begin_session_accounting(&self) {
        let mut pool = self.state.lock();
        pool.session_calls = 0;
        pool.exhausted = false;
    }
}
