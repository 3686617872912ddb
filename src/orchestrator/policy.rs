//! Loop policy knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which call counter the overhead guard compares against attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverheadScope {
    /// Calls issued since this run began, against attempts made in this run.
    #[default]
    Session,
    /// The pool's persisted per-day counters, against every attempt recorded
    /// in the session.
    PoolLifetime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPolicy {
    #[serde(default = "default_consecutive_failure_limit")]
    pub consecutive_failure_limit: u32,
    /// Extra calls allowed per attempt before the guard trips.
    #[serde(default = "default_overhead_ratio")]
    pub overhead_ratio: f64,
    #[serde(default = "default_overhead_min_sample")]
    pub overhead_min_sample: u64,
    #[serde(default)]
    pub overhead_scope: OverheadScope,
    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: u64,
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Calls per item when the backend keeps signalling quota errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Acquire timeout after a quota error.
    #[serde(default = "default_retry_acquire_timeout_secs")]
    pub retry_acquire_timeout_secs: u64,
}

fn default_consecutive_failure_limit() -> u32 {
    5
}

fn default_overhead_ratio() -> f64 {
    0.5
}

fn default_overhead_min_sample() -> u64 {
    10
}

fn default_delay_min_secs() -> u64 {
    30
}

fn default_delay_max_secs() -> u64 {
    60
}

fn default_report_interval_secs() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_acquire_timeout_secs() -> u64 {
    180
}

fn default_retry_acquire_timeout_secs() -> u64 {
    120
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            consecutive_failure_limit: default_consecutive_failure_limit(),
            overhead_ratio: default_overhead_ratio(),
            overhead_min_sample: default_overhead_min_sample(),
            overhead_scope: OverheadScope::default(),
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            report_interval_secs: default_report_interval_secs(),
            max_retries: default_max_retries(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            retry_acquire_timeout_secs: default_retry_acquire_timeout_secs(),
        }
    }
}

impl LoopPolicy {
    /// No delays and short timeouts, for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            delay_min_secs: 0,
            delay_max_secs: 0,
            acquire_timeout_secs: 0,
            retry_acquire_timeout_secs: 0,
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn retry_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_acquire_timeout_secs)
    }

    pub fn report_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.report_interval_secs as i64)
    }

    /// True once enough attempts exist and calls beyond one per attempt
    /// exceed `overhead_ratio` of attempts.
    pub fn overhead_exceeded(&self, calls: u64, attempts: u64) -> bool {
        if attempts < self.overhead_min_sample || attempts == 0 {
            return false;
        }
        let extra = calls.saturating_sub(attempts) as f64;
        extra > attempts as f64 * self.overhead_ratio
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.delay_min_secs > self.delay_max_secs {
            return Err("delay_min_secs must not exceed delay_max_secs".to_string());
        }
        if !self.overhead_ratio.is_finite() || self.overhead_ratio < 0.0 {
            return Err("overhead_ratio must be a non-negative number".to_string());
        }
        if self.consecutive_failure_limit == 0 {
            return Err("consecutive_failure_limit must be at least 1".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        Ok(())
    }
}
