//! Cost Ledger
//!
//! Durable daily and monthly spend accumulators. Each granularity rolls over
//! independently when the calendar key changes; every mutation rewrites the
//! whole ledger record before returning.

mod period;

pub use period::{reconcile, PeriodKeys, Rollover};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::StorageError;
use crate::store::{keys, load_json, replace_json, SharedStore};
use crate::types::{round_cost, Tier};

/// Spend caps in dollars. A cap of zero or less is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostLimits {
    #[serde(default = "default_daily_cap")]
    pub daily_cost_cap: f64,
    #[serde(default = "default_monthly_cap")]
    pub monthly_cost_cap: f64,
    #[serde(default)]
    pub session_cost_cap_default: Option<f64>,
}

fn default_daily_cap() -> f64 {
    50.0
}

fn default_monthly_cap() -> f64 {
    500.0
}

impl Default for CostLimits {
    fn default() -> Self {
        Self {
            daily_cost_cap: default_daily_cap(),
            monthly_cost_cap: default_monthly_cap(),
            session_cost_cap_default: None,
        }
    }
}

/// Spend accumulated within one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub period: String,
    pub primary_count: u64,
    pub primary_cost: f64,
    pub fallback_count: u64,
    pub fallback_cost: f64,
    pub total_cost: f64,
}

impl CostRecord {
    pub fn empty(period: &str) -> Self {
        Self {
            period: period.to_string(),
            primary_count: 0,
            primary_cost: 0.0,
            fallback_count: 0,
            fallback_cost: 0.0,
            total_cost: 0.0,
        }
    }

    pub fn add(&mut self, amount: f64, tier: Tier) {
        match tier {
            Tier::Primary => {
                self.primary_count += 1;
                self.primary_cost = round_cost(self.primary_cost + amount);
            }
            Tier::Fallback => {
                self.fallback_count += 1;
                self.fallback_cost = round_cost(self.fallback_cost + amount);
            }
        }
        // Derived, never accumulated separately, so it always equals the tier sum.
        self.total_cost = self.primary_cost + self.fallback_cost;
    }

    pub fn count(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Primary => self.primary_count,
            Tier::Fallback => self.fallback_count,
        }
    }
}

/// The persisted ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub limits: CostLimits,
    pub daily: CostRecord,
    pub monthly: CostRecord,
}

impl LedgerRecord {
    pub fn new(limits: CostLimits, keys: &PeriodKeys) -> Self {
        Self {
            limits,
            daily: CostRecord::empty(&keys.day),
            monthly: CostRecord::empty(&keys.month),
        }
    }
}

/// Totals against caps, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub daily: CostRecord,
    pub monthly: CostRecord,
    pub limits: CostLimits,
}

impl LedgerSummary {
    pub fn to_text(&self) -> String {
        format!(
            "daily: ${:.2} / ${:.2} (primary {}, fallback {})\nmonthly: ${:.2} / ${:.2} (primary {}, fallback {})",
            self.daily.total_cost,
            self.limits.daily_cost_cap,
            self.daily.primary_count,
            self.daily.fallback_count,
            self.monthly.total_cost,
            self.limits.monthly_cost_cap,
            self.monthly.primary_count,
            self.monthly.fallback_count,
        )
    }
}

pub struct CostLedger {
    store: SharedStore,
    clock: SharedClock,
    default_limits: CostLimits,
}

impl CostLedger {
    /// `default_limits` seed the ledger the first time it is created; after
    /// that the stored limits are authoritative.
    pub fn new(store: SharedStore, clock: SharedClock, default_limits: CostLimits) -> Self {
        Self {
            store,
            clock,
            default_limits,
        }
    }

    /// Load the record and reconcile it against the current calendar.
    fn current(&self) -> Result<LedgerRecord, StorageError> {
        let keys = PeriodKeys::at(&self.clock.now());
        let mut record = match load_json::<LedgerRecord>(self.store.as_ref(), keys::COST_LEDGER)? {
            Some(record) => record,
            None => LedgerRecord::new(self.default_limits, &keys),
        };
        let rollover = reconcile(&mut record, &keys);
        if rollover.any() {
            debug!(
                daily = rollover.daily,
                monthly = rollover.monthly,
                day = %keys.day,
                "cost ledger period rolled over"
            );
        }
        Ok(record)
    }

    fn persist(&self, record: &LedgerRecord) -> Result<(), StorageError> {
        replace_json(self.store.as_ref(), keys::COST_LEDGER, record)
    }

    /// Record one billed unit. Call exactly once per unit.
    pub fn add_cost(&self, amount: f64, tier: Tier) -> Result<LedgerRecord, StorageError> {
        let mut record = self.current()?;
        record.daily.add(amount, tier);
        record.monthly.add(amount, tier);
        self.persist(&record)?;
        debug!(
            cost = amount,
            tier = %tier,
            daily_total = record.daily.total_cost,
            monthly_total = record.monthly.total_cost,
            "cost recorded"
        );
        Ok(record)
    }

    pub fn daily_total(&self) -> Result<f64, StorageError> {
        Ok(self.current()?.daily.total_cost)
    }

    pub fn monthly_total(&self) -> Result<f64, StorageError> {
        Ok(self.current()?.monthly.total_cost)
    }

    pub fn limits(&self) -> Result<CostLimits, StorageError> {
        Ok(self.current()?.limits)
    }

    /// Update either cap; `None` leaves it unchanged.
    pub fn set_limits(
        &self,
        daily_cap: Option<f64>,
        monthly_cap: Option<f64>,
    ) -> Result<CostLimits, StorageError> {
        let mut record = self.current()?;
        if let Some(cap) = daily_cap {
            record.limits.daily_cost_cap = cap;
        }
        if let Some(cap) = monthly_cap {
            record.limits.monthly_cost_cap = cap;
        }
        self.persist(&record)?;
        info!(
            daily_cap = record.limits.daily_cost_cap,
            monthly_cap = record.limits.monthly_cost_cap,
            "cost limits updated"
        );
        Ok(record.limits)
    }

    pub fn summary(&self) -> Result<LedgerSummary, StorageError> {
        let record = self.current()?;
        Ok(LedgerSummary {
            daily: record.daily,
            monthly: record.monthly,
            limits: record.limits,
        })
    }
}
