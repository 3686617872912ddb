//! Calendar period keys and lazy rollover.

use chrono::{DateTime, TimeZone};

use crate::ledger::{CostRecord, LedgerRecord};

/// Calendar keys for the day and month containing an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKeys {
    /// `YYYY-MM-DD`
    pub day: String,
    /// `YYYY-MM`
    pub month: String,
}

impl PeriodKeys {
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            day: now.format("%Y-%m-%d").to_string(),
            month: now.format("%Y-%m").to_string(),
        }
    }
}

/// Which accumulators a reconciliation reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollover {
    pub daily: bool,
    pub monthly: bool,
}

impl Rollover {
    pub fn any(self) -> bool {
        self.daily || self.monthly
    }
}

/// Reset each granularity whose stored key differs from `keys`. The other
/// granularity is left untouched.
pub fn reconcile(record: &mut LedgerRecord, keys: &PeriodKeys) -> Rollover {
    let mut rollover = Rollover::default();
    if record.daily.period != keys.day {
        record.daily = CostRecord::empty(&keys.day);
        rollover.daily = true;
    }
    if record.monthly.period != keys.month {
        record.monthly = CostRecord::empty(&keys.month);
        rollover.monthly = true;
    }
    rollover
}
