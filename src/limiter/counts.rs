//! Persisted per-credential, per-tier daily call counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Tier;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounts {
    /// Calendar day (`YYYY-MM-DD`) the counters belong to.
    pub day: String,
    /// `"{credential}:{tier}"` to calls issued that day.
    pub counts: BTreeMap<String, u32>,
}

impl DailyCounts {
    pub fn for_day(day: &str) -> Self {
        Self {
            day: day.to_string(),
            counts: BTreeMap::new(),
        }
    }

    fn slot(credential_id: &str, tier: Tier) -> String {
        format!("{}:{}", credential_id, tier.as_str())
    }

    /// Reset when the day changed. Returns true if it did.
    pub fn roll_to(&mut self, day: &str) -> bool {
        if self.day == day {
            return false;
        }
        *self = Self::for_day(day);
        true
    }

    pub fn get(&self, credential_id: &str, tier: Tier) -> u32 {
        self.counts
            .get(&Self::slot(credential_id, tier))
            .copied()
            .unwrap_or(0)
    }

    pub fn increment(&mut self, credential_id: &str, tier: Tier) -> u32 {
        let count = self.counts.entry(Self::slot(credential_id, tier)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| u64::from(*c)).sum()
    }
}
