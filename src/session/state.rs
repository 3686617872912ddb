//! Session record types.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{round_cost, Tier};

/// Longest error message kept on a failed item, in characters.
pub const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Done,
    Failed,
}

impl ItemStatus {
    /// Pending may move to Done or Failed; nothing moves back.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Done) | (ItemStatus::Pending, ItemStatus::Failed)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// `YYMMDD_NNNN`, unique within a calendar day.
    pub id: String,
    pub payload: serde_json::Value,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub generated: u64,
    pub failed: u64,
    pub primary_count: u64,
    pub fallback_count: u64,
    pub session_cost: f64,
}

impl Progress {
    pub(crate) fn record_done(&mut self, cost: f64, tier: Tier) {
        self.generated += 1;
        self.session_cost = round_cost(self.session_cost + cost);
        match tier {
            Tier::Primary => self.primary_count += 1,
            Tier::Fallback => self.fallback_count += 1,
        }
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn attempted(&self) -> u64 {
        self.generated + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Zero or less is unbounded.
    pub target_count: i64,
    /// Zero or less is unbounded.
    #[serde(default)]
    pub max_duration_hours: f64,
    #[serde(default)]
    pub session_cost_cap: Option<f64>,
    #[serde(default)]
    pub batch: bool,
}

impl SessionSettings {
    pub fn sequential(target_count: i64) -> Self {
        Self {
            target_count,
            max_duration_hours: 0.0,
            session_cost_cap: None,
            batch: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Local>,
    pub settings: SessionSettings,
    pub items: Vec<WorkItem>,
    pub progress: Progress,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub total_calls: Option<u64>,
}

impl SessionState {
    fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn pending_count(&self) -> usize {
        self.count(ItemStatus::Pending)
    }

    pub fn done_count(&self) -> usize {
        self.count(ItemStatus::Done)
    }

    pub fn failed_count(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    /// Earliest pending item, in creation order.
    pub fn next_pending(&self) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.status == ItemStatus::Pending)
    }

    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Pending)
            .cloned()
            .collect()
    }

    /// Archive key for a normal close.
    pub fn archive_key(&self) -> String {
        format!("{}{}", crate::store::keys::ARCHIVE_PREFIX, self.session_id)
    }

    /// Archive key for a discarded session.
    pub fn abandoned_key(&self) -> String {
        format!("{}-archived", self.archive_key())
    }
}

/// Per-day item sequence, persisted so ids never repeat within a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSequence {
    /// `YYMMDD`
    pub day: String,
    pub last: u32,
}

pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}
