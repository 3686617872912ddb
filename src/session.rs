//! Session State Store
//!
//! Single source of truth for the in-progress batch. One session record lives
//! in the well-known active slot; closing relocates it to an immutable archive
//! record and frees the slot. Every mutation is a read-modify-write of the
//! whole record through [`RecordStore::replace`].

pub mod lock;
pub mod state;

pub use lock::{ProcessLock, LOCK_FILE_NAME};
pub use state::{
    truncate_error, ItemSequence, ItemStatus, Progress, SessionSettings, SessionState, WorkItem,
    MAX_ERROR_CHARS,
};

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{SessionError, StorageError};
use crate::store::{keys, load_json, replace_json, RecordStore, SharedStore};
use crate::types::Tier;

/// Result of inspecting the active slot at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeCheck {
    /// Slot empty.
    Fresh,
    /// An interrupted session with pending items.
    Resumable(SessionState),
    /// The slot held a session whose archive already existed; slot cleared.
    ClearedStale { session_id: String },
    /// The slot held a session with nothing pending; archived as complete.
    ArchivedComplete { session_id: String },
}

pub struct SessionStore {
    store: SharedStore,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    fn records(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn current(&self) -> Result<Option<SessionState>, SessionError> {
        Ok(load_json(self.records(), keys::ACTIVE_SESSION)?)
    }

    fn require_active(&self) -> Result<SessionState, SessionError> {
        self.current()?.ok_or(SessionError::NoActiveSession)
    }

    fn write_active(&self, state: &SessionState) -> Result<(), SessionError> {
        replace_json(self.records(), keys::ACTIVE_SESSION, state)?;
        Ok(())
    }

    fn write_archive(&self, key: &str, state: &SessionState) -> Result<(), SessionError> {
        if self.records().exists(key)? {
            return Err(StorageError::ArchiveExists(key.to_string()).into());
        }
        replace_json(self.records(), key, state)?;
        Ok(())
    }

    /// Reserve `count` item ids for today.
    fn allocate_item_ids(&self, count: usize) -> Result<Vec<String>, SessionError> {
        let day = self.clock.now().format("%y%m%d").to_string();
        let start = match load_json::<ItemSequence>(self.records(), keys::ITEM_SEQUENCE)? {
            Some(seq) if seq.day == day => seq.last,
            _ => 0,
        };
        let last = start + count as u32;
        replace_json(
            self.records(),
            keys::ITEM_SEQUENCE,
            &ItemSequence {
                day: day.clone(),
                last,
            },
        )?;
        Ok((start + 1..=last)
            .map(|n| format!("{}_{:04}", day, n))
            .collect())
    }

    /// Start a session over `payloads`, all pending.
    pub fn create(
        &self,
        payloads: Vec<serde_json::Value>,
        settings: SessionSettings,
    ) -> Result<SessionState, SessionError> {
        if let Some(existing) = self.current()? {
            return Err(SessionError::ActiveExists(existing.session_id));
        }
        let now = self.clock.now();
        let ids = self.allocate_item_ids(payloads.len())?;
        let items = ids
            .into_iter()
            .zip(payloads)
            .map(|(id, payload)| WorkItem {
                id,
                payload,
                status: ItemStatus::Pending,
                error: None,
            })
            .collect::<Vec<_>>();

        let state = SessionState {
            session_id: format!("ses_{}", now.format("%y%m%d_%H%M%S")),
            created_at: now,
            settings,
            items,
            progress: Progress::default(),
            stop_reason: None,
            ended_at: None,
            archived_at: None,
            total_calls: None,
        };
        self.write_active(&state)?;
        info!(
            session_id = %state.session_id,
            items = state.items.len(),
            "session created"
        );
        Ok(state)
    }

    /// Inspect the active slot on startup.
    pub fn check_for_resume(&self) -> Result<ResumeCheck, SessionError> {
        let Some(mut state) = self.current()? else {
            return Ok(ResumeCheck::Fresh);
        };

        if self.records().exists(&state.archive_key())?
            || self.records().exists(&state.abandoned_key())?
        {
            warn!(session_id = %state.session_id, "active slot held an already archived session");
            self.records().remove(keys::ACTIVE_SESSION)?;
            return Ok(ResumeCheck::ClearedStale {
                session_id: state.session_id,
            });
        }

        if state.pending_count() == 0 {
            let now = self.clock.now();
            state.stop_reason = Some("complete".to_string());
            state.ended_at.get_or_insert(now);
            self.write_archive(&state.archive_key(), &state)?;
            self.records().remove(keys::ACTIVE_SESSION)?;
            info!(session_id = %state.session_id, "archived finished session left in active slot");
            return Ok(ResumeCheck::ArchivedComplete {
                session_id: state.session_id,
            });
        }

        Ok(ResumeCheck::Resumable(state))
    }

    /// Archive the active session as abandoned and free the slot.
    pub fn discard(&self) -> Result<SessionState, SessionError> {
        let mut state = self.require_active()?;
        state.stop_reason = Some("abandoned".to_string());
        state.archived_at = Some(self.clock.now());
        self.write_archive(&state.abandoned_key(), &state)?;
        self.records().remove(keys::ACTIVE_SESSION)?;
        info!(
            session_id = %state.session_id,
            pending = state.pending_count(),
            "session discarded"
        );
        Ok(state)
    }

    /// Resolve one item. Only pending items may move, and only to done or
    /// failed.
    pub fn update_progress(
        &self,
        item_id: &str,
        status: ItemStatus,
        cost: f64,
        tier: Tier,
        error: Option<&str>,
    ) -> Result<SessionState, SessionError> {
        let mut state = self.require_active()?;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| SessionError::ItemNotFound(item_id.to_string()))?;

        if !item.status.can_transition_to(status) {
            return Err(SessionError::InvalidTransition {
                item_id: item_id.to_string(),
                from: item.status.to_string(),
                to: status.to_string(),
            });
        }
        item.status = status;
        if let Some(message) = error {
            item.error = Some(truncate_error(message));
        }

        match status {
            ItemStatus::Done => state.progress.record_done(cost, tier),
            ItemStatus::Failed => state.progress.record_failed(),
            ItemStatus::Pending => {}
        }
        self.write_active(&state)?;
        debug!(
            session_id = %state.session_id,
            item_id,
            status = %status,
            generated = state.progress.generated,
            failed = state.progress.failed,
            "item checkpointed"
        );
        Ok(state)
    }

    /// Move the active session to its archive and free the slot.
    pub fn close(
        &self,
        reason: &str,
        total_calls: Option<u64>,
    ) -> Result<SessionState, SessionError> {
        let mut state = self.require_active()?;
        state.stop_reason = Some(reason.to_string());
        state.ended_at = Some(self.clock.now());
        if let Some(calls) = total_calls {
            state.total_calls = Some(calls);
        }
        self.write_archive(&state.archive_key(), &state)?;
        self.records().remove(keys::ACTIVE_SESSION)?;
        info!(
            session_id = %state.session_id,
            reason,
            generated = state.progress.generated,
            failed = state.progress.failed,
            session_cost = state.progress.session_cost,
            "session closed"
        );
        Ok(state)
    }

    pub fn pending_items(&self) -> Result<Vec<WorkItem>, SessionError> {
        Ok(self
            .current()?
            .map(|s| s.pending_items())
            .unwrap_or_default())
    }

    /// All archived sessions, oldest first.
    pub fn list_archives(&self) -> Result<Vec<SessionState>, SessionError> {
        let mut archives = Vec::new();
        for key in self.records().list(keys::ARCHIVE_PREFIX)? {
            if let Some(state) = load_json::<SessionState>(self.records(), &key)? {
                archives.push(state);
            }
        }
        archives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(archives)
    }
}
