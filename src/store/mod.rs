//! Durable record store
//!
//! Whole-record storage with atomic replace semantics. Every persisted piece of
//! controller state (active session, archives, cost ledger, per-credential
//! daily counters, item sequence) is one named record; a write either lands
//! completely or not at all.

pub mod file;
pub mod memory;
pub mod persistence;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;
pub use persistence::SledRecordStore;

use crate::error::{encoding_error, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Well-known record keys.
pub mod keys {
    pub const ACTIVE_SESSION: &str = "active-session";
    pub const COST_LEDGER: &str = "cost-ledger";
    pub const DAILY_COUNTS: &str = "daily-counts";
    pub const ITEM_SEQUENCE: &str = "item-sequence";
    pub const ARCHIVE_PREFIX: &str = "session-";
}

/// Record store interface
pub trait RecordStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Replace the whole record. Readers observe either the old or the new value.
    fn replace(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

pub type SharedStore = Arc<dyn RecordStore>;

pub fn load_json<T: DeserializeOwned>(
    store: &dyn RecordStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.load(key)? else {
        return Ok(None);
    };
    let parsed = serde_json::from_slice(&raw).map_err(|e| encoding_error(key, e))?;
    Ok(Some(parsed))
}

pub fn replace_json<T: Serialize>(
    store: &dyn RecordStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_vec_pretty(value).map_err(|e| encoding_error(key, e))?;
    store.replace(key, &raw)
}

/// Record keys map onto file names and sled keys alike.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
