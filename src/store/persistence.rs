//! Sled-backed record store

use crate::error::{sled_error, StorageError};
use crate::store::{validate_key, RecordStore};
use std::path::Path;

/// Sled-based implementation of RecordStore
///
/// Each record is a single key in one tree, so `replace` is a single atomic
/// insert. The database is flushed after every mutation so a crash never loses
/// an acknowledged checkpoint.
pub struct SledRecordStore {
    db: sled::Db,
}

impl SledRecordStore {
    /// Open (or create) a sled database at the given directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(sled_error)?;
        Ok(())
    }
}

impl RecordStore for SledRecordStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let value = self.db.get(key.as_bytes()).map_err(sled_error)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.db.contains_key(key.as_bytes()).map_err(sled_error)
    }

    fn replace(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.db.insert(key.as_bytes(), value).map_err(sled_error)?;
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.db.remove(key.as_bytes()).map_err(sled_error)?;
        self.flush()
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(sled_error)?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }
}
