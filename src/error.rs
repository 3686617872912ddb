//! Error types for the generation session controller.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Archive record already exists: {0}")]
    ArchiveExists(String),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Record encoding failed for {key}: {message}")]
    Encoding { key: String, message: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No active session")]
    NoActiveSession,

    #[error("An active session already exists: {0}")]
    ActiveExists(String),

    #[error("Work item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid status transition for {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: String,
        to: String,
    },

    #[error("Another orchestrator already holds the active session (pid {pid})")]
    LockHeld { pid: u32 },

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Top-level error for orchestrator operations
#[derive(Debug, Error)]
pub enum GenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Limiter error: {0}")]
    LimiterError(#[from] crate::limiter::LimiterError),

    #[error("Input error: {0}")]
    InputError(String),
}

impl GenError {
    /// Configuration problems are the only failures that map to a non-zero exit.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GenError::ConfigError(_)
                | GenError::InputError(_)
                | GenError::SessionError(SessionError::LockHeld { .. })
        )
    }
}

impl From<config::ConfigError> for GenError {
    fn from(err: config::ConfigError) -> Self {
        GenError::ConfigError(err.to_string())
    }
}

pub(crate) fn encoding_error(key: &str, err: serde_json::Error) -> StorageError {
    StorageError::Encoding {
        key: key.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn sled_error(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}
