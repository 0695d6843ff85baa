//! Core error types for learnpath-core.
//!
//! Engine components reject invalid calls with one of the domain variants
//! (`InvalidTransition`, `AttemptNotAllowed`, `StaleRecord`); the storage and
//! configuration layers report through their own nested enums.

use std::path::PathBuf;
use thiserror::Error;

use crate::progress::AttemptReason;

/// Core error type for learnpath-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The requested action is not valid from the record's current state
    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    /// A quiz attempt was registered while the throttle denies it
    #[error("Attempt not allowed ({reason}){}", .cooldown_remaining_minutes.map(|m| format!(": retry in {m} minutes")).unwrap_or_default())]
    AttemptNotAllowed {
        reason: AttemptReason,
        cooldown_remaining_minutes: Option<i64>,
    },

    /// The record changed underneath the caller; reload and retry
    #[error("Stale {entity} record {id}: it was modified concurrently")]
    StaleRecord { entity: &'static str, id: String },

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// True for the optimistic-concurrency conflict a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::StaleRecord { .. })
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid identifier
    #[error("Invalid identifier for '{field}': {value}")]
    InvalidId { field: String, value: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_not_allowed_mentions_remaining_minutes() {
        let err = CoreError::AttemptNotAllowed {
            reason: AttemptReason::Cooldown,
            cooldown_remaining_minutes: Some(12),
        };
        assert_eq!(err.to_string(), "Attempt not allowed (cooldown): retry in 12 minutes");
    }

    #[test]
    fn stale_record_is_conflict() {
        let err = CoreError::StaleRecord {
            entity: "user",
            id: "abc".into(),
        };
        assert!(err.is_conflict());
        assert!(!CoreError::NotFound { entity: "user", id: "abc".into() }.is_conflict());
    }

    #[test]
    fn sqlite_busy_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }
}
