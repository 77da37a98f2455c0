//! Storage error handling
//!
//! Typed errors for the local database with descriptive messages and
//! recovery suggestions. The store never retries; callers decide.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error("Disk full or quota exceeded while writing the local database. Free up disk space and try again.")]
    DiskFull {
        #[source]
        source: rusqlite::Error,
    },

    /// Database is locked, busy or could not be opened
    #[error("Local database unavailable: {details}")]
    Unavailable { details: String },

    /// A mutation with this id is already queued
    #[error("Mutation id '{0}' is already queued")]
    DuplicateId(String),

    /// Stored row could not be encoded or decoded
    #[error("Failed to (de)serialize stored row: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => StorageError::DiskFull { source: error },
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::ReadOnly,
            ) => StorageError::Unavailable {
                details: error.to_string(),
            },
            _ => StorageError::Database(error),
        }
    }
}

impl StorageError {
    /// Create an error from an I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            _ => StorageError::CreateDirectory {
                path,
                source: error,
            },
        }
    }

    /// Check if this error is recoverable by the operator
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::Unavailable { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions for the data directory.")
            }
            StorageError::Unavailable { .. } => {
                Some("Another process may hold the database. Close it and retry.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            StorageError::DuplicateId(_) => {
                Some("Generate a fresh id for every queued mutation.")
            }
            _ => None,
        }
    }
}

/// True when the error is a primary-key collision on insert
pub(crate) fn is_primary_key_violation(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
