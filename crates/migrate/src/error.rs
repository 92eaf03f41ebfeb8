//! Error types for the migration subsystem.
//!
//! The taxonomy distinguishes configuration problems (surfaced before any
//! work is attempted) from connectivity, script execution, missing reversal
//! scripts and backup failures, so the operator-facing status view can say
//! precisely what happened instead of wrapping everything in an opaque
//! database error.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration, rollback and backup operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Duplicate sequence numbers, malformed filenames, unreadable
    /// migrations directory. Fatal; no partial work is attempted.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The target database is unreachable or the connection broke.
    #[error("connectivity error: {message}")]
    Connectivity { message: String },

    /// An up or down script failed mid-execution.
    #[error("migration '{migration}' failed: {message}")]
    Execution { migration: String, message: String },

    /// Rollback was requested for a migration without a reversal script.
    /// Surfaced before any backup or destructive step.
    #[error("migration '{migration}' has no down script and cannot be rolled back")]
    NoDownScript { migration: String },

    /// Snapshot creation failed, was interrupted, or timed out.
    #[error("backup error: {message}")]
    Backup { message: String },

    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connectivity(err: impl std::fmt::Display) -> Self {
        Self::Connectivity {
            message: err.to_string(),
        }
    }

    pub fn execution(migration: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Execution {
            migration: migration.into(),
            message: message.to_string(),
        }
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::Backup {
            message: message.into(),
        }
    }
}
