//! Error types for tether-core

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias using tether-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Row not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote marked the row read-only for this account
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Row data does not match the local schema
    #[error("Schema mismatch: {0}")]
    Schema(String),
}

impl Error {
    /// Whether the failure is confined to a single row.
    ///
    /// Row-level failures are isolated during a sync batch; everything else
    /// means the store itself is unusable and the run must stop.
    pub fn is_row_level(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::InvalidInput(_) | Self::PermissionDenied(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(error, _)) => {
                error.code == ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}
