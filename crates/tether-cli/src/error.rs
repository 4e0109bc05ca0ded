use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tether_core::Error),
    #[error(transparent)]
    Sync(#[from] tether_core::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No item name provided")]
    EmptyName,
    #[error("No note content provided")]
    EmptyContent,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Failed to resolve the {0} directory")]
    NoDataDir(&'static str),
    #[error(
        "Sync is not configured. Pass --remote-dir or --remote-url, or set TETHER_REMOTE_DIR or TETHER_REMOTE_URL."
    )]
    SyncNotConfigured,
}
