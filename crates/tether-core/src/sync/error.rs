//! Sync failure taxonomy

use thiserror::Error;

use super::remote::{RemoteError, RemoteErrorKind};

/// Why a sync run failed.
///
/// `Clone` so one outcome can be handed to every caller that joined a
/// coalesced run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network failure or timeout; retried with backoff
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Remote quota or rate limit; retried with a longer backoff
    #[error("Remote quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Remote data incompatible with the local schema; aborts the run
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// The local store is unusable; aborts the run
    #[error("Local store error: {0}")]
    Store(String),

    /// The remote refused a whole request
    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

impl SyncError {
    /// Whether retrying the same call can succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::QuotaExceeded(_))
    }

    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error.kind {
            RemoteErrorKind::Transient => Self::TransientNetwork(error.message),
            RemoteErrorKind::QuotaExceeded => Self::QuotaExceeded(error.message),
            RemoteErrorKind::Schema => Self::Schema(error.message),
            RemoteErrorKind::Rejected => Self::Rejected(error.message),
        }
    }
}

impl From<crate::Error> for SyncError {
    fn from(error: crate::Error) -> Self {
        match error {
            crate::Error::Schema(message) => Self::Schema(message),
            other => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_kinds_map_to_sync_errors() {
        assert!(SyncError::from(RemoteError::transient("reset")).is_retryable());
        assert!(SyncError::from(RemoteError::quota("slow down")).is_quota());
        assert_eq!(
            SyncError::from(RemoteError::schema("unknown table")),
            SyncError::Schema("unknown table".to_string())
        );
        assert!(!SyncError::from(RemoteError::rejected("nope")).is_retryable());
    }

    #[test]
    fn store_schema_errors_stay_schema_errors() {
        let error = SyncError::from(crate::Error::Schema("items.name is missing".to_string()));
        assert_eq!(error, SyncError::Schema("items.name is missing".to_string()));

        let error = SyncError::from(crate::Error::Database("closed".to_string()));
        assert!(matches!(error, SyncError::Store(_)));
        assert!(!error.is_retryable());
    }
}
