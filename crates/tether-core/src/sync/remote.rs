//! Remote service protocol

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Cursor;
use crate::models::{Fields, Permissions, RemoteId, RowId, Table};

/// One row version as stored on the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub remote_id: RemoteId,
    /// Local id of the client that created the row, when the remote knows it.
    /// Lets a client recognize its own row before it learned the remote id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<RowId>,
    #[serde(default)]
    pub fields: Fields,
    pub last_modified_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

/// One page of remote changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullBatch {
    pub rows: Vec<RemoteRow>,
    /// Position after the last row of this batch
    pub cursor: Option<Cursor>,
    pub has_more: bool,
}

impl PullBatch {
    pub const fn empty(cursor: Option<Cursor>) -> Self {
        Self {
            rows: Vec::new(),
            cursor,
            has_more: false,
        }
    }
}

/// One local change handed to the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingChange {
    pub local_id: RowId,
    /// `None` for rows never pushed before
    pub remote_id: Option<RemoteId>,
    /// Known columns merged with round-tripped unknown ones; empty for tombstones
    pub fields: Fields,
    pub last_modified_at: i64,
    pub is_deleted: bool,
}

/// Class of a remote failure; decides whether and how a call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Network trouble or timeout
    Transient,
    /// Rate limit or storage quota
    QuotaExceeded,
    /// Remote data does not fit the local schema, or vice versa
    Schema,
    /// The remote refused this particular request or row
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::QuotaExceeded, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Schema, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, message)
    }
}

/// A cloud backend holding the shared copy of every synced table.
///
/// `push` reports one result per change, in input order. A call-level
/// `Err` means nothing in the batch was applied.
#[async_trait]
pub trait RemoteService: Send + Sync + 'static {
    async fn pull(
        &self,
        table: Table,
        since: Option<Cursor>,
        limit: usize,
    ) -> Result<PullBatch, RemoteError>;

    async fn push(
        &self,
        table: Table,
        changes: Vec<OutgoingChange>,
    ) -> Result<Vec<Result<RemoteId, RemoteError>>, RemoteError>;
}
