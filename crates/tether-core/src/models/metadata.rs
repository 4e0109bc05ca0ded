//! Per-row sync metadata

use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::{Fields, RowId, Table};

/// Identity of a row on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Permission flags cached from the remote service.
///
/// Local mutations consult `can_edit` so read-only shared rows are rejected
/// without a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub is_shared: bool,
    pub is_owner: bool,
    pub can_edit: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            is_shared: false,
            is_owner: true,
            can_edit: true,
        }
    }
}

/// Sync bookkeeping for one row, stored in `sync_metadata`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Table the row belongs to
    pub table: Table,
    /// Local primary key of the owning row
    pub local_id: RowId,
    /// Remote identity, unset until the first successful push or matching pull
    pub remote_id: Option<RemoteId>,
    /// Local changes not yet confirmed by the remote
    pub is_dirty: bool,
    /// Last modification (Unix ms); doubles as the compare-and-clear token
    pub last_modified_at: i64,
    /// Tombstone flag: the row was deleted
    pub is_deleted: bool,
    /// Cached permission flags
    pub permissions: Permissions,
    /// Remote columns unknown to this client, round-tripped untouched
    pub extra_fields: Fields,
}

impl SyncMetadata {
    /// Whether the row was never acknowledged by the remote.
    pub const fn is_local_only(&self) -> bool {
        self.remote_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_permissions_allow_editing() {
        let permissions = Permissions::default();
        assert!(permissions.can_edit);
        assert!(permissions.is_owner);
        assert!(!permissions.is_shared);
    }

    #[test]
    fn permissions_fill_missing_fields_from_default() {
        let permissions: Permissions = serde_json::from_str(r#"{"can_edit": false}"#).unwrap();
        assert!(!permissions.can_edit);
        assert!(permissions.is_owner);
    }

    #[test]
    fn remote_id_serializes_as_plain_string() {
        let id = RemoteId::new("R1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"R1\"");
    }
}
