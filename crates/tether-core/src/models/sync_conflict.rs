//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded sync conflict resolved by a merge strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Table of the row involved in the conflict
    pub table_name: String,
    /// Local id of the row involved in the conflict
    pub local_id: String,
    /// Local row's timestamp when the conflict occurred
    pub local_modified_at: i64,
    /// Incoming row's timestamp
    pub incoming_modified_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
    /// Which side's values survived (`local`, `remote`, `merged`)
    pub winner: String,
}
