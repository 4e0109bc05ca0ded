//! Sync run results

use serde::Serialize;

use crate::models::{RemoteId, RowId, Table};

/// Which way a failed row was travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLeg {
    Fetch,
    Send,
}

/// A row that could not be applied or pushed. It stays dirty (send) or keeps
/// the cursor in place (fetch), so the next run retries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub table: Table,
    pub leg: SyncLeg,
    pub local_id: Option<RowId>,
    pub remote_id: Option<RemoteId>,
    pub message: String,
}

/// Counters for one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Remote row versions received
    pub fetched: usize,
    /// Rows created locally from remote data
    pub inserted: usize,
    /// Existing local rows updated from remote data
    pub merged: usize,
    /// Local rows removed because the remote deleted them
    pub deleted: usize,
    /// Local changes the remote acknowledged
    pub pushed: usize,
    /// Conflicts resolved and logged
    pub conflicts: usize,
    /// Remote calls made, retries included
    pub attempts: usize,
    pub failures: Vec<RowFailure>,
}

impl SyncReport {
    pub fn absorb(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.deleted += other.deleted;
        self.pushed += other.pushed;
        self.conflicts += other.conflicts;
        self.attempts += other.attempts;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "fetched {} (inserted {}, merged {}, deleted {}), pushed {}, conflicts {}, failures {}",
            self.fetched,
            self.inserted,
            self.merged,
            self.deleted,
            self.pushed,
            self.conflicts,
            self.failures.len()
        )
    }
}
