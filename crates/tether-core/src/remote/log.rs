//! Sequenced per-table change log shared by the bundled remotes

use serde::{Deserialize, Serialize};

use crate::db::Cursor;
use crate::models::{Permissions, RemoteId};
use crate::sync::{OutgoingChange, PullBatch, RemoteRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LoggedRow {
    pub seq: i64,
    pub row: RemoteRow,
}

/// Latest version of every row of one table, each stamped with the sequence
/// number of its last write. Pull cursors are sequence numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChangeLog {
    pub next_seq: i64,
    pub rows: Vec<LoggedRow>,
}

impl ChangeLog {
    /// Rows written after `since`, oldest first
    pub fn pull(&self, since: Option<Cursor>, limit: usize) -> PullBatch {
        let since = since.map_or(0, Cursor::position);
        let mut pending: Vec<&LoggedRow> = self.rows.iter().filter(|row| row.seq > since).collect();
        pending.sort_by_key(|row| row.seq);

        let has_more = pending.len() > limit;
        pending.truncate(limit);

        let cursor = pending.last().map_or(since, |row| row.seq);
        PullBatch {
            rows: pending.into_iter().map(|logged| logged.row.clone()).collect(),
            cursor: Some(Cursor::new(cursor)),
            has_more,
        }
    }

    /// Store a pushed change, minting a remote id for rows seen the first time
    pub fn apply(&mut self, change: &OutgoingChange, mint: impl FnOnce() -> RemoteId) -> RemoteId {
        let existing = self.rows.iter().position(|logged| match &change.remote_id {
            Some(remote_id) => logged.row.remote_id == *remote_id,
            // A retried first push: the remote already knows the row by origin
            None => logged.row.origin_id == Some(change.local_id),
        });

        let seq = self.bump();
        match existing {
            Some(index) => {
                let logged = &mut self.rows[index];
                logged.seq = seq;
                logged.row.last_modified_at = change.last_modified_at;
                logged.row.is_deleted = change.is_deleted;
                if !change.is_deleted {
                    logged.row.fields = change.fields.clone();
                }
                logged.row.remote_id.clone()
            }
            None => {
                let remote_id = change.remote_id.clone().unwrap_or_else(mint);
                self.rows.push(LoggedRow {
                    seq,
                    row: RemoteRow {
                        remote_id: remote_id.clone(),
                        origin_id: Some(change.local_id),
                        fields: change.fields.clone(),
                        last_modified_at: change.last_modified_at,
                        is_deleted: change.is_deleted,
                        permissions: Permissions::default(),
                    },
                });
                remote_id
            }
        }
    }

    /// Insert or replace a row as another client would
    pub fn put(&mut self, row: RemoteRow) {
        let seq = self.bump();
        if let Some(logged) = self
            .rows
            .iter_mut()
            .find(|logged| logged.row.remote_id == row.remote_id)
        {
            logged.seq = seq;
            logged.row = row;
        } else {
            self.rows.push(LoggedRow { seq, row });
        }
    }

    pub fn get(&self, remote_id: &RemoteId) -> Option<&RemoteRow> {
        self.rows
            .iter()
            .map(|logged| &logged.row)
            .find(|row| row.remote_id == *remote_id)
    }

    fn bump(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }
}
