//! Conflict resolution
//!
//! Merges one incoming remote row version into the local store. Every row is
//! applied inside its own write transaction, so the entity row, its metadata
//! and the conflict log entry commit together.

use serde::{Deserialize, Serialize};

use super::remote::RemoteRow;
use crate::db::conflicts::{self, ConflictEntry};
use crate::db::{tracker, WriteTransaction};
use crate::error::Result;
use crate::models::{delete_record, load_record, Fields, Record, RowId, SyncMetadata, Table};

/// How a remote version is merged into a row with local changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Mirror the remote, unless a dirty local edit is newer
    Replace,
    /// Keep every non-null local value of a dirty row, fill the rest from a
    /// newer remote version
    #[default]
    MergeNoClobber,
    /// Newest `last_modified_at` wins; a tie goes to the remote
    LastWriterWins,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::MergeNoClobber => "merge_no_clobber",
            Self::LastWriterWins => "last_writer_wins",
        }
    }
}

/// Which side a resolution kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
    Merged,
}

impl Winner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merged => "merged",
        }
    }
}

/// Local side of a merge
#[derive(Debug, Clone, Copy)]
pub struct LocalVersion<'a> {
    pub fields: &'a Fields,
    pub is_dirty: bool,
    pub last_modified_at: i64,
}

/// Outcome of [`merge`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Column values the row ends up with
    pub fields: Fields,
    pub winner: Winner,
    /// Both sides carried changes; the resolution gets logged
    pub conflict: bool,
}

/// Merge a remote version into the local one.
///
/// A clean local row has nothing to lose, so the remote is taken (unless it
/// is older than the local version and the strategy compares timestamps). A
/// dirty local row newer than the remote version is kept as is under every
/// strategy: a null there may be a field the user just cleared.
pub fn merge(
    strategy: MergeStrategy,
    local: LocalVersion<'_>,
    remote: &Fields,
    remote_modified_at: i64,
) -> Resolution {
    let keep_local = |conflict| Resolution {
        fields: local.fields.clone(),
        winner: Winner::Local,
        conflict,
    };
    let take_remote = |conflict| Resolution {
        fields: remote.clone(),
        winner: Winner::Remote,
        conflict,
    };

    if !local.is_dirty {
        return match strategy {
            MergeStrategy::Replace => take_remote(false),
            _ if remote_modified_at < local.last_modified_at => keep_local(false),
            _ => take_remote(false),
        };
    }

    if local.last_modified_at > remote_modified_at {
        return keep_local(true);
    }

    match strategy {
        MergeStrategy::Replace | MergeStrategy::LastWriterWins => take_remote(true),
        MergeStrategy::MergeNoClobber => {
            let mut merged = remote.clone();
            for (column, value) in local.fields {
                if !value.is_null() {
                    merged.insert(column.clone(), value.clone());
                }
            }

            let winner = if merged == *remote {
                Winner::Remote
            } else if merged == *local.fields {
                Winner::Local
            } else {
                Winner::Merged
            };
            Resolution {
                fields: merged,
                winner,
                conflict: true,
            }
        }
    }
}

/// What applying one remote row did to the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Inserted,
    Merged,
    Deleted,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    pub change: Change,
    pub conflict: bool,
}

impl Applied {
    const fn new(change: Change, conflict: bool) -> Self {
        Self { change, conflict }
    }
}

/// Apply one remote row version to table `R`.
pub(crate) fn apply_remote_row<R: Record>(
    tx: &mut WriteTransaction<'_>,
    row: &RemoteRow,
    strategy: MergeStrategy,
) -> Result<Applied> {
    let (known, extra) = split_fields::<R>(&row.fields);

    let Some(meta) = locate(tx, R::TABLE, row)? else {
        let local_id = new_local_id::<R>(tx, row)?;
        return insert_remote::<R>(tx, local_id, row, &known, extra);
    };

    if meta.is_deleted {
        return apply_to_tombstone::<R>(tx, meta, row, &known, extra, strategy);
    }

    let Some(local) = load_record::<R>(tx.connection(), meta.local_id)? else {
        tracing::warn!(
            "{} metadata for {} has no row; recreating from remote",
            R::TABLE,
            meta.local_id
        );
        return insert_remote::<R>(tx, meta.local_id, row, &known, extra);
    };

    if row.is_deleted {
        return apply_remote_delete::<R>(tx, &meta, row, strategy);
    }

    let local_fields = local.to_fields();
    // Columns the remote omitted keep their local value
    let mut incoming = local_fields.clone();
    incoming.extend(known);

    let resolution = merge(
        strategy,
        LocalVersion {
            fields: &local_fields,
            is_dirty: meta.is_dirty,
            last_modified_at: meta.last_modified_at,
        },
        &incoming,
        row.last_modified_at,
    );

    if resolution.conflict {
        log_conflict(tx, &meta, row, strategy, resolution.winner)?;
    }

    let changed = resolution.fields != local_fields;
    if changed {
        R::from_fields(meta.local_id, &resolution.fields)?.upsert(tx.connection())?;
        tx.touch(R::TABLE);
    }

    let (is_dirty, last_modified_at) = match resolution.winner {
        Winner::Remote => (false, row.last_modified_at),
        Winner::Local | Winner::Merged => (meta.is_dirty, meta.last_modified_at),
    };
    let merged_meta = SyncMetadata {
        remote_id: Some(row.remote_id.clone()),
        is_dirty,
        last_modified_at,
        permissions: row.permissions,
        extra_fields: extra,
        ..meta
    };
    tracker::write_metadata(tx.connection(), &merged_meta)?;

    if resolution.winner == Winner::Merged && changed {
        // The merged row differs from both sides and must be pushed
        tracker::mark_dirty(tx.connection(), R::TABLE, merged_meta.local_id, tx.now())?;
    }

    tracing::debug!(
        "Applied {} {} -> {}: winner {}",
        R::TABLE,
        row.remote_id,
        merged_meta.local_id,
        resolution.winner.as_str()
    );

    let change = if changed { Change::Merged } else { Change::Unchanged };
    Ok(Applied::new(change, resolution.conflict))
}

/// Known columns of `R`, and everything else
fn split_fields<R: Record>(fields: &Fields) -> (Fields, Fields) {
    let mut known = Fields::new();
    let mut extra = Fields::new();
    for (column, value) in fields {
        if R::COLUMNS.contains(&column.as_str()) {
            known.insert(column.clone(), value.clone());
        } else if column != "id" {
            extra.insert(column.clone(), value.clone());
        }
    }
    (known, extra)
}

/// Find the local row a remote version belongs to: by remote id, else by
/// the origin id the remote recorded on first push.
fn locate(tx: &WriteTransaction<'_>, table: Table, row: &RemoteRow) -> Result<Option<SyncMetadata>> {
    let conn = tx.connection();
    if let Some(meta) = tracker::find_by_remote_id(conn, table, &row.remote_id)? {
        return Ok(Some(meta));
    }

    let Some(origin_id) = row.origin_id else {
        return Ok(None);
    };
    match tracker::metadata(conn, table, origin_id)? {
        Some(meta) if meta.remote_id.is_none() => Ok(Some(meta)),
        Some(meta) => {
            tracing::warn!(
                "{table} {origin_id} already maps to {:?}, not {}; treating as a new row",
                meta.remote_id,
                row.remote_id
            );
            Ok(None)
        }
        None => Ok(None),
    }
}

fn new_local_id<R: Record>(tx: &WriteTransaction<'_>, row: &RemoteRow) -> Result<RowId> {
    if let Some(origin_id) = row.origin_id {
        let conn = tx.connection();
        let taken = tracker::metadata(conn, R::TABLE, origin_id)?.is_some()
            || load_record::<R>(conn, origin_id)?.is_some();
        if !taken {
            return Ok(origin_id);
        }
    }
    Ok(RowId::new())
}

fn insert_remote<R: Record>(
    tx: &mut WriteTransaction<'_>,
    local_id: RowId,
    row: &RemoteRow,
    known: &Fields,
    extra: Fields,
) -> Result<Applied> {
    if row.is_deleted {
        return Ok(Applied::new(Change::Unchanged, false));
    }

    let record = R::from_fields(local_id, known)?;
    record.upsert(tx.connection())?;
    tracker::write_metadata(
        tx.connection(),
        &SyncMetadata {
            table: R::TABLE,
            local_id,
            remote_id: Some(row.remote_id.clone()),
            is_dirty: false,
            last_modified_at: row.last_modified_at,
            is_deleted: false,
            permissions: row.permissions,
            extra_fields: extra,
        },
    )?;
    tx.touch(R::TABLE);

    tracing::debug!("Inserted {} {} as {local_id}", R::TABLE, row.remote_id);
    Ok(Applied::new(Change::Inserted, false))
}

fn apply_to_tombstone<R: Record>(
    tx: &mut WriteTransaction<'_>,
    meta: SyncMetadata,
    row: &RemoteRow,
    known: &Fields,
    extra: Fields,
    strategy: MergeStrategy,
) -> Result<Applied> {
    if row.is_deleted {
        // Both sides agree the row is gone
        let settled = SyncMetadata {
            remote_id: Some(row.remote_id.clone()),
            is_dirty: false,
            last_modified_at: meta.last_modified_at.max(row.last_modified_at),
            permissions: row.permissions,
            ..meta
        };
        tracker::write_metadata(tx.connection(), &settled)?;
        return Ok(Applied::new(Change::Unchanged, false));
    }

    if row.last_modified_at <= meta.last_modified_at {
        // Stale version of a row deleted here; the tombstone blocks it
        if meta.is_dirty {
            log_conflict(tx, &meta, row, strategy, Winner::Local)?;
        }
        let kept = SyncMetadata {
            remote_id: meta.remote_id.clone().or_else(|| Some(row.remote_id.clone())),
            ..meta
        };
        let conflict = kept.is_dirty;
        tracker::write_metadata(tx.connection(), &kept)?;
        return Ok(Applied::new(Change::Unchanged, conflict));
    }

    // Edited remotely after the local delete: bring it back
    let conflict = meta.is_dirty;
    if conflict {
        log_conflict(tx, &meta, row, strategy, Winner::Remote)?;
    }
    let record = R::from_fields(meta.local_id, known)?;
    record.upsert(tx.connection())?;
    tracker::write_metadata(
        tx.connection(),
        &SyncMetadata {
            remote_id: Some(row.remote_id.clone()),
            is_dirty: false,
            last_modified_at: row.last_modified_at,
            is_deleted: false,
            permissions: row.permissions,
            extra_fields: extra,
            ..meta
        },
    )?;
    tx.touch(R::TABLE);
    Ok(Applied::new(Change::Inserted, conflict))
}

fn apply_remote_delete<R: Record>(
    tx: &mut WriteTransaction<'_>,
    meta: &SyncMetadata,
    row: &RemoteRow,
    strategy: MergeStrategy,
) -> Result<Applied> {
    if meta.is_dirty && meta.last_modified_at > row.last_modified_at {
        // Local edit after the remote delete survives and will be pushed
        log_conflict(tx, meta, row, strategy, Winner::Local)?;
        let kept = SyncMetadata {
            remote_id: Some(row.remote_id.clone()),
            ..meta.clone()
        };
        tracker::write_metadata(tx.connection(), &kept)?;
        return Ok(Applied::new(Change::Unchanged, true));
    }

    if meta.is_dirty {
        log_conflict(tx, meta, row, strategy, Winner::Remote)?;
    }
    delete_record(tx.connection(), R::TABLE, meta.local_id)?;
    tracker::write_metadata(
        tx.connection(),
        &SyncMetadata {
            remote_id: Some(row.remote_id.clone()),
            is_dirty: false,
            last_modified_at: row.last_modified_at,
            is_deleted: true,
            permissions: row.permissions,
            ..meta.clone()
        },
    )?;
    tx.touch(R::TABLE);

    tracing::debug!("Deleted {} {} (removed remotely)", R::TABLE, meta.local_id);
    Ok(Applied::new(Change::Deleted, meta.is_dirty))
}

fn log_conflict(
    tx: &WriteTransaction<'_>,
    meta: &SyncMetadata,
    row: &RemoteRow,
    strategy: MergeStrategy,
    winner: Winner,
) -> Result<()> {
    tracing::info!(
        "Resolved conflict on {} {} with {}: {} wins",
        meta.table,
        meta.local_id,
        strategy.as_str(),
        winner.as_str()
    );
    conflicts::record(
        tx.connection(),
        &ConflictEntry {
            table: meta.table,
            local_id: meta.local_id,
            local_modified_at: meta.last_modified_at,
            incoming_modified_at: row.last_modified_at,
            strategy: strategy.as_str(),
            winner: winner.as_str(),
        },
        tx.now(),
    )
}
