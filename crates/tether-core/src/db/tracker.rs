//! Change tracking
//!
//! Every application write marks its row dirty inside the same transaction,
//! so an unpushed change is never observable as clean. The sync engine
//! clears the flag with a compare-and-clear token: a clear only succeeds if
//! no newer local write happened while the push was in flight.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{row_id, Fields, Permissions, RemoteId, RowId, SyncMetadata, Table};

const METADATA_COLUMNS: &str = "table_name, local_id, remote_id, is_dirty, last_modified_at, \
     is_deleted, is_shared, is_owner, can_edit, extra_fields";

/// Identifies the exact local version that was handed to the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyToken {
    pub table: Table,
    pub local_id: RowId,
    pub modified_at: i64,
}

/// Result of [`clear_dirty`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The pushed version is still current; the row is now clean
    Cleared,
    /// A newer local write happened meanwhile; the row stays dirty
    Superseded,
    /// The metadata row no longer exists
    Missing,
}

fn parse_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncMetadata> {
    let table_name: String = row.get(0)?;
    let table = table_name.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
    })?;
    let extra_fields: String = row.get(9)?;
    let extra_fields: Fields = serde_json::from_str(&extra_fields).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(SyncMetadata {
        table,
        local_id: row_id(row, 1)?,
        remote_id: row.get::<_, Option<String>>(2)?.map(RemoteId::new),
        is_dirty: row.get(3)?,
        last_modified_at: row.get(4)?,
        is_deleted: row.get(5)?,
        permissions: Permissions {
            is_shared: row.get(6)?,
            is_owner: row.get(7)?,
            can_edit: row.get(8)?,
        },
        extra_fields,
    })
}

/// Mark a row as locally modified.
///
/// Idempotent. `last_modified_at` strictly increases on every call so each
/// local version gets a distinct token, even within one millisecond.
pub fn mark_dirty(conn: &Connection, table: Table, local_id: RowId, now: i64) -> Result<DirtyToken> {
    let modified_at: i64 = conn.query_row(
        "INSERT INTO sync_metadata (table_name, local_id, is_dirty, last_modified_at, is_deleted)
         VALUES (?1, ?2, 1, ?3, 0)
         ON CONFLICT(table_name, local_id) DO UPDATE SET
            is_dirty = 1,
            is_deleted = 0,
            last_modified_at = MAX(excluded.last_modified_at, sync_metadata.last_modified_at + 1)
         RETURNING last_modified_at",
        params![table.as_str(), local_id.as_str(), now],
        |row| row.get(0),
    )?;

    Ok(DirtyToken {
        table,
        local_id,
        modified_at,
    })
}

/// Turn a row's metadata into a dirty tombstone.
///
/// A row the remote never saw has nothing to propagate, so its metadata is
/// purged instead and `None` is returned.
pub fn mark_deleted(
    conn: &Connection,
    table: Table,
    local_id: RowId,
    now: i64,
) -> Result<Option<DirtyToken>> {
    let Some(existing) = metadata(conn, table, local_id)? else {
        return Ok(None);
    };

    if existing.is_local_only() {
        conn.execute(
            "DELETE FROM sync_metadata WHERE table_name = ?1 AND local_id = ?2",
            params![table.as_str(), local_id.as_str()],
        )?;
        return Ok(None);
    }

    let modified_at: i64 = conn.query_row(
        "UPDATE sync_metadata
         SET is_dirty = 1,
             is_deleted = 1,
             last_modified_at = MAX(?3, last_modified_at + 1)
         WHERE table_name = ?1 AND local_id = ?2
         RETURNING last_modified_at",
        params![table.as_str(), local_id.as_str(), now],
        |row| row.get(0),
    )?;

    Ok(Some(DirtyToken {
        table,
        local_id,
        modified_at,
    }))
}

/// Confirm a push.
///
/// Records `remote_id` when the row had none, and clears the dirty flag only
/// if the row is still at the version described by `token`.
pub fn clear_dirty(conn: &Connection, token: &DirtyToken, remote_id: &RemoteId) -> Result<ClearOutcome> {
    let still_dirty: Option<bool> = conn
        .query_row(
            "UPDATE sync_metadata
             SET remote_id = COALESCE(remote_id, ?3),
                 is_dirty = CASE WHEN last_modified_at = ?4 THEN 0 ELSE is_dirty END
             WHERE table_name = ?1 AND local_id = ?2
             RETURNING is_dirty",
            params![
                token.table.as_str(),
                token.local_id.as_str(),
                remote_id.as_str(),
                token.modified_at
            ],
            |row| row.get(0),
        )
        .optional()?;

    Ok(match still_dirty {
        None => ClearOutcome::Missing,
        Some(true) => ClearOutcome::Superseded,
        Some(false) => ClearOutcome::Cleared,
    })
}

/// Record a dirty tombstone for a row whose metadata was purged while its
/// first push was in flight, so the deletion still reaches the remote.
pub fn insert_tombstone(
    conn: &Connection,
    table: Table,
    local_id: RowId,
    remote_id: &RemoteId,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_metadata (table_name, local_id, remote_id, is_dirty, last_modified_at, is_deleted)
         VALUES (?1, ?2, ?3, 1, ?4, 1)
         ON CONFLICT(table_name, local_id) DO NOTHING",
        params![table.as_str(), local_id.as_str(), remote_id.as_str(), now],
    )?;
    Ok(())
}

/// Load one row's metadata
pub fn metadata(conn: &Connection, table: Table, local_id: RowId) -> Result<Option<SyncMetadata>> {
    let sql = format!(
        "SELECT {METADATA_COLUMNS} FROM sync_metadata WHERE table_name = ?1 AND local_id = ?2"
    );
    Ok(conn
        .query_row(&sql, params![table.as_str(), local_id.as_str()], parse_metadata)
        .optional()?)
}

/// Look up metadata by remote identity
pub fn find_by_remote_id(
    conn: &Connection,
    table: Table,
    remote_id: &RemoteId,
) -> Result<Option<SyncMetadata>> {
    let sql = format!(
        "SELECT {METADATA_COLUMNS} FROM sync_metadata WHERE table_name = ?1 AND remote_id = ?2"
    );
    Ok(conn
        .query_row(&sql, params![table.as_str(), remote_id.as_str()], parse_metadata)
        .optional()?)
}

/// Dirty rows of one table, oldest change first; tombstones included
pub fn dirty_rows(conn: &Connection, table: Table) -> Result<Vec<SyncMetadata>> {
    let sql = format!(
        "SELECT {METADATA_COLUMNS} FROM sync_metadata
         WHERE table_name = ?1 AND is_dirty = 1
         ORDER BY last_modified_at ASC, local_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![table.as_str()], parse_metadata)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Number of rows across all tables waiting to be pushed
pub fn dirty_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_metadata WHERE is_dirty = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Number of tombstones (pending or confirmed)
pub fn tombstone_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_metadata WHERE is_deleted = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Write a metadata row as a whole. Used when merging remote rows.
pub(crate) fn write_metadata(conn: &Connection, metadata: &SyncMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_metadata (
            table_name, local_id, remote_id, is_dirty, last_modified_at,
            is_deleted, is_shared, is_owner, can_edit, extra_fields
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(table_name, local_id) DO UPDATE SET
            remote_id = excluded.remote_id,
            is_dirty = excluded.is_dirty,
            last_modified_at = excluded.last_modified_at,
            is_deleted = excluded.is_deleted,
            is_shared = excluded.is_shared,
            is_owner = excluded.is_owner,
            can_edit = excluded.can_edit,
            extra_fields = excluded.extra_fields",
        params![
            metadata.table.as_str(),
            metadata.local_id.as_str(),
            metadata.remote_id.as_ref().map(RemoteId::as_str),
            metadata.is_dirty,
            metadata.last_modified_at,
            metadata.is_deleted,
            metadata.permissions.is_shared,
            metadata.permissions.is_owner,
            metadata.permissions.can_edit,
            serde_json::to_string(&metadata.extra_fields)?,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run(&conn).unwrap();
        conn
    }

    #[test]
    fn mark_dirty_is_idempotent_and_strictly_increasing() {
        let conn = setup();
        let id = RowId::new();

        let first = mark_dirty(&conn, Table::Items, id, 1_000).unwrap();
        let second = mark_dirty(&conn, Table::Items, id, 1_000).unwrap();
        assert_eq!(first.modified_at, 1_000);
        assert_eq!(second.modified_at, 1_001);

        let meta = metadata(&conn, Table::Items, id).unwrap().unwrap();
        assert!(meta.is_dirty);
        assert_eq!(dirty_rows(&conn, Table::Items).unwrap().len(), 1);
    }

    #[test]
    fn clear_dirty_assigns_remote_id() {
        let conn = setup();
        let id = RowId::new();
        let token = mark_dirty(&conn, Table::Items, id, 10).unwrap();

        let outcome = clear_dirty(&conn, &token, &RemoteId::new("R1")).unwrap();
        assert_eq!(outcome, ClearOutcome::Cleared);

        let meta = metadata(&conn, Table::Items, id).unwrap().unwrap();
        assert!(!meta.is_dirty);
        assert_eq!(meta.remote_id, Some(RemoteId::new("R1")));
    }

    #[test]
    fn clear_dirty_with_stale_token_keeps_row_dirty() {
        let conn = setup();
        let id = RowId::new();
        let stale = mark_dirty(&conn, Table::Items, id, 10).unwrap();
        mark_dirty(&conn, Table::Items, id, 20).unwrap();

        let outcome = clear_dirty(&conn, &stale, &RemoteId::new("R1")).unwrap();
        assert_eq!(outcome, ClearOutcome::Superseded);

        let meta = metadata(&conn, Table::Items, id).unwrap().unwrap();
        assert!(meta.is_dirty);
        assert_eq!(meta.remote_id, Some(RemoteId::new("R1")));
    }

    #[test]
    fn deleting_unpushed_row_purges_metadata() {
        let conn = setup();
        let id = RowId::new();
        mark_dirty(&conn, Table::Notes, id, 10).unwrap();

        assert_eq!(mark_deleted(&conn, Table::Notes, id, 11).unwrap(), None);
        assert!(metadata(&conn, Table::Notes, id).unwrap().is_none());
    }

    #[test]
    fn deleting_pushed_row_leaves_dirty_tombstone() {
        let conn = setup();
        let id = RowId::new();
        let token = mark_dirty(&conn, Table::Notes, id, 10).unwrap();
        clear_dirty(&conn, &token, &RemoteId::new("R9")).unwrap();

        let tombstone = mark_deleted(&conn, Table::Notes, id, 5).unwrap().unwrap();
        assert_eq!(tombstone.modified_at, 11);

        let meta = find_by_remote_id(&conn, Table::Notes, &RemoteId::new("R9"))
            .unwrap()
            .unwrap();
        assert!(meta.is_deleted);
        assert!(meta.is_dirty);
        assert_eq!(tombstone_count(&conn).unwrap(), 1);
        assert_eq!(dirty_count(&conn).unwrap(), 1);
    }

    #[test]
    fn clear_dirty_on_purged_row_reports_missing() {
        let conn = setup();
        let id = RowId::new();
        let token = mark_dirty(&conn, Table::Items, id, 10).unwrap();
        mark_deleted(&conn, Table::Items, id, 11).unwrap();

        let outcome = clear_dirty(&conn, &token, &RemoteId::new("R1")).unwrap();
        assert_eq!(outcome, ClearOutcome::Missing);
    }
}
