//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply a list of statements atomically
fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Items table
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_done INTEGER NOT NULL DEFAULT 0,
                note TEXT,
                quantity INTEGER,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_items_done ON items(is_done)",
            // Notes table
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at DESC)",
            // One metadata row per synced entity; survives deletion as a tombstone
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                table_name TEXT NOT NULL,
                local_id TEXT NOT NULL,
                remote_id TEXT,
                is_dirty INTEGER NOT NULL DEFAULT 0,
                last_modified_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                is_shared INTEGER NOT NULL DEFAULT 0,
                is_owner INTEGER NOT NULL DEFAULT 1,
                can_edit INTEGER NOT NULL DEFAULT 1,
                extra_fields TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (table_name, local_id)
            )",
            // Rows that were never pushed have no remote id and must not collide
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_metadata_remote_id
                ON sync_metadata(table_name, remote_id)
                WHERE remote_id IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_sync_metadata_dirty
                ON sync_metadata(table_name, is_dirty, last_modified_at)",
            // One pull cursor per synced table
            "CREATE TABLE IF NOT EXISTS sync_cursors (
                table_name TEXT PRIMARY KEY,
                cursor INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            // Record migration version
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: conflict resolution log
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                local_id TEXT NOT NULL,
                local_modified_at INTEGER NOT NULL,
                incoming_modified_at INTEGER NOT NULL,
                resolved_at INTEGER NOT NULL,
                strategy TEXT NOT NULL,
                winner TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_local_id ON sync_conflicts(table_name, local_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn remote_id_index_allows_many_unsynced_rows() {
        let conn = setup();
        run(&conn).unwrap();

        for id in ["a", "b"] {
            conn.execute(
                "INSERT INTO sync_metadata (table_name, local_id, last_modified_at) VALUES ('items', ?1, 1)",
                [id],
            )
            .unwrap();
        }

        conn.execute(
            "UPDATE sync_metadata SET remote_id = 'R1' WHERE local_id = 'a'",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "UPDATE sync_metadata SET remote_id = 'R1' WHERE local_id = 'b'",
            [],
        );
        assert!(duplicate.is_err());
    }
}
