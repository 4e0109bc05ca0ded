//! Conflict resolution log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{RowId, SyncConflict, Table};

/// One resolved conflict, as written by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry<'a> {
    pub table: Table,
    pub local_id: RowId,
    pub local_modified_at: i64,
    pub incoming_modified_at: i64,
    pub strategy: &'a str,
    pub winner: &'a str,
}

pub fn record(conn: &Connection, entry: &ConflictEntry<'_>, resolved_at: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_conflicts (
            table_name, local_id, local_modified_at, incoming_modified_at,
            resolved_at, strategy, winner
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.table.as_str(),
            entry.local_id.as_str(),
            entry.local_modified_at,
            entry.incoming_modified_at,
            resolved_at,
            entry.strategy,
            entry.winner
        ],
    )?;
    Ok(())
}

/// Most recently resolved conflicts first
pub fn list(conn: &Connection, limit: usize) -> Result<Vec<SyncConflict>> {
    let mut stmt = conn.prepare(
        "SELECT id, table_name, local_id, local_modified_at, incoming_modified_at,
                resolved_at, strategy, winner
         FROM sync_conflicts
         ORDER BY resolved_at DESC, id DESC
         LIMIT ?1",
    )?;

    let conflicts = stmt
        .query_map(params![limit as i64], |row| {
            Ok(SyncConflict {
                id: row.get(0)?,
                table_name: row.get(1)?,
                local_id: row.get(2)?,
                local_modified_at: row.get(3)?,
                incoming_modified_at: row.get(4)?,
                resolved_at: row.get(5)?,
                strategy: row.get(6)?,
                winner: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(conflicts)
}
