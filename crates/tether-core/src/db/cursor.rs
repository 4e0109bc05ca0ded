//! Per-table pull cursors

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Table;

/// Position in the remote change stream of one table.
///
/// Opaque to the engine apart from ordering: a cursor never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    pub const fn new(position: i64) -> Self {
        Self(position)
    }

    pub const fn position(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last durably applied cursor for a table
pub fn load(conn: &Connection, table: Table) -> Result<Option<Cursor>> {
    Ok(conn
        .query_row(
            "SELECT cursor FROM sync_cursors WHERE table_name = ?1",
            params![table.as_str()],
            |row| row.get(0).map(Cursor),
        )
        .optional()?)
}

/// Persist a cursor. A value older than the stored one is ignored.
pub fn save(conn: &Connection, table: Table, cursor: Cursor, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_cursors (table_name, cursor, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_name) DO UPDATE SET
            cursor = MAX(sync_cursors.cursor, excluded.cursor),
            updated_at = excluded.updated_at",
        params![table.as_str(), cursor.0, now],
    )?;
    Ok(())
}

/// Every stored cursor, by table
pub fn all(conn: &Connection) -> Result<Vec<(Table, Cursor)>> {
    let mut stmt = conn.prepare("SELECT table_name, cursor FROM sync_cursors ORDER BY table_name")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut cursors = Vec::with_capacity(rows.len());
    for (table_name, position) in rows {
        match table_name.parse::<Table>() {
            Ok(table) => cursors.push((table, Cursor(position))),
            Err(_) => tracing::warn!("Ignoring cursor for unknown table '{table_name}'"),
        }
    }
    Ok(cursors)
}
