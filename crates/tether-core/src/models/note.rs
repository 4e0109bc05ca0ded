//! Note model

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{field_bool, field_i64, field_string, row_id, AnyRecord, Fields, Record, RowId, Table};
use crate::db::Column;
use crate::error::Result;

/// A free-text note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: RowId,
    /// Plain text content
    pub content: String,
    /// Pinned notes sort first
    pub is_pinned: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Note {
    pub const CONTENT: Column<Self, String> = Column::new("content");
    pub const IS_PINNED: Column<Self, bool> = Column::new("is_pinned");
    pub const CREATED_AT: Column<Self, i64> = Column::new("created_at");

    /// Create a new note with the given content
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: RowId::new(),
            content: content.into(),
            is_pinned: false,
            created_at: crate::util::now_millis(),
        }
    }

    /// Get first line as title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Check if note content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

impl Record for Note {
    const TABLE: Table = Table::Notes;
    const COLUMNS: &'static [&'static str] = &["content", "is_pinned", "created_at"];

    fn id(&self) -> RowId {
        self.id
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("content".into(), Value::from(self.content.clone()));
        fields.insert("is_pinned".into(), Value::from(self.is_pinned));
        fields.insert("created_at".into(), Value::from(self.created_at));
        fields
    }

    fn from_fields(id: RowId, fields: &Fields) -> Result<Self> {
        Ok(Self {
            id,
            content: field_string(fields, Table::Notes, "content")?,
            is_pinned: field_bool(fields, Table::Notes, "is_pinned")?,
            created_at: field_i64(fields, Table::Notes, "created_at")?,
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row, 0)?,
            content: row.get(1)?,
            is_pinned: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO notes (id, content, is_pinned, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                is_pinned = excluded.is_pinned,
                created_at = excluded.created_at",
            params![self.id.as_str(), self.content, self.is_pinned, self.created_at],
        )?;
        Ok(())
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Notes(self)
    }
}
