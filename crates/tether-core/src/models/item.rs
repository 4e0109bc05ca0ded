//! Item model

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{
    field_bool, field_i64, field_opt_i64, field_opt_string, field_string, row_id, AnyRecord,
    Fields, Record, RowId, Table,
};
use crate::db::Column;
use crate::error::Result;

/// A checklist item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier
    pub id: RowId,
    /// Display name
    pub name: String,
    /// Completion flag
    pub is_done: bool,
    /// Optional free-form note
    pub note: Option<String>,
    /// Optional quantity
    pub quantity: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Selection state in the current process; never persisted or synced
    #[serde(skip)]
    pub is_selected: bool,
}

impl Item {
    pub const NAME: Column<Self, String> = Column::new("name");
    pub const IS_DONE: Column<Self, bool> = Column::new("is_done");
    pub const NOTE: Column<Self, Option<String>> = Column::new("note");
    pub const QUANTITY: Column<Self, Option<i64>> = Column::new("quantity");
    pub const CREATED_AT: Column<Self, i64> = Column::new("created_at");

    /// Create a new open item with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RowId::new(),
            name: name.into(),
            is_done: false,
            note: None,
            quantity: None,
            created_at: crate::util::now_millis(),
            is_selected: false,
        }
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl Record for Item {
    const TABLE: Table = Table::Items;
    const COLUMNS: &'static [&'static str] = &["name", "is_done", "note", "quantity", "created_at"];

    fn id(&self) -> RowId {
        self.id
    }

    fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::from(self.name.clone()));
        fields.insert("is_done".into(), Value::from(self.is_done));
        fields.insert("note".into(), self.note.clone().map_or(Value::Null, Value::from));
        fields.insert("quantity".into(), self.quantity.map_or(Value::Null, Value::from));
        fields.insert("created_at".into(), Value::from(self.created_at));
        fields
    }

    fn from_fields(id: RowId, fields: &Fields) -> Result<Self> {
        Ok(Self {
            id,
            name: field_string(fields, Table::Items, "name")?,
            is_done: field_bool(fields, Table::Items, "is_done")?,
            note: field_opt_string(fields, Table::Items, "note")?,
            quantity: field_opt_i64(fields, Table::Items, "quantity")?,
            created_at: field_i64(fields, Table::Items, "created_at")?,
            is_selected: false,
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row_id(row, 0)?,
            name: row.get(1)?,
            is_done: row.get(2)?,
            note: row.get(3)?,
            quantity: row.get(4)?,
            created_at: row.get(5)?,
            is_selected: false,
        })
    }

    fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO items (id, name, is_done, note, quantity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_done = excluded.is_done,
                note = excluded.note,
                quantity = excluded.quantity,
                created_at = excluded.created_at",
            params![
                self.id.as_str(),
                self.name,
                self.is_done,
                self.note,
                self.quantity,
                self.created_at
            ],
        )?;
        Ok(())
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Items(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_item_new() {
        let item = Item::new("Coffee");
        assert_eq!(item.name, "Coffee");
        assert!(!item.is_done);
        assert!(item.created_at > 0);
    }

    #[test]
    fn fields_skip_ephemeral_selection() {
        let mut item = Item::new("Coffee").with_quantity(2);
        item.is_selected = true;

        let fields = item.to_fields();
        assert!(!fields.contains_key("is_selected"));

        let rebuilt = Item::from_fields(item.id, &fields).unwrap();
        assert!(!rebuilt.is_selected);
        assert_eq!(rebuilt.quantity, Some(2));
        assert_eq!(rebuilt.name, "Coffee");
    }

    #[test]
    fn from_fields_rejects_wrong_types() {
        let mut fields = Item::new("Coffee").to_fields();
        fields.insert("quantity".into(), Value::from("two"));

        let error = Item::from_fields(RowId::new(), &fields).unwrap_err();
        assert!(matches!(error, Error::Schema(message) if message.contains("items.quantity")));
    }
}
