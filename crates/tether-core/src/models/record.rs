//! Record abstraction shared by every synced table

use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Item, Note};

/// Column values keyed by column name, as exchanged with the remote.
pub type Fields = serde_json::Map<String, Value>;

/// The closed set of tables that participate in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Items,
    Notes,
}

impl Table {
    /// Every synced table, in sync order.
    pub const ALL: [Self; 2] = [Self::Items, Self::Notes];

    /// Name of the backing `SQLite` table.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Notes => "notes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "items" => Ok(Self::Items),
            "notes" => Ok(Self::Notes),
            other => Err(Error::InvalidInput(format!("unknown table '{other}'"))),
        }
    }
}

/// A local primary key, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(Uuid);

impl RowId {
    /// Create a new unique row ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A row type stored in one synced table.
///
/// Implementors own the mapping between their typed columns, the `SQLite`
/// row layout, and the untyped [`Fields`] exchanged with the remote. Merge
/// logic is resolved per implementor, so every table keeps compile-time
/// checked conversions.
pub trait Record: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Table this record lives in.
    const TABLE: Table;

    /// Persisted and synced columns, excluding `id`, in `SELECT` order.
    const COLUMNS: &'static [&'static str];

    /// Local primary key.
    fn id(&self) -> RowId;

    /// Synced column values. Ephemeral fields are never included.
    fn to_fields(&self) -> Fields;

    /// Rebuild a record from synced column values.
    ///
    /// Fails with [`Error::Schema`] when a known column is missing or has the
    /// wrong type.
    fn from_fields(id: RowId, fields: &Fields) -> Result<Self>;

    /// Parse a row selected as `id` followed by [`Record::COLUMNS`].
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;

    /// Insert or replace this record's row.
    fn upsert(&self, conn: &Connection) -> Result<()>;

    /// Wrap into the tagged union.
    fn into_any(self) -> AnyRecord;
}

/// A row from any synced table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum AnyRecord {
    Items(Item),
    Notes(Note),
}

impl AnyRecord {
    pub const fn table(&self) -> Table {
        match self {
            Self::Items(_) => Table::Items,
            Self::Notes(_) => Table::Notes,
        }
    }

    pub fn id(&self) -> RowId {
        match self {
            Self::Items(item) => item.id(),
            Self::Notes(note) => note.id(),
        }
    }
}

/// `SELECT id, <columns> FROM <table>` for a record type.
pub(crate) fn select_sql<R: Record>() -> String {
    format!(
        "SELECT id, {} FROM {}",
        R::COLUMNS.join(", "),
        R::TABLE.as_str()
    )
}

/// Load one record by id.
pub(crate) fn load_record<R: Record>(conn: &Connection, id: RowId) -> Result<Option<R>> {
    let sql = format!("{} WHERE id = ?1", select_sql::<R>());
    match conn.query_row(&sql, [id.as_str()], R::from_row) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Physically remove one record's row. Returns whether a row existed.
pub(crate) fn delete_record(conn: &Connection, table: Table, id: RowId) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.as_str());
    let rows = conn.execute(&sql, [id.as_str()])?;
    Ok(rows > 0)
}

/// Parse the `id` column of a row.
pub(crate) fn row_id(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<RowId> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
    })
}

fn missing(table: Table, column: &str) -> Error {
    Error::Schema(format!("{table}.{column} is missing"))
}

fn mistyped(table: Table, column: &str, expected: &str, value: &Value) -> Error {
    Error::Schema(format!("{table}.{column} expected {expected}, got {value}"))
}

pub(crate) fn field_string(fields: &Fields, table: Table, column: &str) -> Result<String> {
    match fields.get(column) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(mistyped(table, column, "string", other)),
        None => Err(missing(table, column)),
    }
}

pub(crate) fn field_opt_string(fields: &Fields, table: Table, column: &str) -> Result<Option<String>> {
    match fields.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(mistyped(table, column, "string or null", other)),
    }
}

pub(crate) fn field_bool(fields: &Fields, table: Table, column: &str) -> Result<bool> {
    match fields.get(column) {
        Some(Value::Bool(value)) => Ok(*value),
        // Older clients stored flags as 0/1
        Some(Value::Number(number)) if number.as_i64().is_some_and(|n| n == 0 || n == 1) => {
            Ok(number.as_i64() == Some(1))
        }
        Some(other) => Err(mistyped(table, column, "bool", other)),
        None => Err(missing(table, column)),
    }
}

pub(crate) fn field_i64(fields: &Fields, table: Table, column: &str) -> Result<i64> {
    match fields.get(column) {
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| mistyped(table, column, "integer", &Value::Number(number.clone()))),
        Some(other) => Err(mistyped(table, column, "integer", other)),
        None => Err(missing(table, column)),
    }
}

pub(crate) fn field_opt_i64(fields: &Fields, table: Table, column: &str) -> Result<Option<i64>> {
    match fields.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| mistyped(table, column, "integer", &Value::Number(number.clone()))),
        Some(other) => Err(mistyped(table, column, "integer or null", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_row_id_parse() {
        let id = RowId::new();
        let parsed: RowId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_table_roundtrip() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
        assert!("users".parse::<Table>().is_err());
    }

    #[test]
    fn field_bool_accepts_legacy_integers() {
        let values = fields(json!({ "a": true, "b": 1, "c": 0, "d": 7 }));
        assert!(field_bool(&values, Table::Items, "a").unwrap());
        assert!(field_bool(&values, Table::Items, "b").unwrap());
        assert!(!field_bool(&values, Table::Items, "c").unwrap());
        assert!(matches!(
            field_bool(&values, Table::Items, "d"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn missing_required_field_is_schema_error() {
        let values = fields(json!({ "note": null }));
        assert!(matches!(
            field_string(&values, Table::Items, "name"),
            Err(Error::Schema(_))
        ));
        assert_eq!(field_opt_string(&values, Table::Items, "note").unwrap(), None);
        assert_eq!(field_opt_i64(&values, Table::Items, "quantity").unwrap(), None);
    }
}
