use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tether_core::{Item, Note, Record, RowId, Store, SyncConflict, Table};

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const AMBIGUOUS_MATCH_LIMIT: usize = 3;

#[derive(Debug, Serialize)]
pub struct ItemListItem {
    pub id: String,
    pub name: String,
    pub is_done: bool,
    pub quantity: Option<i64>,
    pub note: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub preview: String,
    pub content: String,
    pub is_pinned: bool,
    pub created_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table: String,
    pub local_id: String,
    pub local_modified_at: i64,
    pub incoming_modified_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
    pub winner: String,
}

pub fn open_store(path: &Path) -> Result<Store, CliError> {
    crate::config::ensure_parent_dir(path)?;
    Ok(Store::open(path)?)
}

/// Find a live row by full id or unique id prefix
pub async fn resolve_record<R: Record>(query: &str, store: &Store) -> Result<R, CliError> {
    let label = table_label(R::TABLE);
    if let Ok(id) = query.parse::<RowId>() {
        if let Some(record) = store.get::<R>(id).await? {
            return Ok(record);
        }
    }

    let matching_ids = store
        .list_ids_by_prefix(R::TABLE, query, AMBIGUOUS_MATCH_LIMIT)
        .await?;

    match matching_ids.as_slice() {
        [] => Err(CliError::NotFound(label, query.to_string())),
        [only] => {
            let id = only
                .parse::<RowId>()
                .map_err(|_| CliError::NotFound(label, query.to_string()))?;
            store
                .get::<R>(id)
                .await?
                .ok_or_else(|| CliError::NotFound(label, query.to_string()))
        }
        _ => {
            let options = matching_ids
                .iter()
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

const fn table_label(table: Table) -> &'static str {
    match table {
        Table::Items => "item",
        Table::Notes => "note",
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn normalize_text(parts: &[String]) -> Option<String> {
    let joined = parts.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn format_item_lines(items: &[Item]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let short_id = short_id(&item.id.to_string());
            let check = if item.is_done { "[x]" } else { "[ ]" };
            let name = match item.quantity {
                Some(quantity) => format!("{} x{quantity}", item.name),
                None => item.name.clone(),
            };
            let relative_time = format_relative_time(item.created_at, now_ms);

            match &item.note {
                Some(note) => format!("{short_id:<13}  {check} {name:<32}  {relative_time:<10}  ({note})"),
                None => format!("{short_id:<13}  {check} {name:<32}  {relative_time}"),
            }
        })
        .collect()
}

pub fn item_to_list_item(item: &Item) -> ItemListItem {
    let now_ms = Utc::now().timestamp_millis();
    ItemListItem {
        id: item.id.to_string(),
        name: item.name.clone(),
        is_done: item.is_done,
        quantity: item.quantity,
        note: item.note.clone(),
        created_at: item.created_at,
        relative_time: format_relative_time(item.created_at, now_ms),
    }
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(&note.id.to_string());
            let pin = if note.is_pinned { "*" } else { " " };
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.created_at, now_ms);
            format!("{short_id:<13} {pin} {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        is_pinned: note.is_pinned,
        created_at: note.created_at,
        relative_time: format_relative_time(note.created_at, now_ms),
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.content.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table: conflict.table_name.clone(),
        local_id: conflict.local_id.clone(),
        local_modified_at: conflict.local_modified_at,
        incoming_modified_at: conflict.incoming_modified_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
        winner: conflict.winner.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<16}  {}={}  winner={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.table_name,
                short_id(&conflict.local_id),
                conflict.winner,
                conflict.local_modified_at,
                conflict.incoming_modified_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
