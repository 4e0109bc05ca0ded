use std::path::Path;

use tether_core::{Direction, Note, Select};

use crate::commands::common::{
    format_note_lines, normalize_text, note_to_list_item, open_store, NoteListItem,
};
use crate::error::CliError;

pub async fn run_note_add(content_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let content = normalize_text(content_parts).ok_or(CliError::EmptyContent)?;

    let store = open_store(db_path)?;
    let note = Note::new(content);
    store.insert(&note).await?;

    println!("{}", note.id);
    Ok(())
}

pub async fn run_note_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let query = Select::<Note>::all()
        .order_by(Note::IS_PINNED, Direction::Desc)
        .order_by(Note::CREATED_AT, Direction::Desc);
    let notes = store.query(&query).await?;

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
