use std::path::Path;

use tether_core::{Direction, Item, Select};

use crate::commands::common::{
    format_item_lines, item_to_list_item, normalize_identifier, normalize_text, open_store,
    resolve_record, ItemListItem,
};
use crate::error::CliError;

pub fn item_query(include_done: bool) -> Select<Item> {
    let query = Select::all().order_by(Item::CREATED_AT, Direction::Asc);
    if include_done {
        query
    } else {
        query.filter(Item::IS_DONE.eq(false))
    }
}

pub async fn run_add(
    name_parts: &[String],
    quantity: Option<i64>,
    note: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let name = normalize_text(name_parts).ok_or(CliError::EmptyName)?;

    let mut item = Item::new(name);
    item.quantity = quantity;
    item.note = tether_core::util::normalize_text_option(note);

    let store = open_store(db_path)?;
    store.insert(&item).await?;

    println!("{}", item.id);
    Ok(())
}

pub async fn run_list(include_done: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let items = store.query(&item_query(include_done)).await?;

    if as_json {
        let json_items = items
            .iter()
            .map(item_to_list_item)
            .collect::<Vec<ItemListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_item_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_set_done(id: &str, is_done: bool, db_path: &Path) -> Result<(), CliError> {
    let id = normalize_identifier(id)?;
    let store = open_store(db_path)?;
    let mut item = resolve_record::<Item>(&id, &store).await?;

    if item.is_done != is_done {
        item.is_done = is_done;
        store.update(&item).await?;
    }

    println!("{}", item.id);
    Ok(())
}

pub async fn run_rename(id: &str, name_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let id = normalize_identifier(id)?;
    let name = normalize_text(name_parts).ok_or(CliError::EmptyName)?;
    let store = open_store(db_path)?;
    let mut item = resolve_record::<Item>(&id, &store).await?;

    if item.name != name {
        item.name = name;
        store.update(&item).await?;
    }

    println!("{}", item.id);
    Ok(())
}

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = normalize_identifier(id)?;
    let store = open_store(db_path)?;
    let item = resolve_record::<Item>(&id, &store).await?;

    store.delete::<Item>(item.id).await?;
    println!("{}", item.id);
    Ok(())
}
