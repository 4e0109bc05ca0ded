use std::path::Path;

use tether_core::{AnyRecord, Item, Note, Record, Store};

use crate::commands::common::open_store;
use crate::error::CliError;

/// Every live row of every table, items first
pub async fn export_records(store: &Store) -> Result<Vec<AnyRecord>, CliError> {
    let mut records = Vec::new();
    records.extend(store.list::<Item>().await?.into_iter().map(Record::into_any));
    records.extend(store.list::<Note>().await?.into_iter().map(Record::into_any));
    Ok(records)
}

pub async fn run_export(output_path: Option<&Path>, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let records = export_records(&store).await?;
    let rendered = serde_json::to_string_pretty(&records)?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
