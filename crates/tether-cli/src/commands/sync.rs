use std::path::Path;

use tether_core::{SyncEngine, SyncReport, SyncSettings, SyncSummary};

use crate::cli::SyncCommands;
use crate::commands::common::{
    format_sync_conflict_lines, open_store, sync_conflict_to_item, SyncConflictItem,
};
use crate::config::RemoteTarget;
use crate::error::CliError;

pub fn open_engine(
    db_path: &Path,
    remote: Option<&RemoteTarget>,
    settings: SyncSettings,
) -> Result<SyncEngine, CliError> {
    let remote = remote.ok_or(CliError::SyncNotConfigured)?;
    let store = open_store(db_path)?;
    Ok(SyncEngine::new(store, remote.connect()?, settings))
}

pub async fn run_sync(
    command: Option<SyncCommands>,
    db_path: &Path,
    remote: Option<&RemoteTarget>,
    settings: SyncSettings,
) -> Result<(), CliError> {
    match command {
        None => {
            let engine = open_engine(db_path, remote, settings)?;
            print_report("Sync", &engine.sync_changes().await?);
        }
        Some(SyncCommands::Fetch) => {
            let engine = open_engine(db_path, remote, settings)?;
            print_report("Fetch", &engine.fetch_changes().await?);
        }
        Some(SyncCommands::Send) => {
            let engine = open_engine(db_path, remote, settings)?;
            print_report("Send", &engine.send_changes().await?);
        }
        Some(SyncCommands::Status { json }) => run_sync_status(json, db_path, remote).await?,
        Some(SyncCommands::Conflicts { limit, json }) => {
            run_sync_conflicts(limit, json, db_path).await?;
        }
    }
    Ok(())
}

fn print_report(label: &str, report: &SyncReport) {
    println!("{label} completed: {}", report.summary());
    for failure in &report.failures {
        let id = failure
            .local_id
            .map(|id| id.to_string())
            .or_else(|| failure.remote_id.as_ref().map(ToString::to_string))
            .unwrap_or_default();
        println!("  {} {id}: {}", failure.table, failure.message);
    }
}

pub fn format_summary_lines(summary: &SyncSummary, remote: Option<&RemoteTarget>) -> Vec<String> {
    let remote = match remote {
        Some(RemoteTarget::Dir(root)) => root.display().to_string(),
        Some(RemoteTarget::Http { url, .. }) => url.clone(),
        None => "not configured".to_string(),
    };

    let mut lines = vec![
        format!("Remote:       {remote}"),
        format!("Pending:      {}", summary.dirty),
        format!("Tombstones:   {}", summary.tombstones),
    ];
    for (table, cursor) in &summary.cursors {
        lines.push(format!("Cursor:       {table} @ {cursor}"));
    }
    lines
}

async fn run_sync_status(
    as_json: bool,
    db_path: &Path,
    remote: Option<&RemoteTarget>,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let summary = store.sync_summary().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in format_summary_lines(&summary, remote) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_sync_conflicts(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let conflicts = store.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
