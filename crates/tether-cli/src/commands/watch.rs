use std::path::Path;
use std::time::Duration;

use tether_core::SyncSettings;

use crate::commands::common::{format_item_lines, open_store};
use crate::commands::items::item_query;
use crate::commands::sync::open_engine;
use crate::config::RemoteTarget;
use crate::error::CliError;

/// Print open items on every change until interrupted
pub async fn run_watch(
    interval_secs: u64,
    db_path: &Path,
    remote: Option<&RemoteTarget>,
    settings: SyncSettings,
) -> Result<(), CliError> {
    let (store, _periodic) = if remote.is_some() {
        let engine = open_engine(db_path, remote, settings)?;
        let periodic = engine.spawn_periodic(Duration::from_secs(interval_secs.max(1)));
        (engine.store().clone(), Some(periodic))
    } else {
        tracing::info!("No remote configured; watching local changes only");
        (open_store(db_path)?, None)
    };

    let mut open_items = store.subscribe(item_query(false)).await?;
    loop {
        tokio::select! {
            next = open_items.next() => {
                let Some(result) = next else { break };
                println!("-- version {} ({} open)", result.version, result.rows.len());
                for line in format_item_lines(&result.rows) {
                    println!("{line}");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    open_items.cancel();
    Ok(())
}
