//! Tether CLI - a local-first shopping list from the terminal
//!
//! Every command works offline against the local database; `tether sync`
//! exchanges changes with a shared directory or an HTTP endpoint.

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands, NoteCommands};
use crate::commands::export::run_export;
use crate::commands::items::{run_add, run_delete, run_list, run_rename, run_set_done};
use crate::commands::notes::{run_note_add, run_note_list};
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config::{load_settings, resolve_db_path, resolve_remote};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tether=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let remote = resolve_remote(cli.remote_dir, cli.remote_url);

    match cli.command {
        Commands::Add {
            name,
            quantity,
            note,
        } => run_add(&name, quantity, note, &db_path).await?,
        Commands::List { all, json } => run_list(all, json, &db_path).await?,
        Commands::Done { id } => run_set_done(&id, true, &db_path).await?,
        Commands::Undo { id } => run_set_done(&id, false, &db_path).await?,
        Commands::Rename { id, name } => run_rename(&id, &name, &db_path).await?,
        Commands::Delete { id } => run_delete(&id, &db_path).await?,
        Commands::Note { command } => match command {
            NoteCommands::Add { content } => run_note_add(&content, &db_path).await?,
            NoteCommands::List { json } => run_note_list(json, &db_path).await?,
        },
        Commands::Export { output } => run_export(output.as_deref(), &db_path).await?,
        Commands::Sync { command } => {
            let settings = load_settings(cli.config)?;
            run_sync(command, &db_path, remote.as_ref(), settings).await?;
        }
        Commands::Watch { interval } => {
            let settings = load_settings(cli.config)?;
            run_watch(interval, &db_path, remote.as_ref(), settings).await?;
        }
    }

    Ok(())
}
