use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "A local-first shopping list that syncs when it can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Directory shared with other devices as the sync remote
    #[arg(long, global = true, value_name = "DIR", conflicts_with = "remote_url")]
    pub remote_dir: Option<PathBuf>,

    /// HTTP sync endpoint
    #[arg(long, global = true, value_name = "URL")]
    pub remote_url: Option<String>,

    /// Sync settings file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add an item
    #[command(alias = "new")]
    Add {
        /// Item name
        name: Vec<String>,
        /// How many to get
        #[arg(short, long)]
        quantity: Option<i64>,
        /// Free-form note
        #[arg(short, long)]
        note: Option<String>,
    },
    /// List open items
    #[command(alias = "ls")]
    List {
        /// Include completed items
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an item as done
    Done {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Mark an item as not done
    Undo {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Rename an item
    Rename {
        /// Item ID or unique ID prefix
        id: String,
        /// New name
        name: Vec<String>,
    },
    /// Delete an item
    #[command(alias = "rm")]
    Delete {
        /// Item ID or unique ID prefix
        id: String,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Export every item and note as JSON
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Sync with the configured remote (fetch, then send)
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Print open items whenever they change, syncing in the background
    Watch {
        /// Seconds between background syncs
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Create a note
    Add {
        /// Note content
        content: Vec<String>,
    },
    /// List notes, pinned first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Pull remote changes only
    Fetch,
    /// Push local changes only
    Send,
    /// Show pending changes and cursors
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
