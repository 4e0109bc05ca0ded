//! Where the CLI keeps its data and which remote it talks to.
//!
//! Every setting resolves from the command-line flag first, then the
//! environment (a `.env` file is loaded at startup), then a default under the
//! platform data directory.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tether_core::remote::{DirRemote, HttpRemote};
use tether_core::{RemoteService, SyncSettings};

use crate::error::CliError;

pub const DB_PATH_VAR: &str = "TETHER_DB_PATH";
pub const REMOTE_DIR_VAR: &str = "TETHER_REMOTE_DIR";
pub const REMOTE_URL_VAR: &str = "TETHER_REMOTE_URL";
pub const REMOTE_TOKEN_VAR: &str = "TETHER_REMOTE_TOKEN";
pub const CONFIG_VAR: &str = "TETHER_CONFIG";

const SETTINGS_FILE_NAME: &str = "sync.json";

/// A configured sync remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTarget {
    Dir(PathBuf),
    Http { url: String, token: Option<String> },
}

impl RemoteTarget {
    pub fn connect(&self) -> Result<Arc<dyn RemoteService>, CliError> {
        Ok(match self {
            Self::Dir(root) => Arc::new(DirRemote::open(root)?),
            Self::Http { url, token } => Arc::new(HttpRemote::new(url, token.clone())?),
        })
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env_path(DB_PATH_VAR)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("tether").join("tether.db"))
        .ok_or(CliError::NoDataDir("data"))
}

/// The remote to sync with, if any is configured. An HTTP endpoint wins
/// over a shared directory when both come from the environment.
pub fn resolve_remote(
    cli_remote_dir: Option<PathBuf>,
    cli_remote_url: Option<String>,
) -> Option<RemoteTarget> {
    if let Some(dir) = cli_remote_dir {
        return Some(RemoteTarget::Dir(dir));
    }

    let token = env_text(REMOTE_TOKEN_VAR);
    if let Some(url) = cli_remote_url.or_else(|| env_text(REMOTE_URL_VAR)) {
        return Some(RemoteTarget::Http { url, token });
    }

    env_path(REMOTE_DIR_VAR).map(RemoteTarget::Dir)
}

/// Sync settings from the given file, `$TETHER_CONFIG`, or
/// `<config dir>/tether/sync.json` when it exists. Defaults otherwise.
pub fn load_settings(cli_config: Option<PathBuf>) -> Result<SyncSettings, CliError> {
    if let Some(path) = cli_config.or_else(|| env_path(CONFIG_VAR)) {
        return Ok(SyncSettings::load(path)?);
    }

    match default_settings_path() {
        Some(path) if path.exists() => Ok(SyncSettings::load(path)?),
        _ => Ok(SyncSettings::default()),
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join(SETTINGS_FILE_NAME))
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn env_text(name: &str) -> Option<String> {
    tether_core::util::normalize_text_option(env::var(name).ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_text(name).map(PathBuf::from)
}
