//! Sync engine configuration.
//!
//! Settings are plain JSON so the same file can be shared by every client.
//! Unknown keys are rejected to catch typos early.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Table;
use crate::sync::{MergeStrategy, RetryPolicy};

/// Which leg `sync_changes` runs first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOrder {
    #[default]
    FetchFirst,
    SendFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    /// Upper bound for one remote call
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Rows requested per pull
    pub pull_batch_size: usize,
    /// Changes sent per push
    pub push_batch_size: usize,
    pub order: SyncOrder,
    /// Per-table merge strategy; tables not listed use the default
    pub strategies: BTreeMap<Table, MergeStrategy>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            pull_batch_size: 200,
            push_batch_size: 100,
            order: SyncOrder::default(),
            strategies: BTreeMap::new(),
        }
    }
}

impl SyncSettings {
    /// Parse and validate settings from JSON
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidInput(format!("invalid sync settings: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded sync settings from {}", path.display());
        Self::from_json_str(&payload)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::InvalidInput(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.retry.quota_backoff_multiplier == 0 {
            return Err(Error::InvalidInput(
                "retry.quota_backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.pull_batch_size == 0 || self.push_batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch sizes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn strategy_for(&self, table: Table) -> MergeStrategy {
        self.strategies.get(&table).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn with_strategy(mut self, table: Table, strategy: MergeStrategy) -> Self {
        self.strategies.insert(table, strategy);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_uses_defaults() {
        let settings = SyncSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.strategy_for(Table::Items), MergeStrategy::MergeNoClobber);
    }

    #[test]
    fn parses_strategies_and_order() {
        let settings = SyncSettings::from_json_str(
            r#"{
                "order": "send_first",
                "push_batch_size": 10,
                "retry": { "max_attempts": 2 },
                "strategies": { "notes": "last_writer_wins" }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.order, SyncOrder::SendFirst);
        assert_eq!(settings.push_batch_size, 10);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.strategy_for(Table::Notes), MergeStrategy::LastWriterWins);
        assert_eq!(settings.strategy_for(Table::Items), MergeStrategy::MergeNoClobber);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(SyncSettings::from_json_str(r#"{"timeout": 5}"#).is_err());
        assert!(SyncSettings::from_json_str(r#"{"strategies": {"users": "replace"}}"#).is_err());
        assert!(SyncSettings::from_json_str(r#"{"pull_batch_size": 0}"#).is_err());
        assert!(SyncSettings::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"request_timeout_ms": 250}"#).unwrap();

        let settings = SyncSettings::load(&path).unwrap();
        assert_eq!(settings.request_timeout(), Duration::from_millis(250));
    }
}
