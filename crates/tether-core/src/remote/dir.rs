//! Remote backed by a shared directory
//!
//! Each table is one JSON change log (`<table>.json`). Several local
//! databases pointing at the same directory (a synced folder, a USB stick)
//! exchange changes through it without a server. Every read-modify-write
//! cycle holds an exclusive lock on `.tether.lock`, so separate processes
//! never overwrite each other's pushes.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;
use uuid::Uuid;

use super::log::ChangeLog;
use crate::db::Cursor;
use crate::models::{RemoteId, Table};
use crate::sync::{OutgoingChange, PullBatch, RemoteError, RemoteService};

const LOCK_FILE: &str = ".tether.lock";

#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    /// Use `root` as the shared directory, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self, table: Table) -> PathBuf {
        self.root.join(format!("{table}.json"))
    }

    /// Run `cycle` on a blocking thread while holding the directory lock
    async fn locked<T, F>(&self, cycle: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, RemoteError> + Send + 'static,
    {
        let remote = self.clone();
        tokio::task::spawn_blocking(move || {
            let path = remote.root.join(LOCK_FILE);
            let lock = File::options()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|error| io_error(&path, &error))?;
            FileExt::lock_exclusive(&lock).map_err(|error| io_error(&path, &error))?;

            // Closing the handle releases the lock
            let result = cycle(&remote);
            drop(lock);
            result
        })
        .await
        .map_err(|error| RemoteError::transient(format!("directory remote task failed: {error}")))?
    }

    fn load(&self, table: Table) -> Result<ChangeLog, RemoteError> {
        let path = self.log_path(table);
        match std::fs::read_to_string(&path) {
            Ok(payload) => serde_json::from_str(&payload).map_err(|error| {
                RemoteError::schema(format!("{} is not a change log: {error}", path.display()))
            }),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(ChangeLog::default()),
            Err(error) => Err(io_error(&path, &error)),
        }
    }

    fn store(&self, table: Table, log: &ChangeLog) -> Result<(), RemoteError> {
        let path = self.log_path(table);
        let payload = serde_json::to_vec_pretty(log)
            .map_err(|error| RemoteError::schema(error.to_string()))?;

        // Stage in a uniquely named file, then rename over the log
        let mut staging =
            NamedTempFile::new_in(&self.root).map_err(|error| io_error(&self.root, &error))?;
        staging
            .write_all(&payload)
            .map_err(|error| io_error(staging.path(), &error))?;
        staging
            .persist(&path)
            .map_err(|error| io_error(&path, &error.error))?;
        Ok(())
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> RemoteError {
    RemoteError::transient(format!("{}: {error}", path.display()))
}

#[async_trait]
impl RemoteService for DirRemote {
    async fn pull(
        &self,
        table: Table,
        since: Option<Cursor>,
        limit: usize,
    ) -> Result<PullBatch, RemoteError> {
        self.locked(move |remote| Ok(remote.load(table)?.pull(since, limit)))
            .await
    }

    async fn push(
        &self,
        table: Table,
        changes: Vec<OutgoingChange>,
    ) -> Result<Vec<Result<RemoteId, RemoteError>>, RemoteError> {
        let count = changes.len();
        let results = self
            .locked(move |remote| {
                let mut log = remote.load(table)?;
                let results: Vec<Result<RemoteId, RemoteError>> = changes
                    .iter()
                    .map(|change| {
                        Ok(log.apply(change, || RemoteId::new(Uuid::now_v7().to_string())))
                    })
                    .collect();
                remote.store(table, &log)?;
                Ok(results)
            })
            .await?;

        tracing::debug!("Wrote {count} {table} changes to {}", self.root.display());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fields, RowId};
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn pushed_changes_are_visible_to_another_handle() {
        let dir = tempdir().unwrap();
        let writer = DirRemote::open(dir.path()).unwrap();
        let reader = DirRemote::open(dir.path()).unwrap();

        let local_id = RowId::new();
        let results = writer
            .push(
                Table::Notes,
                vec![OutgoingChange {
                    local_id,
                    remote_id: None,
                    fields: Fields::new(),
                    last_modified_at: 42,
                    is_deleted: false,
                }],
            )
            .await
            .unwrap();
        let remote_id = results[0].clone().unwrap();

        let batch = reader.pull(Table::Notes, None, 10).await.unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].remote_id, remote_id);
        assert_eq!(batch.rows[0].origin_id, Some(local_id));
        assert!(reader.pull(Table::Items, None, 10).await.unwrap().rows.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_handles_do_not_lose_pushes() {
        let dir = tempdir().unwrap();
        let push_many = |remote: DirRemote| async move {
            for n in 0..20 {
                remote
                    .push(
                        Table::Items,
                        vec![OutgoingChange {
                            local_id: RowId::new(),
                            remote_id: None,
                            fields: Fields::new(),
                            last_modified_at: n,
                            is_deleted: false,
                        }],
                    )
                    .await
                    .unwrap();
            }
        };

        let laptop = tokio::spawn(push_many(DirRemote::open(dir.path()).unwrap()));
        let phone = tokio::spawn(push_many(DirRemote::open(dir.path()).unwrap()));
        laptop.await.unwrap();
        phone.await.unwrap();

        let reader = DirRemote::open(dir.path()).unwrap();
        let batch = reader.pull(Table::Items, None, 100).await.unwrap();
        assert_eq!(batch.rows.len(), 40);
        // Only the lock file and the log remain; staging files are renamed away
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, [LOCK_FILE, "items.json"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_log_is_a_schema_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("items.json"), "not json").unwrap();
        let remote = DirRemote::open(dir.path()).unwrap();

        let error = remote.pull(Table::Items, None, 10).await.unwrap_err();
        assert_eq!(error.kind, crate::sync::RemoteErrorKind::Schema);
    }
}
