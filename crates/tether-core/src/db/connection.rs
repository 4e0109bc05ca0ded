//! Store handle and connection management

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use tokio::sync::Mutex;

use super::cursor::{self, Cursor};
use super::query::{Query, Select};
use super::transaction::WriteTransaction;
use super::{conflicts, migrations, tracker};
use crate::error::Result;
use crate::models::{Record, RowId, SyncConflict, SyncMetadata, Table};
use crate::reactive::{self, ChangeFeed, Subscription, TableVersions};

/// Pending sync work and pull progress, for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Rows waiting to be pushed, tombstones included
    pub dirty: usize,
    /// Tombstones kept locally
    pub tombstones: usize,
    /// Last applied pull cursor per table
    pub cursors: Vec<(Table, Cursor)>,
}

/// Handle to the local store.
///
/// Cheap to clone; every clone shares one writer connection guarded by an
/// async mutex. Readers observe the last committed state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    feed: Arc<ChangeFeed>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        Self::from_connection(conn, Some(path))
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        tracing::debug!("Store opened at {:?}", path);

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                feed: Arc::new(ChangeFeed::new()),
                path,
            }),
        })
    }

    /// Database file location (`None` when in memory)
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub(crate) fn feed(&self) -> &Arc<ChangeFeed> {
        &self.inner.feed
    }

    /// Run an atomic unit of mutations.
    ///
    /// The closure runs inside one `IMMEDIATE` transaction. Returning `Err`
    /// rolls everything back. On commit, live queries depending on a touched
    /// table are notified.
    pub async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<T> + Send,
        T: Send,
    {
        let mut conn = self.inner.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut wtx = WriteTransaction::new(tx);
        let value = f(&mut wtx)?;
        let touched = wtx.commit()?;

        if !touched.is_empty() {
            self.inner.feed.publish(touched);
        }
        Ok(value)
    }

    /// Run a read against the last committed state
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let conn = self.inner.conn.lock().await;
        f(&conn)
    }

    /// Like [`Store::read`], also returning the commit number the read saw
    pub(crate) async fn snapshot<T, F>(&self, f: F) -> Result<(T, u64)>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let conn = self.inner.conn.lock().await;
        let version = self.inner.feed.current().commit();
        Ok((f(&conn)?, version))
    }

    /// Evaluate a query once
    pub async fn query<Q: Query>(&self, query: &Q) -> Result<Q::Output> {
        self.read(|conn| query.run(conn)).await
    }

    /// Every row of a table, oldest first
    pub async fn list<R: Record>(&self) -> Result<Vec<R>> {
        self.query(&Select::<R>::all()).await
    }

    pub async fn get<R: Record>(&self, id: RowId) -> Result<Option<R>> {
        self.read(|conn| crate::models::load_record(conn, id)).await
    }

    pub async fn insert<R: Record>(&self, record: &R) -> Result<()> {
        self.write(|tx| tx.insert(record).map(|_| ())).await
    }

    pub async fn update<R: Record>(&self, record: &R) -> Result<()> {
        self.write(|tx| tx.update(record).map(|_| ())).await
    }

    pub async fn delete<R: Record>(&self, id: RowId) -> Result<()> {
        self.write(|tx| tx.delete::<R>(id)).await
    }

    /// Start a live query; the first emission is the current result
    pub async fn subscribe<Q: Query>(&self, query: Q) -> Result<Subscription<Q::Output>> {
        reactive::subscribe(self, query).await
    }

    /// Per-table commit counters as of the last commit
    pub fn current_version(&self) -> TableVersions {
        self.inner.feed.current()
    }

    /// Number of live queries currently depending on `table`
    pub fn active_subscriptions(&self, table: Table) -> usize {
        self.inner.feed.active_subscriptions(table)
    }

    pub async fn metadata(&self, table: Table, id: RowId) -> Result<Option<SyncMetadata>> {
        self.read(|conn| tracker::metadata(conn, table, id)).await
    }

    /// Most recent conflict resolutions first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.read(|conn| conflicts::list(conn, limit)).await
    }

    pub async fn sync_summary(&self) -> Result<SyncSummary> {
        self.read(|conn| {
            Ok(SyncSummary {
                dirty: tracker::dirty_count(conn)?,
                tombstones: tracker::tombstone_count(conn)?,
                cursors: cursor::all(conn)?,
            })
        })
        .await
    }

    /// Ids of live rows in `table` starting with `prefix`, at most `limit`
    pub async fn list_ids_by_prefix(
        &self,
        table: Table,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT id FROM {} WHERE substr(id, 1, length(?1)) = ?1 ORDER BY id LIMIT ?2",
            table.as_str()
        );
        let prefix = prefix.to_lowercase();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params![prefix, limit], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }
}

/// Configure `SQLite` for a single-writer local store
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" and keep their journal mode
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}
