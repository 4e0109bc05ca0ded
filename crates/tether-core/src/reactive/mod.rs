//! Live queries over the local store
//!
//! Every committed write transaction publishes the set of tables it touched
//! on a [`tokio::sync::watch`] channel. A subscription re-runs its query
//! when one of its dependency tables moved past the version it last
//! evaluated at, and pushes the result into its own watch channel. Watch
//! channels only keep the latest value, so bursts of commits coalesce into a
//! single re-evaluation and a subscriber can never observe an older snapshot
//! after a newer one.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{Query, Store};
use crate::error::Result;
use crate::models::Table;

/// Commit counters: the global commit number and, per table, the commit
/// that last touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableVersions {
    commit: u64,
    tables: BTreeMap<Table, u64>,
}

impl TableVersions {
    /// Number of committed write transactions that touched any table
    pub const fn commit(&self) -> u64 {
        self.commit
    }

    /// Commit number that last touched `table` (0 if never)
    pub fn version_of(&self, table: Table) -> u64 {
        self.tables.get(&table).copied().unwrap_or_default()
    }

    fn latest_of(&self, tables: &[Table]) -> u64 {
        tables
            .iter()
            .map(|table| self.version_of(*table))
            .max()
            .unwrap_or_default()
    }
}

/// Table-change notifications for one store
#[derive(Debug)]
pub(crate) struct ChangeFeed {
    versions: watch::Sender<TableVersions>,
    registrations: Mutex<BTreeMap<Table, usize>>,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        let (versions, _) = watch::channel(TableVersions::default());
        Self {
            versions,
            registrations: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one committed transaction. Must be called while the write
    /// lock is still held so commit numbers follow commit order.
    pub(crate) fn publish(&self, touched: impl IntoIterator<Item = Table>) {
        self.versions.send_modify(|versions| {
            versions.commit += 1;
            let commit = versions.commit;
            for table in touched {
                versions.tables.insert(table, commit);
            }
        });
    }

    pub(crate) fn current(&self) -> TableVersions {
        self.versions.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<TableVersions> {
        self.versions.subscribe()
    }

    fn register(self: &Arc<Self>, tables: &[Table]) -> Registration {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for table in tables {
            *registrations.entry(*table).or_default() += 1;
        }
        Registration {
            feed: Arc::clone(self),
            tables: tables.to_vec(),
        }
    }

    pub(crate) fn active_subscriptions(&self, table: Table) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .copied()
            .unwrap_or_default()
    }
}

/// Dependency registration; released on drop
#[derive(Debug)]
struct Registration {
    feed: Arc<ChangeFeed>,
    tables: Vec<Table>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut registrations = self
            .feed
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for table in &self.tables {
            if let Some(count) = registrations.get_mut(table) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    registrations.remove(table);
                }
            }
        }
    }
}

/// One emitted query result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet<T> {
    /// Query output
    pub rows: T,
    /// Commit number the result was evaluated at; strictly increases between
    /// emissions of one subscription
    pub version: u64,
}

/// A live query. Dropping it cancels the subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: watch::Receiver<ResultSet<T>>,
    task: JoinHandle<()>,
    delivered_initial: bool,
    _registration: Registration,
}

impl<T: Clone> Subscription<T> {
    /// Latest emitted result, without waiting
    pub fn current(&self) -> ResultSet<T> {
        self.receiver.borrow().clone()
    }

    /// Next emission. The first call yields the initial result immediately.
    ///
    /// Returns `None` once the subscription can no longer emit.
    pub async fn next(&mut self) -> Option<ResultSet<T>> {
        if !self.delivered_initial {
            self.delivered_initial = true;
            return Some(self.receiver.borrow_and_update().clone());
        }

        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop emissions and release the dependency registration
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a live query on `store`
pub(crate) async fn subscribe<Q: Query>(store: &Store, query: Q) -> Result<Subscription<Q::Output>> {
    let query = Arc::new(query);
    let dependencies = query.dependencies();
    let feed = store.feed();
    let registration = feed.register(&dependencies);

    // Subscribe before the first evaluation so no commit can slip between them
    let mut changes = feed.watch();
    let (initial, version) = {
        let query = Arc::clone(&query);
        store.snapshot(move |conn| query.run(conn)).await?
    };

    let (sender, receiver) = watch::channel(ResultSet {
        rows: initial,
        version,
    });

    let task_store = store.clone();
    let task = tokio::spawn(async move {
        let mut evaluated_at = version;
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = sender.closed() => break,
            }

            let latest = changes.borrow_and_update().latest_of(&dependencies);
            if latest <= evaluated_at {
                continue;
            }

            let query = Arc::clone(&query);
            match task_store.snapshot(move |conn| query.run(conn)).await {
                Ok((rows, version)) => {
                    evaluated_at = version;
                    sender.send_if_modified(|current| {
                        if current.rows == rows {
                            false
                        } else {
                            *current = ResultSet { rows, version };
                            true
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!("Live query re-evaluation failed: {error}");
                }
            }

            if sender.is_closed() {
                break;
            }
        }
        tracing::debug!("Live query stopped");
    });

    Ok(Subscription {
        receiver,
        task,
        delivered_initial: false,
        _registration: registration,
    })
}
