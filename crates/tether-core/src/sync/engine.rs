//! Sync orchestration
//!
//! A [`SyncEngine`] binds one [`Store`] to one [`RemoteService`]. Runs are
//! mutually exclusive: a call arriving while a run that covers it is in
//! flight joins that run and shares its result; any other call waits for
//! the in-flight run to finish and then starts its own.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::SyncError;
use super::remote::{OutgoingChange, RemoteError, RemoteService, RemoteRow};
use super::report::{SyncLeg, RowFailure, SyncReport};
use super::resolver::{apply_remote_row, Change};
use super::status::{ActivityGuard, SyncActivity, SyncStatus};
use crate::config::{SyncOrder, SyncSettings};
use crate::db::{cursor, tracker, ClearOutcome, Cursor, DirtyToken, Store};
use crate::models::{load_record, Item, Note, Record, RemoteId, Table};

type SyncOutcome = Result<SyncReport, SyncError>;
type SharedRun = Shared<BoxFuture<'static, SyncOutcome>>;

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Fetch,
    Send,
    Sync,
}

impl SyncKind {
    /// Whether a run of this kind also does everything `other` would
    pub const fn covers(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Sync, _) | (Self::Fetch, Self::Fetch) | (Self::Send, Self::Send)
        )
    }

    const fn activity(self) -> SyncActivity {
        match self {
            Self::Fetch => SyncActivity::Fetching,
            Self::Send => SyncActivity::Sending,
            Self::Sync => SyncActivity::Synchronizing,
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Send => "send",
            Self::Sync => "sync",
        })
    }
}

struct InFlight {
    id: u64,
    kind: SyncKind,
    run: WeakShared<BoxFuture<'static, SyncOutcome>>,
}

struct EngineInner {
    store: Store,
    remote: Arc<dyn RemoteService>,
    settings: SyncSettings,
    status: watch::Sender<SyncStatus>,
    in_flight: Mutex<Option<InFlight>>,
    next_run_id: AtomicU64,
}

/// Sync context for one store and one remote. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.inner.store)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

enum Slot {
    Join(SharedRun),
    Wait(SharedRun),
    Start(SharedRun),
}

impl SyncEngine {
    pub fn new(store: Store, remote: Arc<dyn RemoteService>, settings: SyncSettings) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                settings,
                status,
                in_flight: Mutex::new(None),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Current engine state
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Follow engine state changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Pull remote changes for every table and merge them locally
    pub async fn fetch_changes(&self) -> SyncOutcome {
        self.run(SyncKind::Fetch).await
    }

    /// Push every dirty row, tombstones included
    pub async fn send_changes(&self) -> SyncOutcome {
        self.run(SyncKind::Send).await
    }

    /// Fetch and send, in the configured order
    pub async fn sync_changes(&self) -> SyncOutcome {
        self.run(SyncKind::Sync).await
    }

    /// Run `sync_changes` every `interval` until the handle is dropped
    pub fn spawn_periodic(&self, interval: Duration) -> PeriodicSync {
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = engine.sync_changes().await {
                    tracing::warn!("Periodic sync failed: {error}");
                }
            }
        });
        PeriodicSync { task }
    }

    async fn run(&self, kind: SyncKind) -> SyncOutcome {
        loop {
            match self.claim(kind) {
                Slot::Join(run) => {
                    tracing::debug!("Joining in-flight run for {kind}");
                    return run.await;
                }
                Slot::Wait(run) => {
                    tracing::debug!("Waiting for in-flight run before {kind}");
                    let _ = run.await;
                }
                Slot::Start(run) => return run.await,
            }
        }
    }

    fn claim(&self, kind: SyncKind) -> Slot {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = slot.as_ref() {
            if let Some(run) = current.run.upgrade() {
                return if current.kind.covers(kind) {
                    Slot::Join(run)
                } else {
                    Slot::Wait(run)
                };
            }
        }

        let id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let run = self.clone().execute(kind, id).boxed().shared();
        // `downgrade` only fails once the future completed, which it cannot
        // have before first poll
        if let Some(weak) = run.downgrade() {
            *slot = Some(InFlight { id, kind, run: weak });
        }
        Slot::Start(run)
    }

    fn release(&self, id: u64) {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.id == id) {
            *slot = None;
        }
    }

    async fn execute(self, kind: SyncKind, id: u64) -> SyncOutcome {
        let outcome = self.run_with_retry(kind).await;

        self.inner.status.send_modify(|status| match &outcome {
            Ok(_) => {
                status.last_synced_at = Some(crate::util::now_millis());
                status.last_error = None;
            }
            Err(error) => status.last_error = Some(error.to_string()),
        });
        self.release(id);

        match &outcome {
            Ok(report) => tracing::info!("{kind} finished: {}", report.summary()),
            Err(error) => tracing::warn!("{kind} failed: {error}"),
        }
        outcome
    }

    async fn run_with_retry(&self, kind: SyncKind) -> SyncOutcome {
        let _activity = ActivityGuard::enter(&self.inner.status, kind.activity());
        let mut report = SyncReport::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut pass = SyncReport::default();
            let result = self.run_once(kind, &mut pass).await;

            // Rows that failed in an earlier attempt were retried in this one
            report.failures.clear();
            report.absorb(pass);

            let error = match result {
                Ok(()) => return Ok(report),
                Err(error) => error,
            };
            match self.inner.settings.retry.delay_for(attempt, &error) {
                Some(delay) => {
                    tracing::warn!(
                        "{kind} attempt {attempt} failed: {error}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }

    async fn run_once(&self, kind: SyncKind, report: &mut SyncReport) -> Result<(), SyncError> {
        match (kind, self.inner.settings.order) {
            (SyncKind::Fetch, _) => self.fetch_all(report).await,
            (SyncKind::Send, _) => self.send_all(report).await,
            (SyncKind::Sync, SyncOrder::FetchFirst) => {
                self.fetch_all(report).await?;
                self.send_all(report).await
            }
            (SyncKind::Sync, SyncOrder::SendFirst) => {
                self.send_all(report).await?;
                self.fetch_all(report).await
            }
        }
    }

    async fn fetch_all(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        for table in Table::ALL {
            match table {
                Table::Items => self.fetch_table::<Item>(report).await?,
                Table::Notes => self.fetch_table::<Note>(report).await?,
            }
        }
        Ok(())
    }

    async fn send_all(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        for table in Table::ALL {
            match table {
                Table::Items => self.send_table::<Item>(report).await?,
                Table::Notes => self.send_table::<Note>(report).await?,
            }
        }
        Ok(())
    }

    /// Bound a remote call by the request timeout
    async fn call<T>(
        &self,
        what: &str,
        report: &mut SyncReport,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, SyncError> {
        report.attempts += 1;
        let timeout = self.inner.settings.request_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::TransientNetwork(format!(
                "{what} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn fetch_table<R: Record>(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let table = R::TABLE;
        let strategy = self.inner.settings.strategy_for(table);
        let store = &self.inner.store;
        let mut since = store.read(|conn| cursor::load(conn, table)).await?;

        loop {
            let batch = self
                .call(
                    "pull",
                    report,
                    self.inner
                        .remote
                        .pull(table, since, self.inner.settings.pull_batch_size.max(1)),
                )
                .await?;
            tracing::debug!(
                "Pulled {} {table} rows since {since:?} (has_more: {})",
                batch.rows.len(),
                batch.has_more
            );
            report.fetched += batch.rows.len();

            let mut rows = batch.rows;
            rows.sort_by(|a, b| {
                a.remote_id
                    .cmp(&b.remote_id)
                    .then(a.last_modified_at.cmp(&b.last_modified_at))
            });

            let mut batch_failed = false;
            for row in &rows {
                match store
                    .write(|tx| apply_remote_row::<R>(tx, row, strategy))
                    .await
                {
                    Ok(applied) => {
                        match applied.change {
                            Change::Inserted => report.inserted += 1,
                            Change::Merged => report.merged += 1,
                            Change::Deleted => report.deleted += 1,
                            Change::Unchanged => {}
                        }
                        if applied.conflict {
                            report.conflicts += 1;
                        }
                    }
                    Err(error) if error.is_row_level() => {
                        batch_failed = true;
                        tracing::warn!("Failed to apply {table} {}: {error}", row.remote_id);
                        report.failures.push(fetch_failure(table, row, &error));
                    }
                    Err(error) => return Err(error.into()),
                }
            }

            if batch_failed {
                tracing::warn!("Keeping {table} cursor at {since:?} until failed rows apply");
                return Ok(());
            }

            let advanced = match batch.cursor {
                Some(next) if since.is_some_and(|current| next < current) => {
                    tracing::warn!("Ignoring {table} cursor {next} behind {since:?}");
                    false
                }
                Some(next) if Some(next) != since => {
                    store
                        .write(|tx| cursor::save(tx.connection(), table, next, tx.now()))
                        .await?;
                    since = Some(next);
                    true
                }
                _ => false,
            };

            if !batch.has_more {
                return Ok(());
            }
            if !advanced {
                tracing::warn!("Remote reported more {table} rows without a new cursor");
                return Ok(());
            }
        }
    }

    async fn send_table<R: Record>(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let table = R::TABLE;
        let store = &self.inner.store;
        let pending = store.read(|conn| outgoing_changes::<R>(conn)).await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!("Sending {} {table} changes", pending.len());

        for chunk in pending.chunks(self.inner.settings.push_batch_size.max(1)) {
            let changes: Vec<OutgoingChange> =
                chunk.iter().map(|(_, change)| change.clone()).collect();
            let results = self
                .call("push", report, self.inner.remote.push(table, changes))
                .await?;

            if results.len() != chunk.len() {
                return Err(SyncError::Rejected(format!(
                    "push of {} {table} changes returned {} results",
                    chunk.len(),
                    results.len()
                )));
            }

            for ((token, change), result) in chunk.iter().zip(results) {
                match result {
                    Ok(remote_id) => match self.confirm_push(token, change, &remote_id).await {
                        Ok(_) => report.pushed += 1,
                        Err(error) if error.is_row_level() => {
                            tracing::warn!("Failed to confirm {table} {}: {error}", token.local_id);
                            report.failures.push(send_failure(table, change, error.to_string()));
                        }
                        Err(error) => return Err(error.into()),
                    },
                    Err(error) => {
                        tracing::warn!("Remote rejected {table} {}: {error}", change.local_id);
                        report.failures.push(send_failure(table, change, error.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    async fn confirm_push(
        &self,
        token: &DirtyToken,
        change: &OutgoingChange,
        remote_id: &RemoteId,
    ) -> crate::Result<ClearOutcome> {
        self.inner
            .store
            .write(|tx| {
                let outcome = tracker::clear_dirty(tx.connection(), token, remote_id)?;
                match outcome {
                    ClearOutcome::Cleared => {}
                    ClearOutcome::Superseded => tracing::debug!(
                        "{} {} changed during push; staying dirty",
                        token.table,
                        token.local_id
                    ),
                    ClearOutcome::Missing if !change.is_deleted => {
                        // Deleted locally while its first push was in flight
                        tracker::insert_tombstone(
                            tx.connection(),
                            token.table,
                            token.local_id,
                            remote_id,
                            tx.now(),
                        )?;
                    }
                    ClearOutcome::Missing => {}
                }
                Ok(outcome)
            })
            .await
    }
}

/// Handle to a background sync loop; stops it on drop
#[derive(Debug)]
pub struct PeriodicSync {
    task: JoinHandle<()>,
}

impl PeriodicSync {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Dirty rows of `R`, oldest first, with the token each push must clear
fn outgoing_changes<R: Record>(
    conn: &rusqlite::Connection,
) -> crate::Result<Vec<(DirtyToken, OutgoingChange)>> {
    let mut pending = Vec::new();
    for meta in tracker::dirty_rows(conn, R::TABLE)? {
        let token = DirtyToken {
            table: R::TABLE,
            local_id: meta.local_id,
            modified_at: meta.last_modified_at,
        };

        let fields = if meta.is_deleted {
            crate::models::Fields::new()
        } else {
            let Some(record) = load_record::<R>(conn, meta.local_id)? else {
                tracing::warn!("Dirty {} {} has no row; skipping", R::TABLE, meta.local_id);
                continue;
            };
            let mut fields = meta.extra_fields.clone();
            fields.extend(record.to_fields());
            fields
        };

        pending.push((
            token,
            OutgoingChange {
                local_id: meta.local_id,
                remote_id: meta.remote_id,
                fields,
                last_modified_at: meta.last_modified_at,
                is_deleted: meta.is_deleted,
            },
        ));
    }
    Ok(pending)
}

fn fetch_failure(table: Table, row: &RemoteRow, error: &crate::Error) -> RowFailure {
    RowFailure {
        table,
        leg: SyncLeg::Fetch,
        local_id: row.origin_id,
        remote_id: Some(row.remote_id.clone()),
        message: error.to_string(),
    }
}

fn send_failure(table: Table, change: &OutgoingChange, message: String) -> RowFailure {
    RowFailure {
        table,
        leg: SyncLeg::Send,
        local_id: Some(change.local_id),
        remote_id: change.remote_id.clone(),
        message,
    }
}
