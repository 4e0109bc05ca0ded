//! In-process remote with failure injection, used by tests and demos

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::log::ChangeLog;
use crate::db::Cursor;
use crate::models::{RemoteId, RowId, Table};
use crate::sync::{OutgoingChange, PullBatch, RemoteError, RemoteRow, RemoteService};

/// Pauses pushes until released, so tests can act while a push is in flight
#[derive(Debug, Default)]
pub struct PushGate {
    entered: Notify,
    released: Notify,
}

impl PushGate {
    /// Wait until a push reached the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the waiting push continue
    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<Table, ChangeLog>,
    next_id: u64,
    pull_failures: VecDeque<RemoteError>,
    push_failures: VecDeque<RemoteError>,
    rejected_rows: HashMap<RowId, RemoteError>,
    pull_calls: usize,
    push_calls: usize,
    pushed_changes: usize,
}

/// A remote living in process memory. Remote ids are `R1`, `R2`, ...
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    gate: Mutex<Option<Arc<PushGate>>>,
    latency: Mutex<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next pull calls with the given errors, in order
    pub fn fail_pulls(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().pull_failures.extend(errors);
    }

    /// Fail the next push calls with the given errors, in order
    pub fn fail_pushes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().push_failures.extend(errors);
    }

    /// Reject every push of one row until [`MemoryRemote::accept_row`]
    pub fn reject_row(&self, local_id: RowId, error: RemoteError) {
        self.state().rejected_rows.insert(local_id, error);
    }

    pub fn accept_row(&self, local_id: RowId) {
        self.state().rejected_rows.remove(&local_id);
    }

    /// Delay every call, to exercise timeouts
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Hold every push at a gate until it is released
    pub fn gate_pushes(&self) -> Arc<PushGate> {
        let gate = Arc::new(PushGate::default());
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    pub fn open_gate(&self) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(gate) = gate {
            gate.release();
        }
    }

    /// Write a row as another client would
    pub fn put_row(&self, table: Table, row: RemoteRow) {
        self.state().tables.entry(table).or_default().put(row);
    }

    /// Current version of one row
    pub fn row(&self, table: Table, remote_id: &RemoteId) -> Option<RemoteRow> {
        self.state()
            .tables
            .get(&table)
            .and_then(|log| log.get(remote_id).cloned())
    }

    /// Every row of a table, deleted ones included
    pub fn rows(&self, table: Table) -> Vec<RemoteRow> {
        self.state().tables.get(&table).map_or_else(Vec::new, |log| {
            log.rows.iter().map(|logged| logged.row.clone()).collect()
        })
    }

    pub fn pull_calls(&self) -> usize {
        self.state().pull_calls
    }

    pub fn push_calls(&self) -> usize {
        self.state().push_calls
    }

    /// Row changes accepted so far
    pub fn pushed_changes(&self) -> usize {
        self.state().pushed_changes
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn pull(
        &self,
        table: Table,
        since: Option<Cursor>,
        limit: usize,
    ) -> Result<PullBatch, RemoteError> {
        self.simulate_latency().await;

        let mut state = self.state();
        state.pull_calls += 1;
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }

        Ok(state
            .tables
            .get(&table)
            .map_or_else(|| PullBatch::empty(since), |log| log.pull(since, limit)))
    }

    async fn push(
        &self,
        table: Table,
        changes: Vec<OutgoingChange>,
    ) -> Result<Vec<Result<RemoteId, RemoteError>>, RemoteError> {
        {
            let mut state = self.state();
            state.push_calls += 1;
            if let Some(error) = state.push_failures.pop_front() {
                return Err(error);
            }
        }

        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }
        self.simulate_latency().await;

        let mut state = self.state();
        let State {
            tables,
            next_id,
            rejected_rows,
            pushed_changes,
            ..
        } = &mut *state;
        let log = tables.entry(table).or_default();

        let results = changes
            .iter()
            .map(|change| {
                if let Some(error) = rejected_rows.get(&change.local_id) {
                    return Err(error.clone());
                }
                *pushed_changes += 1;
                Ok(log.apply(change, || {
                    *next_id += 1;
                    RemoteId::new(format!("R{next_id}"))
                }))
            })
            .collect();
        Ok(results)
    }
}
