//! Observable sync state

use serde::Serialize;
use tokio::sync::watch;

/// What the engine is doing right now
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncActivity {
    #[default]
    Idle,
    Fetching,
    Sending,
    Synchronizing,
}

/// Engine state published on a watch channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub activity: SyncActivity,
    /// Completion time of the last successful run (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Message of the last failed run; cleared by the next success
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn is_fetching_changes(&self) -> bool {
        self.activity == SyncActivity::Fetching
    }

    pub fn is_sending_changes(&self) -> bool {
        self.activity == SyncActivity::Sending
    }

    pub fn is_synchronizing(&self) -> bool {
        self.activity == SyncActivity::Synchronizing
    }

    pub fn is_idle(&self) -> bool {
        self.activity == SyncActivity::Idle
    }
}

/// Sets the activity for the lifetime of a run and resets it to `Idle` on
/// drop, including when the run is cancelled or panics.
pub(crate) struct ActivityGuard<'a> {
    status: &'a watch::Sender<SyncStatus>,
}

impl<'a> ActivityGuard<'a> {
    pub(crate) fn enter(status: &'a watch::Sender<SyncStatus>, activity: SyncActivity) -> Self {
        status.send_modify(|current| current.activity = activity);
        Self { status }
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.status
            .send_modify(|current| current.activity = SyncActivity::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_resets_activity_on_drop() {
        let (sender, receiver) = watch::channel(SyncStatus::default());
        {
            let _guard = ActivityGuard::enter(&sender, SyncActivity::Sending);
            assert!(receiver.borrow().is_sending_changes());
        }
        assert!(receiver.borrow().is_idle());
    }
}
