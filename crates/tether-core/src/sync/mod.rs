//! Bidirectional sync between the local store and a remote service

mod engine;
mod error;
mod remote;
mod report;
mod resolver;
mod retry;
mod status;

pub use crate::config::SyncOrder;
pub use engine::{PeriodicSync, SyncEngine, SyncKind};
pub use error::SyncError;
pub use remote::{OutgoingChange, PullBatch, RemoteError, RemoteErrorKind, RemoteRow, RemoteService};
pub use report::{SyncLeg, RowFailure, SyncReport};
pub use resolver::{merge, LocalVersion, MergeStrategy, Resolution, Winner};
pub use retry::RetryPolicy;
pub use status::{SyncActivity, SyncStatus};
