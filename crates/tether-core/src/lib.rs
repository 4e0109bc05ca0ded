//! tether-core - Core library for Tether
//!
//! A local-first `SQLite` store that keeps itself in sync with a remote
//! service. Application writes mark rows dirty in the same transaction; the
//! [`SyncEngine`] pushes dirty rows, pulls remote changes and merges them;
//! live queries re-run whenever a table they read changes.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod reactive;
pub mod remote;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use db::{Column, Cursor, Direction, Filter, Query, Select, Store, SyncSummary, WriteTransaction};
pub use error::{Error, Result};
pub use models::{
    AnyRecord, Fields, Item, Note, Permissions, Record, RemoteId, RowId, SyncConflict,
    SyncMetadata, Table,
};
pub use reactive::{ResultSet, Subscription, TableVersions};
pub use sync::{
    MergeStrategy, RemoteService, SyncActivity, SyncEngine, SyncError, SyncReport, SyncStatus,
};
