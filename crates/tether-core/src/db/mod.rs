//! Database layer for Tether

pub(crate) mod conflicts;
mod connection;
pub mod cursor;
mod migrations;
mod query;
pub mod tracker;
mod transaction;

pub use connection::{Store, SyncSummary};
pub use cursor::Cursor;
pub use query::{Column, Direction, Filter, Query, Select};
pub use tracker::{ClearOutcome, DirtyToken};
pub use transaction::WriteTransaction;
