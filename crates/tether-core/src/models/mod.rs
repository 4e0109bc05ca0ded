//! Data models for Tether

mod item;
mod metadata;
mod note;
mod record;
mod sync_conflict;

pub use item::Item;
pub use metadata::{Permissions, RemoteId, SyncMetadata};
pub use note::Note;
pub use record::{AnyRecord, Fields, Record, RowId, Table};
pub use sync_conflict::SyncConflict;

pub(crate) use record::{delete_record, load_record, row_id, select_sql};
