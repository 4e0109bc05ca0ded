//! Atomic write units

use std::collections::BTreeSet;

use rusqlite::Connection;

use super::query::Select;
use super::tracker::{self, DirtyToken};
use crate::error::{Error, Result};
use crate::models::{delete_record, load_record, Record, RowId, Table};

/// An open write transaction on the store.
///
/// Application mutations made through it update the row and its sync
/// metadata together; nothing is visible to readers until the closure passed
/// to [`Store::write`](super::Store::write) returns `Ok`.
pub struct WriteTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    touched: BTreeSet<Table>,
    now: i64,
}

impl<'conn> WriteTransaction<'conn> {
    pub(crate) fn new(tx: rusqlite::Transaction<'conn>) -> Self {
        Self {
            tx,
            touched: BTreeSet::new(),
            now: crate::util::now_millis(),
        }
    }

    /// Underlying connection, for reads inside the transaction
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    /// Wall-clock time the transaction started (Unix ms)
    pub const fn now(&self) -> i64 {
        self.now
    }

    /// Flag a table as changed so live queries re-run after commit
    pub(crate) fn touch(&mut self, table: Table) {
        self.touched.insert(table);
    }

    pub fn get<R: Record>(&self, id: RowId) -> Result<Option<R>> {
        load_record(&self.tx, id)
    }

    pub fn query<R: Record>(&self, select: &Select<R>) -> Result<Vec<R>> {
        select.fetch(&self.tx)
    }

    /// Insert a new row and mark it dirty
    pub fn insert<R: Record>(&mut self, record: &R) -> Result<DirtyToken> {
        if load_record::<R>(&self.tx, record.id())?.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} row {} already exists",
                R::TABLE,
                record.id()
            )));
        }

        record.upsert(&self.tx)?;
        let token = tracker::mark_dirty(&self.tx, R::TABLE, record.id(), self.now)?;
        self.touch(R::TABLE);
        Ok(token)
    }

    /// Replace an existing row and mark it dirty
    pub fn update<R: Record>(&mut self, record: &R) -> Result<DirtyToken> {
        if load_record::<R>(&self.tx, record.id())?.is_none() {
            return Err(Error::NotFound(record.id().to_string()));
        }
        self.ensure_editable(R::TABLE, record.id())?;

        record.upsert(&self.tx)?;
        let token = tracker::mark_dirty(&self.tx, R::TABLE, record.id(), self.now)?;
        self.touch(R::TABLE);
        Ok(token)
    }

    /// Delete a row, leaving a tombstone for the remote if it was ever pushed
    pub fn delete<R: Record>(&mut self, id: RowId) -> Result<()> {
        self.ensure_editable(R::TABLE, id)?;
        if !delete_record(&self.tx, R::TABLE, id)? {
            return Err(Error::NotFound(id.to_string()));
        }

        tracker::mark_deleted(&self.tx, R::TABLE, id, self.now)?;
        self.touch(R::TABLE);
        Ok(())
    }

    fn ensure_editable(&self, table: Table, id: RowId) -> Result<()> {
        match tracker::metadata(&self.tx, table, id)? {
            Some(metadata) if !metadata.permissions.can_edit => Err(Error::PermissionDenied(
                format!("{table} row {id} is read-only"),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn commit(self) -> Result<BTreeSet<Table>> {
        self.tx.commit()?;
        Ok(self.touched)
    }
}
