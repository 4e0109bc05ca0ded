//! Typed query builder
//!
//! Queries are built from typed [`Column`] constants declared on each record
//! type, so a filter value always matches its column type and the set of
//! tables a query reads is known without parsing SQL.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::fmt;
use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::Result;
use crate::models::{select_sql, Record, Table};

/// A read-only query the reactive layer can re-run.
pub trait Query: Send + Sync + 'static {
    /// Result of one evaluation.
    type Output: Clone + PartialEq + Send + Sync + 'static;

    /// Tables whose changes can alter the result.
    fn dependencies(&self) -> Vec<Table>;

    /// Evaluate against the last committed state.
    fn run(&self, conn: &Connection) -> Result<Self::Output>;
}

/// A typed column of record `R` holding values of type `T`
pub struct Column<R, T> {
    name: &'static str,
    _marker: PhantomData<fn() -> (R, T)>,
}

impl<R, T> Clone for Column<R, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, T> Copy for Column<R, T> {}

impl<R, T> fmt::Debug for Column<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Column").field(&self.name).finish()
    }
}

impl<R, T> Column<R, T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<R: Record, T: Into<Value>> Column<R, T> {
    fn compare(self, op: &str, value: impl Into<T>) -> Filter<R> {
        let value: T = value.into();
        Filter::new(format!("{} {op} ?", self.name), vec![value.into()])
    }

    /// `column = value`; comparing against `None` matches `NULL`
    pub fn eq(self, value: impl Into<T>) -> Filter<R> {
        self.compare("IS", value)
    }

    /// `column != value`
    pub fn ne(self, value: impl Into<T>) -> Filter<R> {
        self.compare("IS NOT", value)
    }

    pub fn lt(self, value: impl Into<T>) -> Filter<R> {
        self.compare("<", value)
    }

    pub fn le(self, value: impl Into<T>) -> Filter<R> {
        self.compare("<=", value)
    }

    pub fn gt(self, value: impl Into<T>) -> Filter<R> {
        self.compare(">", value)
    }

    pub fn ge(self, value: impl Into<T>) -> Filter<R> {
        self.compare(">=", value)
    }
}

impl<R: Record> Column<R, String> {
    /// Case-insensitive substring match
    pub fn contains(self, needle: &str) -> Filter<R> {
        let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        Filter::new(
            format!("{} LIKE ? ESCAPE '\\'", self.name),
            vec![Value::Text(format!("%{escaped}%"))],
        )
    }
}

/// A `WHERE` predicate over record `R`
pub struct Filter<R> {
    sql: String,
    values: Vec<Value>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for Filter<R> {
    fn clone(&self) -> Self {
        Self {
            sql: self.sql.clone(),
            values: self.values.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Filter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("sql", &self.sql)
            .field("values", &self.values)
            .finish()
    }
}

impl<R> Filter<R> {
    fn new(sql: String, values: Vec<Value>) -> Self {
        Self {
            sql,
            values,
            _marker: PhantomData,
        }
    }

    /// Both predicates must hold
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        self.sql = format!("({}) AND ({})", self.sql, other.sql);
        self.values.extend(other.values);
        self
    }

    /// Either predicate holds
    #[must_use]
    pub fn or(mut self, other: Self) -> Self {
        self.sql = format!("({}) OR ({})", self.sql, other.sql);
        self.values.extend(other.values);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// `SELECT * FROM <R::TABLE>` with optional filters, ordering, and paging
pub struct Select<R> {
    filters: Vec<Filter<R>>,
    order: Vec<(&'static str, Direction)>,
    limit: Option<usize>,
    offset: usize,
}

impl<R> Clone for Select<R> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<R> fmt::Debug for Select<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("filters", &self.filters)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<R: Record> Default for Select<R> {
    fn default() -> Self {
        Self::all()
    }
}

impl<R: Record> Select<R> {
    /// Every row of the table
    pub const fn all() -> Self {
        Self {
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter<R>) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by<T>(mut self, column: Column<R, T>, direction: Direction) -> Self {
        self.order.push((column.name(), direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Render the statement and its bound values
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = select_sql::<R>();
        let mut values = Vec::new();

        if !self.filters.is_empty() {
            let clauses = self
                .filters
                .iter()
                .map(|filter| format!("({})", filter.sql))
                .collect::<Vec<_>>();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
            for filter in &self.filters {
                values.extend(filter.values.iter().cloned());
            }
        }

        let mut order = self
            .order
            .iter()
            .map(|(column, direction)| format!("{column} {}", direction.as_sql()))
            .collect::<Vec<_>>();
        // UUID v7 ids keep insertion order as the final tie-break
        order.push("id ASC".to_string());
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit as i64, self.offset as i64));
        } else if self.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", self.offset as i64));
        }

        (sql, values)
    }

    /// Execute against a connection
    pub fn fetch(&self, conn: &Connection) -> Result<Vec<R>> {
        let (sql, values) = self.to_sql();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), R::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl<R: Record> Query for Select<R> {
    type Output = Vec<R>;

    fn dependencies(&self) -> Vec<Table> {
        vec![R::TABLE]
    }

    fn run(&self, conn: &Connection) -> Result<Self::Output> {
        self.fetch(conn)
    }
}
