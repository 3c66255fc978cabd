//! SQLite persistence: the calendar-complete wide table and flat snapshot tables.
//!
//! Every write runs inside the single critical section owned by a
//! [`StorageContext`]. Stores built from clones of the same context share
//! that lock; stores on separate contexts never contend.

pub mod context;
pub mod schema;
pub mod snapshot;
pub mod time_series;

pub use context::StorageContext;
pub use schema::validate_identifier;
pub use snapshot::SnapshotStore;
pub use time_series::{TimeSeriesStore, WritePolicy, TIME_SERIES_TABLE};

use crate::cancel::Cancelled;
use crate::data::Cell;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid identifier '{0}': must match [A-Za-z0-9_]+")]
    SchemaViolation(String),

    #[error("column '{column}' not found in frame for table '{table}'")]
    MissingKeyColumn { table: String, column: String },

    #[error("nothing to write to '{0}'")]
    EmptyFrame(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("operation cancelled")]
    Cancelled,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Cancelled> for StoreError {
    fn from(_: Cancelled) -> Self {
        StoreError::Cancelled
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Owned(Value::Null),
            Cell::Number(v) if v.is_nan() => ToSqlOutput::Owned(Value::Null),
            Cell::Number(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for Cell {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null | ValueRef::Blob(_) => Cell::Null,
            ValueRef::Integer(i) => Cell::Number(i as f64),
            ValueRef::Real(f) => Cell::Number(f),
            ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
        }
    }
}
