use std::{future::Future, marker::PhantomData};

use serde::{Deserialize, Serialize};
use sqlx::{
    query::Query,
    query_builder::Separated,
    sqlite::{SqliteArguments, SqliteRow},
    Database, FromRow, Row, Sqlite, ValueRef,
};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::BatchError;

pub mod cursor_reader;

pub mod paging;

pub mod paging_reader;

pub mod sqlite_writer;

pub use cursor_reader::{RdbcCursorItemReader, RdbcCursorItemReaderBuilder};
pub use paging::PagingQueryProvider;
pub use paging_reader::{
    RdbcOffsetPagingItemReader, RdbcOffsetPagingItemReaderBuilder, RdbcPagingItemReader,
    RdbcPagingItemReaderBuilder,
};
pub use sqlite_writer::SqliteItemWriter;

/// Binds the fields of an item as one row of a multi-row `INSERT`.
pub trait DatabaseItemBinder<O, DB: Database> {
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

/// Maps a database row to an item.
///
/// Any `Fn(&SqliteRow) -> Result<T, BatchError>` closure is a row mapper; use
/// [`FromRowMapper`] for types deriving `sqlx::FromRow`.
pub trait RowMapper<T> {
    fn map_row(&self, row: &SqliteRow) -> Result<T, BatchError>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&SqliteRow) -> Result<T, BatchError>,
{
    fn map_row(&self, row: &SqliteRow) -> Result<T, BatchError> {
        self(row)
    }
}

/// Row mapper relying on the `sqlx::FromRow` implementation of `T`.
pub struct FromRowMapper<T> {
    _pd: PhantomData<T>,
}

impl<T> FromRowMapper<T> {
    pub fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<T> Default for FromRowMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RowMapper<T> for FromRowMapper<T>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    fn map_row(&self, row: &SqliteRow) -> Result<T, BatchError> {
        T::from_row(row).map_err(|error| BatchError::ItemReader(error.to_string()))
    }
}

/// A query parameter, or a sort key value read back from a row.
///
/// Serialized without tag, so that a sort key stored as a restart position
/// reads as a plain JSON number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(value.into())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl SqlValue {
    /// Reads column `column` of `row` with the storage class SQLite reports.
    pub fn from_row(row: &SqliteRow, column: &str) -> Result<SqlValue, BatchError> {
        let is_null = row
            .try_get_raw(column)
            .map_err(|error| BatchError::ItemReader(error.to_string()))?
            .is_null();
        if is_null {
            return Ok(SqlValue::Null);
        }
        if let Ok(value) = row.try_get::<i64, _>(column) {
            return Ok(SqlValue::Integer(value));
        }
        if let Ok(value) = row.try_get::<f64, _>(column) {
            return Ok(SqlValue::Real(value));
        }
        row.try_get::<String, _>(column)
            .map(SqlValue::Text)
            .map_err(|error| BatchError::ItemReader(error.to_string()))
    }
}

pub(crate) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(value) => query.bind(*value),
        SqlValue::Real(value) => query.bind(*value),
        SqlValue::Text(value) => query.bind(value.clone()),
    }
}

/// Runs `future` to completion from synchronous reader or writer code.
///
/// Needs a multi-thread tokio runtime, since the calling worker thread is
/// handed over with `block_in_place` while the future runs.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, BatchError> {
    let handle = Handle::try_current().map_err(|error| {
        BatchError::Configuration(format!("database items need a tokio runtime: {}", error))
    })?;

    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(BatchError::Configuration(
            "database items need a multi-thread tokio runtime".to_string(),
        ));
    }

    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}
