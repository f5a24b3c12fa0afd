use std::cell::{Cell, RefCell};

use futures::{stream::BoxStream, StreamExt};
use log::debug;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, SqlitePool};

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    BatchError,
};

use super::{bind_value, block_on, RowMapper, SqlValue};

type RowStream<'a> = BoxStream<'a, Result<SqliteRow, sqlx::Error>>;

/// Reader streaming the rows of a single query.
///
/// The query runs once per `open`, and rows are pulled from the open cursor
/// one at a time. Its position is the number of rows consumed: on restart the
/// query runs again and the rows already committed are skipped.
///
/// The cursor holds a pooled connection until `close`. With SQLite, writing
/// to the same database file from the same step would wait for that cursor,
/// so cursor jobs usually write elsewhere.
pub struct RdbcCursorItemReader<'a, T> {
    pool: &'a SqlitePool,
    sql: &'a str,
    parameters: Vec<SqlValue>,
    row_mapper: &'a dyn RowMapper<T>,
    rows: RefCell<Option<RowStream<'a>>>,
    position: Cell<usize>,
}

impl<'a, T> RdbcCursorItemReader<'a, T> {
    fn execute_query(&self) -> RowStream<'a> {
        let mut query = sqlx::query(self.sql);
        for parameter in &self.parameters {
            query = bind_value(query, parameter);
        }
        query.fetch(self.pool)
    }

    fn next_row(rows: &mut RowStream<'a>) -> Result<Option<SqliteRow>, BatchError> {
        match block_on(rows.next())? {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(error)) => Err(BatchError::ItemSource(error.to_string())),
            None => Ok(None),
        }
    }
}

impl<T> ItemReader<T> for RdbcCursorItemReader<'_, T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let target = context.restart_position_as::<usize>()?.unwrap_or(0);
        let mut rows = self.execute_query();

        for skipped in 0..target {
            if Self::next_row(&mut rows)?.is_none() {
                return Err(BatchError::Restart(format!(
                    "query returned {} rows, cannot resume at row {}",
                    skipped, target
                )));
            }
        }
        if target > 0 {
            debug!("Cursor moved past {} committed rows", target);
        }

        self.position.set(target);
        *self.rows.borrow_mut() = Some(rows);
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        if self.rows.borrow().is_none() {
            self.open(&ExecutionContext::new())?;
        }

        let row = {
            let mut rows = self.rows.borrow_mut();
            match rows.as_mut() {
                Some(rows) => Self::next_row(rows)?,
                None => None,
            }
        };

        match row {
            Some(row) => {
                self.position.set(self.position.get() + 1);
                self.row_mapper.map_row(&row).map(Some)
            }
            None => Ok(None),
        }
    }

    fn current_position(&self) -> Option<Value> {
        Some(Value::from(self.position.get()))
    }

    fn close(&self) -> Result<(), BatchError> {
        // dropping the stream hands the connection back to the pool
        self.rows.borrow_mut().take();
        Ok(())
    }
}

/// Builder for [`RdbcCursorItemReader`].
///
/// # Examples
///
/// ```no_run
/// use chunk_batch::item::rdbc::{FromRowMapper, RdbcCursorItemReaderBuilder};
/// use chunk_batch::BatchError;
/// use sqlx::SqlitePool;
///
/// #[derive(sqlx::FromRow)]
/// struct Person {
///     people_id: i64,
///     name: String,
/// }
///
/// # fn run(pool: SqlitePool) -> Result<(), BatchError> {
/// let mapper = FromRowMapper::<Person>::new();
/// let reader = RdbcCursorItemReaderBuilder::new()
///     .pool(&pool)
///     .query("SELECT people_id, name FROM people WHERE pick = ? ORDER BY people_id")
///     .add_parameter("RED")
///     .row_mapper(&mapper)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RdbcCursorItemReaderBuilder<'a, T> {
    pool: Option<&'a SqlitePool>,
    sql: Option<&'a str>,
    parameters: Vec<SqlValue>,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<T> Default for RdbcCursorItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcCursorItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            sql: None,
            parameters: Vec::new(),
            row_mapper: None,
        }
    }

    pub fn pool(mut self, pool: &'a SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn query(mut self, sql: &'a str) -> Self {
        self.sql = Some(sql);
        self
    }

    /// Value bound to the next `?` placeholder.
    pub fn add_parameter(mut self, value: impl Into<SqlValue>) -> Self {
        self.parameters.push(value.into());
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<RdbcCursorItemReader<'a, T>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a cursor reader needs a pool".to_string()))?;
        let sql = self
            .sql
            .ok_or_else(|| BatchError::Configuration("a cursor reader needs a query".to_string()))?;
        let row_mapper = self.row_mapper.ok_or_else(|| {
            BatchError::Configuration("a cursor reader needs a row mapper".to_string())
        })?;

        Ok(RdbcCursorItemReader {
            pool,
            sql,
            parameters: self.parameters,
            row_mapper,
            rows: RefCell::new(None),
            position: Cell::new(0),
        })
    }
}
