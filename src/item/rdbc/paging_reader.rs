use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
};

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

use super::{
    bind_value, block_on,
    paging::{parse_named_parameters, resolve_parameters, PagingQueryProvider, SORT_KEY_PARAMETER},
    RowMapper, SqlValue,
};

const DEFAULT_PAGE_SIZE: usize = 10;

fn fetch_page(
    pool: &SqlitePool,
    sql: &str,
    parameters: &[SqlValue],
) -> Result<Vec<SqliteRow>, BatchError> {
    let mut query = sqlx::query(sql);
    for parameter in parameters {
        query = bind_value(query, parameter);
    }

    block_on(query.fetch_all(pool))?.map_err(|error| BatchError::ItemSource(error.to_string()))
}

/// Reader fetching rows page by page with keyset pagination.
///
/// Each page after the first resumes strictly after the sort key of the last
/// row returned, which is also the reader position: a restart continues
/// after the last committed row even if rows were inserted or deleted before
/// it in the meantime.
pub struct RdbcPagingItemReader<'a, T> {
    pool: &'a SqlitePool,
    provider: PagingQueryProvider,
    parameters: BTreeMap<String, SqlValue>,
    page_size: usize,
    row_mapper: &'a dyn RowMapper<T>,
    buffer: RefCell<VecDeque<SqliteRow>>,
    /// Sort key of the last row handed out
    last_sort_key: RefCell<Option<SqlValue>>,
    /// The last fetched page was shorter than the page size
    exhausted: Cell<bool>,
}

impl<T> RdbcPagingItemReader<'_, T> {
    fn read_page(&self) -> Result<(), BatchError> {
        let last_sort_key = self.last_sort_key.borrow().clone();
        let (sql, names) = match &last_sort_key {
            None => parse_named_parameters(&self.provider.first_page_query(self.page_size)),
            Some(_) => parse_named_parameters(&self.provider.remaining_pages_query(self.page_size)),
        };

        let mut parameters = self.parameters.clone();
        if let Some(sort_key) = last_sort_key {
            parameters.insert(SORT_KEY_PARAMETER.to_string(), sort_key);
        }
        let values = resolve_parameters(&names, &parameters)?;

        let rows = fetch_page(self.pool, &sql, &values)?;
        debug!("Page of {} rows read with: {}", rows.len(), sql);

        self.exhausted.set(rows.len() < self.page_size);
        self.buffer.borrow_mut().extend(rows);
        Ok(())
    }
}

impl<T> ItemReader<T> for RdbcPagingItemReader<'_, T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.buffer.borrow_mut().clear();
        self.exhausted.set(false);
        *self.last_sort_key.borrow_mut() = context.restart_position_as::<SqlValue>()?;
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() {
            if self.exhausted.get() {
                return Ok(None);
            }
            self.read_page()?;
        }

        let Some(row) = self.buffer.borrow_mut().pop_front() else {
            return Ok(None);
        };

        let column = self.provider.sort_key_column();
        let sort_key = SqlValue::from_row(&row, column).map_err(|error| {
            BatchError::ItemSource(format!("cannot read sort key {}: {}", column, error))
        })?;
        *self.last_sort_key.borrow_mut() = Some(sort_key);

        self.row_mapper.map_row(&row).map(Some)
    }

    fn current_position(&self) -> Option<Value> {
        self.last_sort_key
            .borrow()
            .as_ref()
            .and_then(|sort_key| serde_json::to_value(sort_key).ok())
    }
}

/// Builder for [`RdbcPagingItemReader`].
///
/// # Examples
///
/// ```no_run
/// use chunk_batch::item::rdbc::{PagingQueryProvider, RdbcPagingItemReaderBuilder, RowMapper};
/// use chunk_batch::BatchError;
/// use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
///
/// # async fn run(pool: SqlitePool) -> Result<(), BatchError> {
/// let mapper = |row: &SqliteRow| -> Result<String, BatchError> {
///     row.try_get("name").map_err(|error| BatchError::ItemReader(error.to_string()))
/// };
///
/// let reader = RdbcPagingItemReaderBuilder::<String>::new()
///     .pool(&pool)
///     .query_provider(
///         PagingQueryProvider::new("select people_id, name", "from people", "people_id")
///             .where_clause("pick = :pick"),
///     )
///     .parameter("pick", "RED")
///     .page_size(10)
///     .row_mapper(&mapper)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RdbcPagingItemReaderBuilder<'a, T> {
    pool: Option<&'a SqlitePool>,
    provider: Option<PagingQueryProvider>,
    parameters: BTreeMap<String, SqlValue>,
    page_size: usize,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<T> Default for RdbcPagingItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcPagingItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            provider: None,
            parameters: BTreeMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            row_mapper: None,
        }
    }

    pub fn pool(mut self, pool: &'a SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn query_provider(mut self, provider: PagingQueryProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Value bound to the `:name` placeholders of the where clause.
    pub fn parameter(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<RdbcPagingItemReader<'a, T>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a paging reader needs a pool".to_string()))?;
        let provider = self.provider.ok_or_else(|| {
            BatchError::Configuration("a paging reader needs a query provider".to_string())
        })?;
        let row_mapper = self.row_mapper.ok_or_else(|| {
            BatchError::Configuration("a paging reader needs a row mapper".to_string())
        })?;
        if self.page_size == 0 {
            return Err(BatchError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }

        Ok(RdbcPagingItemReader {
            pool,
            provider,
            parameters: self.parameters,
            page_size: self.page_size,
            row_mapper,
            buffer: RefCell::new(VecDeque::with_capacity(self.page_size)),
            last_sort_key: RefCell::new(None),
            exhausted: Cell::new(false),
        })
    }
}

/// Reader fetching rows page by page with `LIMIT` and `OFFSET`.
///
/// The query must have a stable order. Its position is the number of rows
/// consumed, which a restart turns back into an offset.
pub struct RdbcOffsetPagingItemReader<'a, T> {
    pool: &'a SqlitePool,
    sql: String,
    parameters: Vec<SqlValue>,
    page_size: usize,
    row_mapper: &'a dyn RowMapper<T>,
    buffer: RefCell<VecDeque<SqliteRow>>,
    offset: Cell<usize>,
    exhausted: Cell<bool>,
}

impl<T> RdbcOffsetPagingItemReader<'_, T> {
    fn read_page(&self) -> Result<(), BatchError> {
        let sql = format!(
            "{} LIMIT {} OFFSET {}",
            self.sql,
            self.page_size,
            self.offset.get()
        );
        let rows = fetch_page(self.pool, &sql, &self.parameters)?;
        debug!("Page of {} rows read with: {}", rows.len(), sql);

        self.exhausted.set(rows.len() < self.page_size);
        self.buffer.borrow_mut().extend(rows);
        Ok(())
    }
}

impl<T> ItemReader<T> for RdbcOffsetPagingItemReader<'_, T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.buffer.borrow_mut().clear();
        self.exhausted.set(false);
        self.offset
            .set(context.restart_position_as::<usize>()?.unwrap_or(0));
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() {
            if self.exhausted.get() {
                return Ok(None);
            }
            self.read_page()?;
        }

        let Some(row) = self.buffer.borrow_mut().pop_front() else {
            return Ok(None);
        };
        self.offset.set(self.offset.get() + 1);

        self.row_mapper.map_row(&row).map(Some)
    }

    fn current_position(&self) -> Option<Value> {
        Some(Value::from(self.offset.get()))
    }
}

pub struct RdbcOffsetPagingItemReaderBuilder<'a, T> {
    pool: Option<&'a SqlitePool>,
    sql: Option<String>,
    parameters: Vec<SqlValue>,
    page_size: usize,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<T> Default for RdbcOffsetPagingItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcOffsetPagingItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            sql: None,
            parameters: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            row_mapper: None,
        }
    }

    pub fn pool(mut self, pool: &'a SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Ordered query, without `LIMIT` or `OFFSET`.
    pub fn query(mut self, sql: &str) -> Self {
        self.sql = Some(sql.trim().trim_end_matches(';').to_string());
        self
    }

    /// Value bound to the next `?` placeholder.
    pub fn add_parameter(mut self, value: impl Into<SqlValue>) -> Self {
        self.parameters.push(value.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<RdbcOffsetPagingItemReader<'a, T>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a paging reader needs a pool".to_string()))?;
        let sql = self
            .sql
            .ok_or_else(|| BatchError::Configuration("a paging reader needs a query".to_string()))?;
        let row_mapper = self.row_mapper.ok_or_else(|| {
            BatchError::Configuration("a paging reader needs a row mapper".to_string())
        })?;
        if self.page_size == 0 {
            return Err(BatchError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }

        Ok(RdbcOffsetPagingItemReader {
            pool,
            sql,
            parameters: self.parameters,
            page_size: self.page_size,
            row_mapper,
            buffer: RefCell::new(VecDeque::with_capacity(self.page_size)),
            offset: Cell::new(0),
            exhausted: Cell::new(false),
        })
    }
}
