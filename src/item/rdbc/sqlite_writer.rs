use sqlx::{Pool, QueryBuilder, Sqlite};

use crate::core::item::{ItemWriter, ItemWriterResult};
use crate::item::rdbc::{block_on, DatabaseItemBinder};
use crate::BatchError;

// Default SQLITE_MAX_VARIABLE_NUMBER since SQLite 3.32
const BIND_LIMIT: usize = 32766;

/// Writer inserting each chunk into a SQLite table within one transaction.
///
/// Chunks larger than the bind-parameter limit allows are split over several
/// `INSERT` statements of the same transaction.
pub struct SqliteItemWriter<'a, O> {
    pool: Option<&'a Pool<Sqlite>>,
    table: Option<&'a str>,
    columns: Vec<&'a str>,
    item_binder: Option<&'a dyn DatabaseItemBinder<O, Sqlite>>,
}

impl<O> Default for SqliteItemWriter<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O> SqliteItemWriter<'a, O> {
    pub fn new() -> Self {
        Self {
            pool: None,
            table: None,
            columns: Vec::new(),
            item_binder: None,
        }
    }

    pub fn pool(mut self, pool: &'a Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn table(mut self, table: &'a str) -> Self {
        self.table = Some(table);
        self
    }

    pub fn add_column(mut self, column: &'a str) -> Self {
        self.columns.push(column);
        self
    }

    pub fn item_binder(mut self, item_binder: &'a dyn DatabaseItemBinder<O, Sqlite>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    #[allow(clippy::type_complexity)]
    fn parts(
        &self,
    ) -> Result<(&'a Pool<Sqlite>, &'a str, &'a dyn DatabaseItemBinder<O, Sqlite>), BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("SQLite writer needs a pool".to_string()))?;
        let table = self
            .table
            .ok_or_else(|| BatchError::Configuration("SQLite writer needs a table".to_string()))?;
        let item_binder = self.item_binder.ok_or_else(|| {
            BatchError::Configuration("SQLite writer needs an item binder".to_string())
        })?;
        if self.columns.is_empty() {
            return Err(BatchError::Configuration(
                "SQLite writer needs one or more columns".to_string(),
            ));
        }
        Ok((pool, table, item_binder))
    }
}

impl<O> ItemWriter<O> for SqliteItemWriter<'_, O> {
    fn open(&self) -> Result<(), BatchError> {
        self.parts().map(|_| ())
    }

    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }
        let (pool, table, item_binder) = self.parts()?;
        let rows_per_statement = (BIND_LIMIT / self.columns.len()).max(1);

        let result = block_on(async {
            let mut transaction = pool.begin().await?;

            for batch in items.chunks(rows_per_statement) {
                let mut query_builder = QueryBuilder::new("INSERT INTO ");
                query_builder.push(table);
                query_builder.push(" (");
                query_builder.push(self.columns.join(","));
                query_builder.push(") ");

                query_builder.push_values(batch, |b, item| {
                    item_binder.bind(item, b);
                });

                query_builder.build().execute(&mut *transaction).await?;
            }

            transaction.commit().await
        })?;

        match result {
            Ok(()) => {
                log::debug!("Successfully wrote {} items to SQLite table {}", items.len(), table);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to write items to SQLite table {}: {}", table, e);
                Err(BatchError::ItemWriter(format!("SQLite write failed: {}", e)))
            }
        }
    }
}
