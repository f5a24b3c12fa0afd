use std::cell::Cell;

use serde_json::Value;

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    BatchError,
};

/// Reader handing out the items of an in-memory vector, in order.
///
/// Its position is the number of items already handed out, so a restarted
/// step resumes right after the last committed item.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::item::ItemReader;
/// use chunk_batch::item::list::ListItemReader;
///
/// let reader = ListItemReader::new(vec!["a", "b"]);
/// assert_eq!(reader.read().unwrap(), Some("a"));
/// assert_eq!(reader.read().unwrap(), Some("b"));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct ListItemReader<T> {
    items: Vec<T>,
    index: Cell<usize>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            index: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> ItemReader<T> for ListItemReader<T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let position = context.restart_position_as::<usize>()?.unwrap_or(0);
        if position > self.items.len() {
            return Err(BatchError::Restart(format!(
                "cannot resume at item {} of a list holding {} items",
                position,
                self.items.len()
            )));
        }
        self.index.set(position);
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        let index = self.index.get();
        match self.items.get(index) {
            Some(item) => {
                self.index.set(index + 1);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }

    fn current_position(&self) -> Option<Value> {
        Some(Value::from(self.index.get()))
    }
}
