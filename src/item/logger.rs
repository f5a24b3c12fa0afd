use std::fmt::Debug;

use log::info;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

/// Writer logging every item of a chunk, then the chunk length.
///
/// The label prefixes each line, e.g. `Read From DB` gives
/// `Read From DB, item = ...` and `Read From DB, length = 10`.
pub struct LoggerWriter {
    label: String,
}

impl Default for LoggerWriter {
    fn default() -> Self {
        Self::new("Record")
    }
}

impl LoggerWriter {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        items
            .iter()
            .for_each(|item| info!("{}, item = {:?}", self.label, item));
        info!("{}, length = {}", self.label, items.len());
        Ok(())
    }

    fn flush(&self) -> Result<(), BatchError> {
        Ok(())
    }
}
