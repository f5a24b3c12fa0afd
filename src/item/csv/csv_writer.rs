use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{self, Write},
    mem,
    path::Path,
};

use csv::WriterBuilder;
use serde::Serialize;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

/// Writer serializing each item as one CSV record.
///
/// The header line, when enabled, is derived from the first item's field names.
///
/// Records of a chunk are serialized into memory by `write` and reach the
/// sink in a single call on `flush`. A chunk failing at either stage is
/// dropped as a whole.
pub struct CsvItemWriter<W: Write> {
    sink: RefCell<W>,
    delimiter: u8,
    has_headers: bool,
    pending: RefCell<Vec<u8>>,
    header_written: Cell<bool>,
}

impl<W: Write> CsvItemWriter<W> {
    fn new(wtr: W, delimiter: u8, has_headers: bool) -> Self {
        Self {
            sink: RefCell::new(wtr),
            delimiter,
            has_headers,
            pending: RefCell::new(Vec::new()),
            header_written: Cell::new(false),
        }
    }
}

impl<W: Write, O: Serialize> ItemWriter<O> for CsvItemWriter<W> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        let mut pending = self.pending.borrow_mut();
        let mut writer = WriterBuilder::new()
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers && !self.header_written.get() && pending.is_empty())
            .from_writer(Vec::new());

        for item in items {
            writer
                .serialize(item)
                .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }

        let records = writer
            .into_inner()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        pending.extend_from_slice(&records);
        Ok(())
    }

    fn flush(&self) -> Result<(), BatchError> {
        let records = mem::take(&mut *self.pending.borrow_mut());
        if records.is_empty() {
            return Ok(());
        }

        let mut sink = self.sink.borrow_mut();
        sink.write_all(&records)
            .and_then(|_| sink.flush())
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        self.header_written.set(true);
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        ItemWriter::<O>::flush(self)
    }
}

impl<W: Write> CsvItemWriter<W> {
    /// Returns the sink. Records written but never flushed are discarded.
    pub fn into_inner(self) -> Result<W, BatchError> {
        Ok(self.sink.into_inner())
    }
}

pub struct CsvItemWriterBuilder {
    delimiter: u8,
    has_headers: bool,
}

impl Default for CsvItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemWriterBuilder {
    pub fn new() -> CsvItemWriterBuilder {
        CsvItemWriterBuilder {
            delimiter: b',',
            has_headers: false,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> CsvItemWriterBuilder {
        self.delimiter = delimiter;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> CsvItemWriterBuilder {
        self.has_headers = yes;
        self
    }

    /// Creates (or truncates) the file at `path`.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemWriter<File>, BatchError> {
        let file = File::create(path)?;
        Ok(CsvItemWriter::new(file, self.delimiter, self.has_headers))
    }

    pub fn from_writer<W: io::Write>(self, wtr: W) -> CsvItemWriter<W> {
        CsvItemWriter::new(wtr, self.delimiter, self.has_headers)
    }
}
