use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Write,
    mem,
    path::Path,
};

use serde::Serialize;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

/// Writer producing one JSON array out of every chunk of a step.
///
/// `open` writes the opening bracket and `close` the closing one, so the
/// output is a complete document once the step is over.
///
/// `write` only serializes a chunk into memory. `flush` hands the whole
/// chunk to the sink in one call and drops it when that call fails, so a
/// rejected chunk never leaves part of its items behind and writing it again
/// produces the same bytes.
pub struct JsonItemWriter<W: Write> {
    stream: RefCell<W>,
    use_pretty_formatter: bool,
    /// Serialized items waiting for `flush`
    pending: RefCell<Vec<u8>>,
    /// No item reached the sink since `open`
    is_first_item: Cell<bool>,
}

impl<W: Write> JsonItemWriter<W> {
    fn new(wtr: W, use_pretty_formatter: bool) -> Self {
        Self {
            stream: RefCell::new(wtr),
            use_pretty_formatter,
            pending: RefCell::new(Vec::new()),
            is_first_item: Cell::new(true),
        }
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<(), BatchError> {
        let mut stream = self.stream.borrow_mut();
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|error| BatchError::ItemWriter(error.to_string()))
    }

    fn separator(&self) -> &'static [u8] {
        if self.use_pretty_formatter {
            b",\n"
        } else {
            b","
        }
    }

    /// Returns the sink. Items written but never flushed are discarded.
    pub fn into_inner(self) -> Result<W, BatchError> {
        Ok(self.stream.into_inner())
    }
}

impl<W: Write, O: Serialize> ItemWriter<O> for JsonItemWriter<W> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        let mut pending = self.pending.borrow_mut();
        let mut is_first = self.is_first_item.get() && pending.is_empty();
        let mut chunk = Vec::new();

        for item in items {
            if !is_first {
                chunk.extend_from_slice(self.separator());
            }
            if self.use_pretty_formatter {
                serde_json::to_writer_pretty(&mut chunk, item)
            } else {
                serde_json::to_writer(&mut chunk, item)
            }
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
            is_first = false;
        }

        pending.extend_from_slice(&chunk);
        Ok(())
    }

    fn flush(&self) -> Result<(), BatchError> {
        let chunk = mem::take(&mut *self.pending.borrow_mut());
        if chunk.is_empty() {
            return Ok(());
        }

        self.write_raw(&chunk)?;
        self.is_first_item.set(false);
        Ok(())
    }

    fn open(&self) -> Result<(), BatchError> {
        self.pending.borrow_mut().clear();
        self.is_first_item.set(true);
        if self.use_pretty_formatter {
            self.write_raw(b"[\n")
        } else {
            self.write_raw(b"[")
        }
    }

    fn close(&self) -> Result<(), BatchError> {
        ItemWriter::<O>::flush(self)?;
        if self.use_pretty_formatter {
            self.write_raw(b"\n]")
        } else {
            self.write_raw(b"]")
        }
    }
}

#[derive(Default)]
pub struct JsonItemWriterBuilder {
    pretty_formatter: bool,
}

impl JsonItemWriterBuilder {
    pub fn new() -> JsonItemWriterBuilder {
        JsonItemWriterBuilder {
            pretty_formatter: false,
        }
    }

    pub fn pretty_formatter(mut self, yes: bool) -> JsonItemWriterBuilder {
        self.pretty_formatter = yes;
        self
    }

    /// Creates (or truncates) the file at `path`.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<JsonItemWriter<File>, BatchError> {
        let file = File::create(path)?;
        Ok(JsonItemWriter::new(file, self.pretty_formatter))
    }

    pub fn from_writer<W: Write>(self, wtr: W) -> JsonItemWriter<W> {
        JsonItemWriter::new(wtr, self.pretty_formatter)
    }
}
