use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{BufReader, Bytes, Read},
    marker::PhantomData,
    path::Path,
};

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    BatchError,
};

/// Reader streaming the elements of a top-level JSON array.
///
/// Elements are cut out of the byte stream one at a time, so the document is
/// never loaded as a whole. An element that does not deserialize into `T` is
/// a per-item [`BatchError::ItemReader`]; a document whose structure is broken
/// (no opening bracket, truncated element) ends the stream after the error.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::item::ItemReader;
/// use chunk_batch::item::json::JsonItemReaderBuilder;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Person {
///     id: u32,
///     name: String,
/// }
///
/// let data = r#"[{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob, the builder"}]"#;
/// let reader = JsonItemReaderBuilder::<Person>::new().from_reader(data.as_bytes());
///
/// assert_eq!(reader.read().unwrap().map(|p| p.id), Some(1));
/// assert_eq!(reader.read().unwrap().map(|p| p.name), Some("Bob, the builder".to_string()));
/// assert!(reader.read().unwrap().is_none());
/// ```
pub struct JsonItemReader<R, T> {
    pd: PhantomData<T>,
    bytes: RefCell<Bytes<BufReader<R>>>,
    started: Cell<bool>,
    finished: Cell<bool>,
    /// Elements consumed so far, failed ones included
    position: Cell<usize>,
}

impl<R: Read, T: DeserializeOwned> JsonItemReader<R, T> {
    fn new(rdr: R, capacity: usize) -> Self {
        let buf_reader = BufReader::with_capacity(capacity, rdr);

        Self {
            pd: PhantomData,
            bytes: RefCell::new(buf_reader.bytes()),
            started: Cell::new(false),
            finished: Cell::new(false),
            position: Cell::new(0),
        }
    }

    fn next_byte(&self) -> Result<Option<u8>, BatchError> {
        match self.bytes.borrow_mut().next() {
            Some(Ok(byte)) => Ok(Some(byte)),
            Some(Err(error)) => Err(self.broken(error.to_string())),
            None => Ok(None),
        }
    }

    fn next_significant_byte(&self) -> Result<Option<u8>, BatchError> {
        loop {
            match self.next_byte()? {
                Some(byte) if byte.is_ascii_whitespace() => continue,
                other => return Ok(other),
            }
        }
    }

    /// Marks the stream as finished and builds the matching error.
    fn broken(&self, message: String) -> BatchError {
        self.finished.set(true);
        BatchError::ItemSource(format!("malformed JSON array: {}", message))
    }

    /// Raw bytes of the next element, `None` once the array is closed.
    fn next_element(&self) -> Result<Option<Vec<u8>>, BatchError> {
        if self.finished.get() {
            return Ok(None);
        }

        if !self.started.get() {
            match self.next_significant_byte()? {
                None => {
                    self.finished.set(true);
                    return Ok(None);
                }
                Some(b'[') => self.started.set(true),
                Some(other) => {
                    return Err(self.broken(format!("expected '[' but found '{}'", other as char)));
                }
            }
        }

        let first = match self.next_significant_byte()? {
            Some(b']') => {
                self.finished.set(true);
                return Ok(None);
            }
            Some(byte) => byte,
            None => return Err(self.broken("unexpected end of input".to_string())),
        };

        self.scan_element(first).map(Some)
    }

    fn scan_element(&self, first: u8) -> Result<Vec<u8>, BatchError> {
        let mut element = Vec::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut next = Some(first);

        while let Some(byte) = next {
            if in_string {
                element.push(byte);
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
            } else {
                match byte {
                    b'"' => {
                        in_string = true;
                        element.push(byte);
                    }
                    b'{' | b'[' => {
                        depth += 1;
                        element.push(byte);
                    }
                    b'}' | b']' if depth > 0 => {
                        depth -= 1;
                        element.push(byte);
                    }
                    b']' => {
                        // last element, the array is closed
                        self.finished.set(true);
                        return Ok(element);
                    }
                    b',' if depth == 0 => return Ok(element),
                    _ => element.push(byte),
                }
            }
            next = self.next_byte()?;
        }

        Err(self.broken("unexpected end of input inside an element".to_string()))
    }
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for JsonItemReader<R, T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let target = context.restart_position_as::<usize>()?.unwrap_or(0);
        let current = self.position.get();
        if target < current {
            return Err(BatchError::Restart(format!(
                "a JSON source cannot rewind from element {} to {}",
                current, target
            )));
        }

        for _ in current..target {
            if self.next_element()?.is_none() {
                return Err(BatchError::Restart(format!(
                    "input ended after {} elements, cannot resume at {}",
                    self.position.get(),
                    target
                )));
            }
            self.position.set(self.position.get() + 1);
        }
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        let Some(element) = self.next_element()? else {
            return Ok(None);
        };
        self.position.set(self.position.get() + 1);

        serde_json::from_slice(&element).map(Some).map_err(|error| {
            debug!(
                "Unable to map element #{}: {}",
                self.position.get(),
                String::from_utf8_lossy(&element)
            );
            BatchError::ItemReader(error.to_string())
        })
    }

    fn current_position(&self) -> Option<Value> {
        Some(Value::from(self.position.get()))
    }
}

pub struct JsonItemReaderBuilder<T> {
    _pd: PhantomData<T>,
    capacity: usize,
}

impl<T: DeserializeOwned> Default for JsonItemReaderBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> JsonItemReaderBuilder<T> {
    pub fn new() -> JsonItemReaderBuilder<T> {
        Self {
            _pd: PhantomData,
            capacity: 8 * 1024,
        }
    }

    /// Size of the read buffer.
    pub fn capacity(mut self, capacity: usize) -> JsonItemReaderBuilder<T> {
        self.capacity = capacity;
        self
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> JsonItemReader<R, T> {
        JsonItemReader::new(rdr, self.capacity)
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<JsonItemReader<File, T>, BatchError> {
        let file = File::open(path)?;
        Ok(JsonItemReader::new(file, self.capacity))
    }
}
