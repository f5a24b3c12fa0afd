use csv::{ByteRecord, Reader, ReaderBuilder, StringRecord, Terminator, Trim};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    cell::{Cell, RefCell},
    fmt::Display,
    fs::File,
    io::Read,
    path::Path,
    str::FromStr,
};

use crate::{
    core::{
        context::ExecutionContext,
        item::{ItemReader, ItemReaderResult},
    },
    error::BatchError,
};

/// Fields of one CSV record, addressable by position or by name.
///
/// Names come from the `names` configured on the builder, or from the header
/// line when the file has one.
pub struct FieldSet<'r> {
    names: Option<&'r StringRecord>,
    values: &'r StringRecord,
}

impl<'r> FieldSet<'r> {
    pub fn new(names: Option<&'r StringRecord>, values: &'r StringRecord) -> Self {
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn read_string_at(&self, index: usize) -> Result<&'r str, BatchError> {
        self.values.get(index).ok_or_else(|| {
            BatchError::ItemReader(format!(
                "no field at index {} in a record of {} fields",
                index,
                self.values.len()
            ))
        })
    }

    pub fn read_string(&self, name: &str) -> Result<&'r str, BatchError> {
        let names = self.names.ok_or_else(|| {
            BatchError::ItemReader(format!("cannot read field {}: no field names", name))
        })?;
        let index = names
            .iter()
            .position(|candidate| candidate == name)
            .ok_or_else(|| BatchError::ItemReader(format!("unknown field {}", name)))?;
        self.read_string_at(index)
    }

    /// Parses the field named `name`.
    pub fn read<T>(&self, name: &str) -> Result<T, BatchError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.read_string(name)?;
        raw.parse().map_err(|error| {
            BatchError::ItemReader(format!("field {} = {:?}: {}", name, raw, error))
        })
    }

    pub fn read_at<T>(&self, index: usize) -> Result<T, BatchError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.read_string_at(index)?;
        raw.parse().map_err(|error| {
            BatchError::ItemReader(format!("field #{} = {:?}: {}", index, raw, error))
        })
    }

    /// Maps the whole record with serde, matching field names when known.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, BatchError> {
        self.values
            .deserialize(self.names)
            .map_err(|error| BatchError::ItemReader(error.to_string()))
    }
}

type FieldSetMapper<'m, T> = Box<dyn Fn(&FieldSet<'_>) -> Result<T, BatchError> + 'm>;

/// Reader mapping each record of a CSV source to an item.
///
/// A record that fails to parse or to map is reported as an
/// [`BatchError::ItemReader`] and consumed, so the next `read` continues with
/// the following record. The position is the number of records consumed.
///
/// # Examples
///
/// ```
/// use chunk_batch::item::csv::csv_reader::CsvItemReaderBuilder;
/// use chunk_batch::core::item::ItemReader;
///
/// let data = "1,Alice,RED\n2,Bob,BLUE\n";
///
/// let reader = CsvItemReaderBuilder::with_mapper(|fields| {
///     Ok((fields.read::<u32>("id")?, fields.read_string("name")?.to_string()))
/// })
/// .names(&["id", "name", "pick"])
/// .from_reader(data.as_bytes())
/// .unwrap();
///
/// assert_eq!(reader.read().unwrap(), Some((1, "Alice".to_string())));
/// assert_eq!(reader.read().unwrap(), Some((2, "Bob".to_string())));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct CsvItemReader<'m, R, T> {
    reader: RefCell<Reader<R>>,
    names: Option<StringRecord>,
    mapper: FieldSetMapper<'m, T>,
    /// Records consumed so far, failed ones included
    position: Cell<usize>,
}

/// Maps a failed record read: a broken record concerns one item, an I/O
/// failure the whole source.
fn read_error(error: csv::Error) -> BatchError {
    if error.is_io_error() {
        BatchError::ItemSource(error.to_string())
    } else {
        BatchError::ItemReader(error.to_string())
    }
}

impl<R: Read, T> CsvItemReader<'_, R, T> {
    fn skip_records(&self, count: usize) -> Result<(), BatchError> {
        let mut reader = self.reader.borrow_mut();
        let mut record = ByteRecord::new();
        for _ in 0..count {
            match reader.read_byte_record(&mut record) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(BatchError::Restart(format!(
                        "input ended after {} records, cannot resume at {}",
                        self.position.get(),
                        self.position.get() + count
                    )));
                }
                Err(error) if error.is_io_error() => return Err(read_error(error)),
                // a malformed record still counts as consumed
                Err(error) => debug!("Skipping malformed record on restore: {}", error),
            }
            self.position.set(self.position.get() + 1);
        }
        Ok(())
    }
}

impl<R: Read, T> ItemReader<T> for CsvItemReader<'_, R, T> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let target = context.restart_position_as::<usize>()?.unwrap_or(0);
        let current = self.position.get();
        if target < current {
            return Err(BatchError::Restart(format!(
                "a CSV source cannot rewind from record {} to {}",
                current, target
            )));
        }
        self.skip_records(target - current)
    }

    fn read(&self) -> ItemReaderResult<T> {
        let mut record = StringRecord::new();
        let result = self.reader.borrow_mut().read_record(&mut record);

        match result {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.position.set(self.position.get() + 1);
                let fields = FieldSet::new(self.names.as_ref(), &record);
                (self.mapper)(&fields).map(Some)
            }
            Err(error) if error.is_io_error() => Err(read_error(error)),
            Err(error) => {
                self.position.set(self.position.get() + 1);
                Err(read_error(error))
            }
        }
    }

    fn current_position(&self) -> Option<Value> {
        Some(Value::from(self.position.get()))
    }
}

/// A builder for configuring CSV item reading.
///
/// # Default Configuration
///
/// - Delimiter: comma (,)
/// - Terminator: CRLF (accepts `\n`, `\r` and `\r\n`)
/// - Headers: disabled
/// - Trimming: All fields trimmed
///
/// # Examples
///
/// ```
/// use chunk_batch::item::csv::csv_reader::CsvItemReaderBuilder;
/// use chunk_batch::core::item::ItemReader;
/// use serde::Deserialize;
/// use csv::Terminator;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Person {
///     name: String,
///     age: u8,
/// }
///
/// let reader = CsvItemReaderBuilder::<Person>::new()
///     .delimiter(b';')
///     .terminator(Terminator::Any(b'\n'))
///     .has_headers(true)
///     .from_reader("name;age\nAlice;30".as_bytes())
///     .unwrap();
///
/// let person = reader.read().unwrap().unwrap();
/// assert_eq!(person.name, "Alice");
/// ```
pub struct CsvItemReaderBuilder<'m, T> {
    /// The delimiter character (default: comma ',')
    delimiter: u8,
    /// The line terminator (default: CRLF)
    terminator: Terminator,
    /// Whether the CSV has headers (default: false)
    has_headers: bool,
    names: Option<StringRecord>,
    mapper: FieldSetMapper<'m, T>,
}

impl<T: DeserializeOwned> CsvItemReaderBuilder<'_, T> {
    /// Builder mapping records with serde.
    pub fn new() -> Self {
        Self::with_mapper(|fields: &FieldSet<'_>| fields.deserialize())
    }
}

impl<T: DeserializeOwned> Default for CsvItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m, T> CsvItemReaderBuilder<'m, T> {
    /// Builder mapping records with a field set mapper.
    pub fn with_mapper<F>(mapper: F) -> Self
    where
        F: Fn(&FieldSet<'_>) -> Result<T, BatchError> + 'm,
    {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
            names: None,
            mapper: Box::new(mapper),
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// When enabled, the first line holds the field names and is not an item.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    /// Names the fields by position. They take precedence over a header line.
    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = Some(StringRecord::from(names.to_vec()));
        self
    }

    /// Creates a `CsvItemReader` from any source implementing `Read`.
    pub fn from_reader<R: Read>(self, rdr: R) -> Result<CsvItemReader<'m, R, T>, BatchError> {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false)
            .from_reader(rdr);

        self.build(reader)
    }

    /// Creates a `CsvItemReader` reading the file at `path`.
    pub fn from_path<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Result<CsvItemReader<'m, File, T>, BatchError> {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false)
            .from_path(path)
            .map_err(read_error)?;

        self.build(reader)
    }

    fn build<R: Read>(self, mut reader: Reader<R>) -> Result<CsvItemReader<'m, R, T>, BatchError> {
        let names = match self.names {
            Some(names) => Some(names),
            None if self.has_headers => Some(
                reader.headers().map_err(read_error)?.clone(),
            ),
            None => None,
        };

        Ok(CsvItemReader {
            reader: RefCell::new(reader),
            names,
            mapper: self.mapper,
            position: Cell::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct City {
        city: String,
        country: String,
        pop: u64,
    }

    const CITIES: &str = "city,country,pop
        Boston,United States,4628910
        Concord,United States,42695";

    #[test]
    fn header_names_drive_serde_mapping() -> Result<(), BatchError> {
        let reader = CsvItemReaderBuilder::<City>::new()
            .has_headers(true)
            .from_reader(CITIES.as_bytes())?;

        let boston = reader.read()?;
        assert_eq!(
            boston,
            Some(City {
                city: "Boston".to_string(),
                country: "United States".to_string(),
                pop: 4628910,
            })
        );
        assert_eq!(reader.read()?.map(|city| city.pop), Some(42695));
        assert_eq!(reader.read()?, None);
        assert_eq!(reader.current_position(), Some(Value::from(2)));
        Ok(())
    }

    #[test]
    fn explicit_names_feed_the_field_set() -> Result<(), BatchError> {
        let data = "7, Carol ,RED\n8,Dave,BLUE\n";
        let reader = CsvItemReaderBuilder::with_mapper(|fields| {
            Ok(format!(
                "{}:{}:{}",
                fields.read::<u32>("id")?,
                fields.read_string("name")?,
                fields.read_string_at(2)?
            ))
        })
        .names(&["id", "name", "pick"])
        .from_reader(data.as_bytes())?;

        assert_eq!(reader.read()?, Some("7:Carol:RED".to_string()));
        assert_eq!(reader.read()?, Some("8:Dave:BLUE".to_string()));
        Ok(())
    }

    #[test]
    fn bad_record_is_consumed_and_reading_goes_on() -> Result<(), BatchError> {
        let data = "city,country,pop
        Boston,United States,not-a-number
        Concord,United States,42695";
        let reader = CsvItemReaderBuilder::<City>::new()
            .has_headers(true)
            .from_reader(data.as_bytes())?;

        assert!(matches!(reader.read(), Err(BatchError::ItemReader(_))));
        assert_eq!(reader.read()?.map(|city| city.city), Some("Concord".to_string()));
        Ok(())
    }

    #[test]
    fn open_skips_records_already_committed() -> Result<(), BatchError> {
        let reader = CsvItemReaderBuilder::<City>::new()
            .has_headers(true)
            .from_reader(CITIES.as_bytes())?;
        let mut context = ExecutionContext::new();
        context.set_restart_position(Some(Value::from(1)));

        reader.open(&context)?;

        assert_eq!(reader.read()?.map(|city| city.city), Some("Concord".to_string()));
        Ok(())
    }

    #[test]
    fn restoring_past_the_end_is_a_restart_error() -> Result<(), BatchError> {
        let reader = CsvItemReaderBuilder::<City>::new()
            .has_headers(true)
            .from_reader(CITIES.as_bytes())?;
        let mut context = ExecutionContext::new();
        context.set_restart_position(Some(Value::from(3)));

        assert!(matches!(reader.open(&context), Err(BatchError::Restart(_))));
        Ok(())
    }

    #[test]
    fn unknown_field_name_is_a_reader_error() -> Result<(), BatchError> {
        let reader = CsvItemReaderBuilder::with_mapper(|fields| fields.read::<u32>("age"))
            .from_reader("1,2\n".as_bytes())?;

        assert!(matches!(reader.read(), Err(BatchError::ItemReader(_))));
        Ok(())
    }

    #[test]
    fn missing_file_is_reported() {
        let result = CsvItemReaderBuilder::<City>::new().from_path("does/not/exist.csv");
        assert!(matches!(result, Err(BatchError::ItemSource(_))));
    }

    /// Source failing once its bytes are consumed.
    struct Unplugged {
        data: &'static [u8],
    }

    impl Read for Unplugged {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.data.is_empty() {
                return Err(std::io::Error::other("device unplugged"));
            }
            let len = self.data.len().min(buf.len());
            buf[..len].copy_from_slice(&self.data[..len]);
            self.data = &self.data[len..];
            Ok(len)
        }
    }

    #[test]
    fn failing_source_is_not_a_record_error() -> Result<(), BatchError> {
        let reader = CsvItemReaderBuilder::with_mapper(|fields| fields.read::<u32>("id"))
            .names(&["id", "name"])
            .from_reader(Unplugged {
                data: b"1,Alice\n",
            })?;

        assert_eq!(reader.read()?, Some(1));
        assert!(matches!(reader.read(), Err(BatchError::ItemSource(_))));
        assert_eq!(reader.current_position(), Some(Value::from(1)));
        Ok(())
    }
}
