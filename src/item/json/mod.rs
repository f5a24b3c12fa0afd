/// JSON array support.
///
/// [`JsonItemReader`] streams the elements of a top-level JSON array without
/// loading the whole document, so a large export can be read in chunks. Its
/// restart position is the number of elements consumed.
///
/// [`JsonItemWriter`] writes the items of every chunk as the elements of a
/// single array: `open` writes the opening bracket, `close` the closing one.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::context::ExecutionContext;
/// use chunk_batch::core::item::{ItemReader, ItemWriter};
/// use chunk_batch::item::json::{JsonItemReaderBuilder, JsonItemWriterBuilder};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Deserialize, Serialize, PartialEq)]
/// struct Person {
///     people_id: i64,
///     pick: String,
/// }
///
/// let json = r#"[{"people_id": 1, "pick": "RED"}, {"people_id": 2, "pick": "BLUE"}]"#;
///
/// let reader = JsonItemReaderBuilder::<Person>::new().from_reader(json.as_bytes());
/// let mut context = ExecutionContext::new();
/// context.put("batch.reader.position", 1).unwrap();
/// reader.open(&context).unwrap();
///
/// let second = reader.read().unwrap().unwrap();
/// assert_eq!(second.people_id, 2);
/// assert!(reader.read().unwrap().is_none());
///
/// let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());
/// ItemWriter::<Person>::open(&writer).unwrap();
/// writer.write(&[second]).unwrap();
/// ItemWriter::<Person>::close(&writer).unwrap();
///
/// let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
/// assert_eq!(output, r#"[{"people_id":2,"pick":"BLUE"}]"#);
/// ```
pub mod json_reader;

pub mod json_writer;

pub use json_reader::{JsonItemReader, JsonItemReaderBuilder};
pub use json_writer::{JsonItemWriter, JsonItemWriterBuilder};
