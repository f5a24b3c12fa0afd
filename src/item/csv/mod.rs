pub mod csv_reader;

pub mod csv_writer;

pub use csv_reader::{CsvItemReader, CsvItemReaderBuilder, FieldSet};
pub use csv_writer::{CsvItemWriter, CsvItemWriterBuilder};
