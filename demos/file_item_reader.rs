use std::{cell::RefCell, env::temp_dir, fs::File, path::Path};

use chunk_batch::{
    core::{
        context::ExecutionContext,
        item::{ItemProcessorResult, ItemReader, ItemReaderResult, PassThroughProcessor},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::JsonFileJobRepository,
        step::StepBuilder,
    },
    error::BatchError,
    item::{
        csv::csv_reader::CsvItemReaderBuilder,
        json::{
            json_reader::{JsonItemReader, JsonItemReaderBuilder},
            json_writer::JsonItemWriterBuilder,
        },
        logger::LoggerWriter,
    },
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize, Serialize, Debug, Clone)]
struct Person {
    people_id: i64,
    first_name: String,
    last_name: String,
    pick: String,
}

fn upper_case(person: &Person) -> ItemProcessorResult<Person> {
    Ok(Some(Person {
        last_name: person.last_name.to_uppercase(),
        ..person.clone()
    }))
}

fn main() -> Result<(), BatchError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let csv = "people_id,first_name,last_name,pick
    1,Océane,Dupond,RED
    2,Amandine,Évrat,BLUE
    bad_id,Ugo,Niels,RED
    4,Léo,Zola,BLUE";

    let output = temp_dir().join("persons.json");

    let csv_reader = CsvItemReaderBuilder::<Person>::new()
        .has_headers(true)
        .from_reader(csv.as_bytes())?;
    let json_writer = JsonItemWriterBuilder::new()
        .pretty_formatter(true)
        .from_path(&output)?;

    let to_json = StepBuilder::new("csvToJson")
        .chunk::<Person, Person>(2)
        .reader(&csv_reader)
        .processor(&upper_case)
        .writer(&json_writer)
        .skip_limit(1) // the third line has no valid id
        .build()?;

    // the JSON file is read back once the first step has closed it
    let json_reader = LazyJsonReader::new(&output);
    let logger = LoggerWriter::new("Read From File");
    let log_json = StepBuilder::new("logJson")
        .chunk::<Person, Person>(2)
        .reader(&json_reader)
        .processor(&PassThroughProcessor)
        .writer(&logger)
        .build()?;

    let job = JobBuilder::new()
        .name("fileJob")
        .start(&to_json)
        .next(&log_json)
        .build()?;

    let repository = JsonFileJobRepository::open(temp_dir().join("file_item_reader.json"))?;
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    info!(
        "Job ended with status {}, repository saved in {}",
        execution.status,
        repository.path().display()
    );

    Ok(())
}

/// Opens the JSON file on first use, after the step producing it has run.
struct LazyJsonReader<'p> {
    path: &'p Path,
    reader: RefCell<Option<JsonItemReader<File, Person>>>,
}

impl<'p> LazyJsonReader<'p> {
    fn new(path: &'p Path) -> Self {
        Self {
            path,
            reader: RefCell::new(None),
        }
    }
}

impl ItemReader<Person> for LazyJsonReader<'_> {
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        let reader = JsonItemReaderBuilder::<Person>::new().from_path(self.path)?;
        reader.open(context)?;
        *self.reader.borrow_mut() = Some(reader);
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<Person> {
        match self.reader.borrow().as_ref() {
            Some(reader) => reader.read(),
            None => Err(BatchError::ItemReader("reader is not open".to_string())),
        }
    }

    fn current_position(&self) -> Option<Value> {
        self.reader
            .borrow()
            .as_ref()
            .and_then(|reader| reader.current_position())
    }
}
