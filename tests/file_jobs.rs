pub mod common;

use std::{cell::RefCell, io};

use chunk_batch::{
    core::{
        item::{ItemProcessorResult, ItemWriterResult, PassThroughProcessor},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::{InMemoryJobRepository, JobRepository, JsonFileJobRepository},
        step::{BatchStatus, StepBuilder},
    },
    item::{
        csv::{CsvItemReaderBuilder, CsvItemWriterBuilder, FieldSet},
        json::{JsonItemReaderBuilder, JsonItemWriterBuilder},
        logger::LoggerWriter,
    },
    BatchError,
};
use common::{data_path, mocks::MockFile, Person, PEOPLE, PERSON_FIELDS};
use serde::{ser, Serialize, Serializer};
use tokio_util::sync::CancellationToken;

/// Export record whose serialization fails for one person id.
struct Badge {
    people_id: i64,
    unprintable: bool,
}

impl Serialize for Badge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.unprintable {
            return Err(ser::Error::custom(format!(
                "badge {} cannot be printed",
                self.people_id
            )));
        }
        serializer.serialize_i64(self.people_id)
    }
}

fn map_person(fields: &FieldSet<'_>) -> Result<Person, BatchError> {
    Ok(Person {
        people_id: fields.read("people_id")?,
        first_name: fields.read_string("first_name")?.to_string(),
        last_name: fields.read_string("last_name")?.to_string(),
        pick: fields.read_string("pick")?.to_string(),
    })
}

fn ids(people: &[Person]) -> Vec<i64> {
    people.iter().map(|person| person.people_id).collect()
}

#[test]
fn csv_and_json_sources_hold_the_same_people() -> Result<(), BatchError> {
    common::init_logger();

    let csv_reader = CsvItemReaderBuilder::with_mapper(map_person)
        .names(&PERSON_FIELDS)
        .from_path(data_path("persons.csv"))?;
    let json_reader = JsonItemReaderBuilder::<Person>::new().from_path(data_path("persons.json"))?;

    let from_csv = RefCell::new(Vec::new());
    let from_json = RefCell::new(Vec::new());
    let collect_csv = |items: &[Person]| -> ItemWriterResult {
        from_csv.borrow_mut().extend_from_slice(items);
        Ok(())
    };
    let collect_json = |items: &[Person]| -> ItemWriterResult {
        from_json.borrow_mut().extend_from_slice(items);
        Ok(())
    };

    let csv_step = StepBuilder::new("csvStep")
        .chunk::<Person, Person>(10)
        .reader(&csv_reader)
        .processor(&PassThroughProcessor)
        .writer(&collect_csv)
        .build()?;
    let json_step = StepBuilder::new("jsonStep")
        .chunk::<Person, Person>(10)
        .reader(&json_reader)
        .processor(&PassThroughProcessor)
        .writer(&collect_json)
        .build()?;

    let job = JobBuilder::new()
        .name("fileJob")
        .start(&csv_step)
        .next(&json_step)
        .build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.step_executions.len(), 2);
    assert_eq!(from_csv.borrow().len(), PEOPLE);
    assert_eq!(*from_csv.borrow(), *from_json.borrow());
    assert_eq!(from_csv.borrow()[0].first_name, "Océane");
    Ok(())
}

#[test]
fn csv_is_converted_to_a_json_file() -> Result<(), BatchError> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("persons.json");

    let reader = CsvItemReaderBuilder::with_mapper(map_person)
        .names(&PERSON_FIELDS)
        .from_path(data_path("persons.csv"))?;
    let writer = JsonItemWriterBuilder::new()
        .pretty_formatter(true)
        .from_path(&output)?;
    let red_only = |person: &Person| -> ItemProcessorResult<Person> {
        Ok((person.pick == "RED").then(|| person.clone()))
    };

    let step = StepBuilder::new("toJson")
        .chunk::<Person, Person>(4)
        .reader(&reader)
        .processor(&red_only)
        .writer(&writer)
        .build()?;
    let job = JobBuilder::new().start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_execution.read_count, PEOPLE);
    assert_eq!(step_execution.filter_count, 11);
    assert_eq!(step_execution.write_count, 12);

    let written: Vec<Person> = serde_json::from_reader(std::fs::File::open(&output)?)?;
    assert_eq!(ids(&written), (1..=23).step_by(2).collect::<Vec<i64>>());
    Ok(())
}

#[test]
fn malformed_lines_are_skipped_within_the_limit() -> Result<(), BatchError> {
    let csv = "1,Océane,Dupond,RED
two,Amandine,Évrat,BLUE
3,Ugo,Niels,RED
4,Léo,Zola
5,Marius,Ogier,RED";

    let build_reader = || {
        CsvItemReaderBuilder::with_mapper(map_person)
            .names(&PERSON_FIELDS)
            .from_reader(csv.as_bytes())
    };
    let logger = LoggerWriter::new("Read From File");

    let reader = build_reader()?;
    let tolerant = StepBuilder::new("tolerant")
        .chunk::<Person, Person>(2)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&logger)
        .skip_limit(2)
        .build()?;
    let job = JobBuilder::new().start(&tolerant).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_execution.read_count, 3);
    assert_eq!(step_execution.read_skip_count, 2);
    assert_eq!(step_execution.write_count, 3);

    let reader = build_reader()?;
    let strict = StepBuilder::new("strict")
        .chunk::<Person, Person>(2)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&logger)
        .skip_limit(1)
        .build()?;
    let job = JobBuilder::new().start(&strict).build()?;
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.step_executions[0].write_count, 2);
    Ok(())
}

#[test]
fn csv_job_resumes_from_a_persisted_repository() -> Result<(), BatchError> {
    common::init_logger();
    let dir = tempfile::tempdir()?;
    let repository_path = dir.path().join("repository.json");
    let parameters = JobParameters::new().add_string("input.file", "persons.csv");
    let written = RefCell::new(Vec::new());

    let run = |fail_on: Option<i64>| -> Result<_, BatchError> {
        let repository = JsonFileJobRepository::open(&repository_path)?;
        let reader = CsvItemReaderBuilder::with_mapper(map_person)
            .names(&PERSON_FIELDS)
            .from_path(data_path("persons.csv"))?;
        let processor = |person: &Person| -> ItemProcessorResult<Person> {
            match fail_on {
                Some(id) if person.people_id == id => Err(BatchError::ItemProcessor(format!(
                    "person {} cannot be processed",
                    id
                ))),
                _ => Ok(Some(person.clone())),
            }
        };
        let writer = |items: &[Person]| -> ItemWriterResult {
            written.borrow_mut().extend_from_slice(items);
            Ok(())
        };

        let step = StepBuilder::new("csvStep")
            .chunk::<Person, Person>(5)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()?;
        let job = JobBuilder::new().name("csvJob").start(&step).build()?;

        JobLauncher::new(&repository).run(&job, &parameters)
    };

    let failed = run(Some(15))?;
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(ids(&written.borrow()), (1..=10).collect::<Vec<i64>>());

    let resumed = run(None)?;
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.step_executions[0].read_count, 13);
    assert_eq!(ids(&written.borrow()), (1..=23).collect::<Vec<i64>>());

    let repository = JsonFileJobRepository::open(&repository_path)?;
    let instance = repository.get_job_instance("csvJob", &parameters)?;
    assert!(instance.is_some());
    assert!(matches!(run(None), Err(BatchError::Restart(_))));
    Ok(())
}

#[test]
fn stop_request_ends_the_job_at_a_chunk_boundary() -> Result<(), BatchError> {
    let repository = InMemoryJobRepository::new();
    let parameters = JobParameters::new().add_string("input.file", "persons.json");
    let written = RefCell::new(Vec::new());

    let run = |stop_signal: CancellationToken, stop_on: Option<i64>| -> Result<_, BatchError> {
        let reader = JsonItemReaderBuilder::<Person>::new().from_path(data_path("persons.json"))?;
        let processor = |person: &Person| -> ItemProcessorResult<Person> {
            if Some(person.people_id) == stop_on {
                stop_signal.cancel();
            }
            Ok(Some(person.clone()))
        };
        let writer = |items: &[Person]| -> ItemWriterResult {
            written.borrow_mut().extend_from_slice(items);
            Ok(())
        };

        let step = StepBuilder::new("jsonStep")
            .chunk::<Person, Person>(5)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()?;
        let job = JobBuilder::new().name("jsonJob").start(&step).build()?;

        JobLauncher::new(&repository).run_with_stop_signal(&job, &parameters, stop_signal.clone())
    };

    let stopped = run(CancellationToken::new(), Some(12))?;
    assert_eq!(stopped.status, BatchStatus::Stopped);
    assert_eq!(stopped.step_executions[0].status, BatchStatus::Stopped);
    // the chunk holding item 12 still commits
    assert_eq!(stopped.step_executions[0].read_count, 15);
    assert_eq!(written.borrow().len(), 15);

    let resumed = run(CancellationToken::new(), None)?;
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.job_instance.id, stopped.job_instance.id);
    assert_eq!(resumed.step_executions[0].read_count, 8);
    assert_eq!(ids(&written.borrow()), (1..=23).collect::<Vec<i64>>());
    Ok(())
}

#[test]
fn failing_sink_rolls_back_and_fails_the_step() -> Result<(), BatchError> {
    let mut file = MockFile::default();
    file.expect_write()
        .returning(|_| Err(io::Error::other("no space left on device")));
    file.expect_flush().returning(|| Ok(()));

    let reader = CsvItemReaderBuilder::with_mapper(map_person)
        .names(&PERSON_FIELDS)
        .from_path(data_path("persons.csv"))?;
    let writer = CsvItemWriterBuilder::new().from_writer(file);

    let step = StepBuilder::new("toCsv")
        .chunk::<Person, Person>(5)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .retry_limit(1)
        .build()?;
    let job = JobBuilder::new().start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.rollback_count, 2);
    assert_eq!(step_execution.write_count, 0);
    assert_eq!(step_execution.commit_count, 0);
    assert!(step_execution.execution_context.restart_position().is_none());
    Ok(())
}

#[test]
fn failed_chunk_leaves_only_committed_items_in_the_json_file() -> Result<(), BatchError> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("badges.json");

    let reader = JsonItemReaderBuilder::<Person>::new().from_path(data_path("persons.json"))?;
    let writer = JsonItemWriterBuilder::new().from_path(&output)?;
    let to_badge = |person: &Person| -> ItemProcessorResult<Badge> {
        Ok(Some(Badge {
            people_id: person.people_id,
            unprintable: person.people_id == 7,
        }))
    };

    let step = StepBuilder::new("badges")
        .chunk::<Person, Badge>(5)
        .reader(&reader)
        .processor(&to_badge)
        .writer(&writer)
        .retry_limit(1)
        .build()?;
    let job = JobBuilder::new().start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.rollback_count, 2);
    assert_eq!(step_execution.write_count, 5);

    // the document stays valid and holds the first chunk exactly once
    let written: Vec<i64> = serde_json::from_reader(std::fs::File::open(&output)?)?;
    assert_eq!(written, (1..=5).collect::<Vec<i64>>());
    Ok(())
}

#[test]
fn truncated_json_document_fails_despite_the_skip_limit() -> Result<(), BatchError> {
    let reader = JsonItemReaderBuilder::<i64>::new().from_reader("[1, 2, 3, 4".as_bytes());
    let written = RefCell::new(Vec::new());
    let writer = |items: &[i64]| -> ItemWriterResult {
        written.borrow_mut().extend_from_slice(items);
        Ok(())
    };

    let step = StepBuilder::new("truncated")
        .chunk::<i64, i64>(2)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .skip_limit(1)
        .build()?;
    let job = JobBuilder::new().start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.read_skip_count, 0);
    assert_eq!(*written.borrow(), vec![1, 2]);
    Ok(())
}
