pub mod common;

use std::cell::Cell;

use chunk_batch::{
    core::{
        item::{ItemProcessorResult, PassThroughProcessor},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::InMemoryJobRepository,
        step::{BatchStatus, RepeatStatus, StepBuilder, StepExecution, Tasklet},
    },
    item::{list::ListItemReader, logger::LoggerWriter},
    BatchError,
};

/// Counts up to `limit`, keeping the counter in the step's execution context.
struct CountingTasklet {
    limit: u32,
}

impl Tasklet for CountingTasklet {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        let count = step_execution
            .execution_context
            .get::<u32>("count")?
            .unwrap_or(0)
            + 1;
        step_execution.execution_context.put("count", count)?;

        if count < self.limit {
            Ok(RepeatStatus::Continuable)
        } else {
            Ok(RepeatStatus::Finished)
        }
    }
}

struct RecordingTasklet {
    runs: Cell<usize>,
}

impl RecordingTasklet {
    fn new() -> Self {
        Self { runs: Cell::new(0) }
    }
}

impl Tasklet for RecordingTasklet {
    fn execute(&self, _step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        self.runs.set(self.runs.get() + 1);
        Ok(RepeatStatus::Finished)
    }
}

#[test]
fn first_batch_counts_to_five() -> Result<(), BatchError> {
    common::init_logger();
    let tasklet = CountingTasklet { limit: 5 };
    let step = StepBuilder::new("firstStep").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("firstJob").start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::new())?;

    let step_execution = &execution.step_executions[0];
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(step_execution.commit_count, 5);
    assert_eq!(step_execution.execution_context.get::<u32>("count")?, Some(5));
    assert!(execution.start_time.is_some());
    assert!(execution.end_time >= execution.start_time);
    Ok(())
}

#[test]
fn failed_step_branches_to_a_recovery_step() -> Result<(), BatchError> {
    let reader = ListItemReader::new((1..=6).collect::<Vec<u32>>());
    let poisoned = |item: &u32| -> ItemProcessorResult<u32> {
        if *item == 4 {
            Err(BatchError::ItemProcessor("item 4 is corrupted".to_string()))
        } else {
            Ok(Some(*item))
        }
    };
    let logger = LoggerWriter::default();
    let load = StepBuilder::new("load")
        .chunk::<u32, u32>(3)
        .reader(&reader)
        .processor(&poisoned)
        .writer(&logger)
        .build()?;

    let recovery = RecordingTasklet::new();
    let report = RecordingTasklet::new();
    let recovery_step = StepBuilder::new("recovery").tasklet(&recovery).build();
    let report_step = StepBuilder::new("report").tasklet(&report).build();

    let job = JobBuilder::new()
        .name("branchingJob")
        .start(&load)
        .on(BatchStatus::Failed)
        .to(&recovery_step)
        .from(&load)
        .next(&report_step)
        .build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(recovery.runs.get(), 1);
    assert_eq!(report.runs.get(), 0);
    let load_execution = execution
        .get_step_execution("load")
        .ok_or_else(|| BatchError::Step("load".to_string()))?;
    assert_eq!(load_execution.status, BatchStatus::Failed);
    assert_eq!(load_execution.write_count, 3);
    Ok(())
}

#[test]
fn failure_without_transition_fails_the_job() -> Result<(), BatchError> {
    struct BrokenTasklet;

    impl Tasklet for BrokenTasklet {
        fn execute(&self, _: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
            Err(BatchError::Step("remote share unavailable".to_string()))
        }
    }

    let after = RecordingTasklet::new();
    let broken_step = StepBuilder::new("broken").tasklet(&BrokenTasklet).build();
    let after_step = StepBuilder::new("after").tasklet(&after).build();

    let job = JobBuilder::new()
        .start(&broken_step)
        .next(&after_step)
        .prevent_restart()
        .build()?;

    let repository = InMemoryJobRepository::new();
    let launcher = JobLauncher::new(&repository);
    let parameters = JobParameters::new().add_long("run", 1);

    let execution = launcher.run(&job, &parameters)?;
    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.step_executions.len(), 1);
    assert_eq!(after.runs.get(), 0);

    assert!(matches!(
        launcher.run(&job, &parameters),
        Err(BatchError::Restart(_))
    ));
    Ok(())
}

#[test]
fn wildcard_transition_ends_the_job() -> Result<(), BatchError> {
    let reader = ListItemReader::new(vec!["a", "b"]);
    let logger = LoggerWriter::new("letters");
    let letters = StepBuilder::new("letters")
        .chunk::<&str, &str>(1)
        .reader(&reader)
        .processor(&PassThroughProcessor)
        .writer(&logger)
        .build()?;
    let skipped = RecordingTasklet::new();
    let skipped_step = StepBuilder::new("skipped").tasklet(&skipped).build();

    let job = JobBuilder::new()
        .start(&letters)
        .on_any()
        .end()
        .from(&letters)
        .next(&skipped_step)
        .build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    // the COMPLETED transition added by `next` is more specific than the wildcard
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(skipped.runs.get(), 1);
    assert_eq!(execution.step_executions[0].commit_count, 2);
    Ok(())
}
