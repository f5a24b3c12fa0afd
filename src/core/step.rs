use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::BatchError;

use super::{
    chunk::Chunk,
    context::ExecutionContext,
    item::{ItemProcessor, ItemReader, ItemWriter},
    policy::{LimitCheckingSkipPolicy, SkipPolicy},
    repository::JobRepository,
};

/// Lifecycle status shared by job and step executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /**
     * Status of a batch execution prior to its execution.
     */
    Starting,
    /**
     * Status of a batch execution that is running.
     */
    Started,
    /**
     * The batch execution has successfully completed.
     */
    Completed,
    /**
     * Status of a batch execution that has failed.
     */
    Failed,
    /**
     * Status of a batch execution that has been stopped by request.
     */
    Stopped,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    /// `true` for the statuses a restart can resume from.
    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// One run of a step within a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Job execution this step execution belongs to
    pub job_execution_id: Uuid,
    /// Name of the executed step
    pub name: String,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Number of items successfully read and committed
    pub read_count: usize,
    /// Number of items written by committed chunks
    pub write_count: usize,
    /// Number of committed chunks (or tasklet invocations)
    pub commit_count: usize,
    /// Number of failed chunk writes
    pub rollback_count: usize,
    /// Number of items the processor filtered out
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    /// Restart state, persisted at every commit
    pub execution_context: ExecutionContext,
    pub failure_exceptions: Vec<String>,
}

impl StepExecution {
    pub fn new(name: &str, job_execution_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_execution_id,
            name: name.to_string(),
            status: BatchStatus::Starting,
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            rollback_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            execution_context: ExecutionContext::new(),
            failure_exceptions: Vec::new(),
        }
    }

    /// New execution resuming from the state `previous` last committed.
    pub fn restart_from(previous: &StepExecution, job_execution_id: Uuid) -> Self {
        let mut step_execution = Self::new(&previous.name, job_execution_id);
        step_execution.execution_context = previous.execution_context.clone();
        step_execution
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }

    fn mark_started(&mut self) {
        self.status = BatchStatus::Started;
        self.start_time = Some(Utc::now());
    }

    fn mark_ended(&mut self, status: BatchStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    fn add_failure(&mut self, error: &BatchError) {
        self.failure_exceptions.push(error.to_string());
    }

    fn apply(&mut self, contribution: &ChunkContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.commit_count += 1;
    }
}

/// Collaborators handed to a step for the duration of one execution.
pub struct StepContext<'r> {
    repository: &'r dyn JobRepository,
    stop_signal: CancellationToken,
}

impl<'r> StepContext<'r> {
    pub fn new(repository: &'r dyn JobRepository, stop_signal: CancellationToken) -> Self {
        Self {
            repository,
            stop_signal,
        }
    }

    pub fn repository(&self) -> &'r dyn JobRepository {
        self.repository
    }

    /// `true` once an external stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_signal.is_cancelled()
    }
}

/// A named phase of a job.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step, recording progress and the final status in `step_execution`.
    ///
    /// # Returns
    /// - `Ok(())` when the step ended COMPLETED or STOPPED
    /// - `Err(BatchError)` when the step ended FAILED
    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError>;
}

/// Counts gathered while a chunk is in flight.
///
/// They are applied to the step execution only when the chunk commits, so a
/// rolled back chunk leaves no trace in the counts.
#[derive(Debug, Default)]
struct ChunkContribution {
    read_count: usize,
    write_count: usize,
    filter_count: usize,
    read_skip_count: usize,
    process_skip_count: usize,
}

impl ChunkContribution {
    fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }

    fn has_consumed_input(&self) -> bool {
        self.read_count + self.read_skip_count > 0
    }
}

/// Step reading, processing and writing items chunk by chunk.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of items read per commit
    chunk_size: usize,
    skip_policy: Box<dyn SkipPolicy + 'a>,
    /// Additional attempts granted to a failed chunk write
    retry_limit: usize,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        step_execution.mark_started();
        info!("Start of step: {}, id: {}", self.name, step_execution.id);

        let result = self
            .open_streams(step_execution)
            .and_then(|_| self.process_chunks(step_execution, context));

        self.close_streams();

        let status = match result {
            Ok(status) => status,
            Err(error) => {
                error!("Step {} failed: {}", self.name, error);
                step_execution.add_failure(&error);
                BatchStatus::Failed
            }
        };

        step_execution.mark_ended(status);
        if let Err(error) = context.repository().update_step_execution(step_execution) {
            error!("Unable to save step execution {}: {}", step_execution.id, error);
            step_execution.add_failure(&error);
            step_execution.status = BatchStatus::Failed;
        }

        info!(
            "End of step: {}, id: {}, status: {}",
            self.name, step_execution.id, step_execution.status
        );

        if step_execution.status == BatchStatus::Failed {
            Err(BatchError::Step(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn open_streams(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.reader.open(&step_execution.execution_context)?;
        self.writer.open()
    }

    fn close_streams(&self) {
        Self::manage_error(self.reader.close());
        Self::manage_error(self.writer.close());
    }

    /// Runs chunk cycles until the reader is exhausted or a stop is requested.
    fn process_chunks(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if context.is_stop_requested() {
                info!("Stop requested, step {} stops before next chunk", self.name);
                return Ok(BatchStatus::Stopped);
            }

            let mut contribution = ChunkContribution::default();

            let chunk = self.read_chunk(step_execution, &mut contribution)?;

            if contribution.has_consumed_input() {
                let processed_items =
                    self.process_chunk(step_execution, &mut contribution, chunk.get_items())?;

                self.write_chunk(step_execution, &processed_items)?;
                contribution.write_count = processed_items.len();

                self.commit(step_execution, context, &contribution)?;
            }

            if chunk.is_finished() {
                return Ok(BatchStatus::Completed);
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// # Returns
    /// - `Ok(chunk)`: a full chunk, or a finished one when the reader is exhausted
    /// - `Err(BatchError)`: a read error the skip policy refused to skip
    fn read_chunk(
        &self,
        step_execution: &StepExecution,
        contribution: &mut ChunkContribution,
    ) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");

        let mut chunk = Chunk::new(self.chunk_size);

        while !chunk.is_full() {
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.add_item(item);
                    contribution.read_count += 1;
                }
                Ok(None) => {
                    debug!("End reading chunk: FINISHED");
                    chunk.mark_finished();
                    break;
                }
                Err(error) => {
                    let skip_count = step_execution.skip_count() + contribution.skip_count();
                    if self.skip_policy.should_skip(&error, skip_count) {
                        warn!("Skipping item after read error: {}", error);
                        contribution.read_skip_count += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Ok(chunk)
    }

    /// Applies the processor to each item of the chunk.
    ///
    /// Filtered items and skipped failures are removed from the output; the
    /// other items of the chunk are kept.
    fn process_chunk(
        &self,
        step_execution: &StepExecution,
        contribution: &mut ChunkContribution,
        read_items: &[I],
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", read_items.len());
        let mut result = Vec::with_capacity(read_items.len());

        for item in read_items {
            match self.processor.process(item) {
                Ok(Some(processed_item)) => result.push(processed_item),
                Ok(None) => contribution.filter_count += 1,
                Err(error) => {
                    let skip_count = step_execution.skip_count() + contribution.skip_count();
                    if self.skip_policy.should_skip(&error, skip_count) {
                        warn!("Skipping item after processing error: {}", error);
                        contribution.process_skip_count += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Writes and flushes the chunk, retrying the identical items on failure.
    fn write_chunk(
        &self,
        step_execution: &mut StepExecution,
        processed_items: &[O],
    ) -> Result<(), BatchError> {
        if processed_items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        debug!("Writing chunk of {} items", processed_items.len());

        let mut attempt = 0;
        loop {
            let result = self
                .writer
                .write(processed_items)
                .and_then(|_| self.writer.flush());

            match result {
                Ok(()) => return Ok(()),
                Err(error) => {
                    step_execution.rollback_count += 1;
                    if attempt >= self.retry_limit {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!(
                        "Error writing items: {}, retry {}/{}",
                        error, attempt, self.retry_limit
                    );
                }
            }
        }
    }

    /// Saves the counts and reader position of the chunk, which only reach
    /// `step_execution` once the repository accepted them.
    fn commit(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
        contribution: &ChunkContribution,
    ) -> Result<(), BatchError> {
        let mut committed = step_execution.clone();
        committed.apply(contribution);
        committed
            .execution_context
            .set_restart_position(self.reader.current_position());

        context.repository().update_step_execution(&committed)?;

        debug!(
            "Commit #{} of step {}: read={}, write={}, skip={}",
            committed.commit_count,
            self.name,
            committed.read_count,
            committed.write_count,
            committed.skip_count()
        );
        *step_execution = committed;
        Ok(())
    }

    /// Logs errors of operations that must not fail the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

/// Outcome of one tasklet invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet wants to be invoked again.
    Continuable,
    /// The tasklet is done.
    Finished,
}

/// Single imperative unit of work, invoked until it reports [`RepeatStatus::Finished`].
pub trait Tasklet {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

pub struct TaskletStep<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
}

impl Step for TaskletStep<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        step_execution.mark_started();
        info!("Start of step: {}, id: {}", self.name, step_execution.id);

        let status = loop {
            if context.is_stop_requested() {
                info!("Stop requested, tasklet step {} stops", self.name);
                break BatchStatus::Stopped;
            }

            let repeat_status = match self.tasklet.execute(step_execution) {
                Ok(repeat_status) => repeat_status,
                Err(error) => {
                    error!("Tasklet of step {} failed: {}", self.name, error);
                    step_execution.add_failure(&error);
                    break BatchStatus::Failed;
                }
            };

            let mut committed = step_execution.clone();
            committed.commit_count += 1;
            if let Err(error) = context.repository().update_step_execution(&committed) {
                step_execution.add_failure(&error);
                break BatchStatus::Failed;
            }
            *step_execution = committed;

            if repeat_status == RepeatStatus::Finished {
                break BatchStatus::Completed;
            }
        };

        step_execution.mark_ended(status);
        if let Err(error) = context.repository().update_step_execution(step_execution) {
            step_execution.add_failure(&error);
            step_execution.status = BatchStatus::Failed;
        }

        info!(
            "End of step: {}, id: {}, status: {}",
            self.name, step_execution.id, step_execution.status
        );

        if step_execution.status == BatchStatus::Failed {
            Err(BatchError::Step(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn build(self) -> TaskletStep<'a> {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_limit: usize,
    skip_policy: Option<Box<dyn SkipPolicy + 'a>>,
    retry_limit: usize,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
            skip_policy: None,
            retry_limit: 0,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Number of read or process failures tolerated before the step fails.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Replaces the limit-based skip policy.
    pub fn skip_policy(mut self, skip_policy: impl SkipPolicy + 'a) -> Self {
        self.skip_policy = Some(Box::new(skip_policy));
        self
    }

    /// Number of times a failed chunk write is attempted again.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be at least 1",
                self.name
            )));
        }

        let missing = |part: &str| {
            BatchError::Configuration(format!("{} is required for building step {}", part, self.name))
        };
        let reader = self.reader.ok_or_else(|| missing("reader"))?;
        let processor = self.processor.ok_or_else(|| missing("processor"))?;
        let writer = self.writer.ok_or_else(|| missing("writer"))?;

        let skip_policy = match self.skip_policy {
            Some(skip_policy) => skip_policy,
            None => Box::new(LimitCheckingSkipPolicy::new(self.skip_limit)),
        };

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            chunk_size: self.chunk_size,
            skip_policy,
            retry_limit: self.retry_limit,
        })
    }
}

/// Entry point for building steps.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::item::{ItemWriterResult, PassThroughProcessor};
/// use chunk_batch::core::step::StepBuilder;
/// use chunk_batch::item::list::ListItemReader;
///
/// let reader = ListItemReader::new(vec![1, 2, 3]);
/// let writer = |items: &[i32]| -> ItemWriterResult {
///     println!("length = {}", items.len());
///     Ok(())
/// };
///
/// let step = StepBuilder::new("numbers")
///     .chunk::<i32, i32>(2)
///     .reader(&reader)
///     .processor(&PassThroughProcessor)
///     .writer(&writer)
///     .build()
///     .unwrap();
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn tasklet(self, tasklet: &dyn Tasklet) -> TaskletStepBuilder<'_> {
        TaskletStepBuilder {
            name: self.name,
            tasklet,
        }
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
