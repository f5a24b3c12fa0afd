use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    context::ExecutionContext,
    parameters::JobParameters,
    step::{BatchStatus, Step, StepContext, StepExecution},
};

/// Logical invocation of a job: a job name plus its identifying parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    /// Canonical form of the identifying parameters, see [`JobParameters::job_key`]
    pub job_key: String,
}

impl JobInstance {
    pub fn new(job_name: &str, parameters: &JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            job_key: parameters.job_key(),
        }
    }
}

/// One physical run attempt of a [`JobInstance`].
///
/// The launcher returns it once the job is over; callers inspect `status`
/// and the counts of `step_executions` instead of catching errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_instance: JobInstance,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Step executions of this run, in execution order
    pub step_executions: Vec<StepExecution>,
    pub execution_context: ExecutionContext,
    pub failure_exceptions: Vec<String>,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new(),
            failure_exceptions: Vec::new(),
        }
    }

    /// Last execution of the step named `name` within this run.
    pub fn get_step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.name == name)
    }

    pub fn add_failure(&mut self, error: &BatchError) {
        self.failure_exceptions.push(error.to_string());
    }
}

/// A job: a flow of steps driven by their outcome.
pub trait Job {
    fn get_name(&self) -> &str;

    /// `false` when a failed or stopped instance must not be launched again.
    fn is_restartable(&self) -> bool {
        true
    }

    /// Runs the flow, recording every outcome in `job_execution`.
    ///
    /// Step failures never escape as errors: they end up in the status of
    /// the job execution and of its step executions.
    fn execute(&self, job_execution: &mut JobExecution, context: &StepContext);
}

/// Matches the status a step ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPattern {
    Status(BatchStatus),
    Any,
}

impl StatusPattern {
    fn matches(&self, status: BatchStatus) -> bool {
        match self {
            StatusPattern::Status(expected) => *expected == status,
            StatusPattern::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowTarget {
    Step(usize),
    End,
    Fail,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    pattern: StatusPattern,
    target: FlowTarget,
}

struct FlowNode<'a> {
    step: &'a dyn Step,
    transitions: Vec<Transition>,
}

impl FlowNode<'_> {
    /// Exact status transitions win over wildcards; without any match the
    /// step status decides how the job ends.
    fn resolve(&self, status: BatchStatus) -> FlowTarget {
        let exact = self.transitions.iter().find(|transition| {
            transition.pattern != StatusPattern::Any && transition.pattern.matches(status)
        });
        let wildcard = self
            .transitions
            .iter()
            .find(|transition| transition.pattern == StatusPattern::Any);

        match exact.or(wildcard) {
            Some(transition) => transition.target,
            None => match status {
                BatchStatus::Completed => FlowTarget::End,
                BatchStatus::Stopped => FlowTarget::Stop,
                _ => FlowTarget::Fail,
            },
        }
    }
}

/// Job running a flow of steps, built with [`JobBuilder`].
pub struct SimpleJob<'a> {
    name: String,
    nodes: Vec<FlowNode<'a>>,
    restartable: bool,
}

impl Job for SimpleJob<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn execute(&self, job_execution: &mut JobExecution, context: &StepContext) {
        info!("Start of job: {}, id: {}", self.name, job_execution.id);

        let mut index = 0;
        let status = loop {
            if context.is_stop_requested() {
                info!("Stop requested, job {} does not start further steps", self.name);
                break BatchStatus::Stopped;
            }

            let node = &self.nodes[index];
            let step_status = match self.handle_step(node.step, job_execution, context) {
                Ok(step_status) => step_status,
                Err(error) => {
                    warn!("Unable to run step {}: {}", node.step.get_name(), error);
                    job_execution.add_failure(&error);
                    break BatchStatus::Failed;
                }
            };

            if step_status == BatchStatus::Stopped && context.is_stop_requested() {
                break BatchStatus::Stopped;
            }

            match node.resolve(step_status) {
                FlowTarget::Step(next) => {
                    debug!(
                        "Transition {} -> {} on {}",
                        node.step.get_name(),
                        self.nodes[next].step.get_name(),
                        step_status
                    );
                    index = next;
                }
                FlowTarget::End => break BatchStatus::Completed,
                FlowTarget::Fail => break BatchStatus::Failed,
                FlowTarget::Stop => break BatchStatus::Stopped,
            }
        };

        job_execution.status = status;

        info!(
            "End of job: {}, id: {}, status: {}",
            self.name, job_execution.id, status
        );
    }
}

impl SimpleJob<'_> {
    /// Runs one step, or reuses the outcome of an earlier run that completed it.
    fn handle_step(
        &self,
        step: &dyn Step,
        job_execution: &mut JobExecution,
        context: &StepContext,
    ) -> Result<BatchStatus, BatchError> {
        let repository = context.repository();
        let last = repository.get_last_step_execution(&job_execution.job_instance, step.get_name())?;

        let mut step_execution = match last {
            Some(last) if last.job_execution_id != job_execution.id => {
                if last.status == BatchStatus::Completed {
                    info!(
                        "Step already complete or not restartable, so no action to execute: {}",
                        step.get_name()
                    );
                    return Ok(BatchStatus::Completed);
                }
                info!(
                    "Restarting step {} from its last committed position",
                    step.get_name()
                );
                StepExecution::restart_from(&last, job_execution.id)
            }
            _ => StepExecution::new(step.get_name(), job_execution.id),
        };

        repository.add_step_execution(&step_execution)?;

        if let Err(error) = step.execute(&mut step_execution, context) {
            debug!("Step {} reported: {}", step.get_name(), error);
        }

        let status = step_execution.status;
        job_execution.step_executions.push(step_execution);
        Ok(status)
    }
}

/// Builder for creating a job.
///
/// Steps are identified by name inside one job. `start` and `next` chain steps
/// on COMPLETED; `on(..)` adds conditional transitions from the current step
/// and `from(..)` moves back to an earlier step to add more of them.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::job::JobBuilder;
/// use chunk_batch::core::step::{BatchStatus, RepeatStatus, StepBuilder, StepExecution, Tasklet};
/// use chunk_batch::BatchError;
///
/// struct Noop;
/// impl Tasklet for Noop {
///     fn execute(&self, _: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
///         Ok(RepeatStatus::Finished)
///     }
/// }
///
/// let load = StepBuilder::new("load").tasklet(&Noop).build();
/// let report = StepBuilder::new("report").tasklet(&Noop).build();
/// let cleanup = StepBuilder::new("cleanup").tasklet(&Noop).build();
///
/// let job = JobBuilder::new()
///     .name("nightly")
///     .start(&load)
///     .on(BatchStatus::Failed)
///     .to(&cleanup)
///     .from(&load)
///     .next(&report)
///     .prevent_restart()
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    nodes: Vec<FlowNode<'a>>,
    /// Step new transitions start from
    current: Option<usize>,
    restartable: bool,
    errors: Vec<String>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            nodes: Vec::new(),
            current: None,
            restartable: true,
            errors: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        let index = self.node_index(step);
        self.current = Some(index);
        self
    }

    /// Runs `step` once the current step COMPLETED.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        let index = self.node_index(step);
        if let Some(current) = self.current {
            self.nodes[current].transitions.push(Transition {
                pattern: StatusPattern::Status(BatchStatus::Completed),
                target: FlowTarget::Step(index),
            });
        }
        self.current = Some(index);
        self
    }

    /// Starts a transition taken when the current step ends with `status`.
    pub fn on(self, status: BatchStatus) -> TransitionBuilder<'a> {
        TransitionBuilder {
            builder: self,
            pattern: StatusPattern::Status(status),
        }
    }

    /// Starts a transition taken whatever the current step ends with.
    pub fn on_any(self) -> TransitionBuilder<'a> {
        TransitionBuilder {
            builder: self,
            pattern: StatusPattern::Any,
        }
    }

    /// Makes `step` the source of the next transitions.
    pub fn from(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        let index = self.node_index(step);
        self.current = Some(index);
        self
    }

    /// Marks the job single-attempt: a failed or stopped instance is never resumed.
    pub fn prevent_restart(mut self) -> JobBuilder<'a> {
        self.restartable = false;
        self
    }

    pub fn build(self) -> Result<SimpleJob<'a>, BatchError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(BatchError::Configuration(error));
        }
        if self.nodes.is_empty() {
            return Err(BatchError::Configuration(
                "a job needs at least one step".to_string(),
            ));
        }

        Ok(SimpleJob {
            name: self.name.unwrap_or_else(build_name),
            nodes: self.nodes,
            restartable: self.restartable,
        })
    }

    fn node_index(&mut self, step: &'a dyn Step) -> usize {
        if let Some(index) = self
            .nodes
            .iter()
            .position(|node| node.step.get_name() == step.get_name())
        {
            return index;
        }
        self.nodes.push(FlowNode {
            step,
            transitions: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn add_transition(mut self, pattern: StatusPattern, target: FlowTarget) -> JobBuilder<'a> {
        match self.current {
            Some(current) => self.nodes[current]
                .transitions
                .push(Transition { pattern, target }),
            None => self
                .errors
                .push("a transition needs a source step, call start() first".to_string()),
        }
        self
    }
}

/// Second half of a conditional transition, see [`JobBuilder::on`].
pub struct TransitionBuilder<'a> {
    builder: JobBuilder<'a>,
    pattern: StatusPattern,
}

impl<'a> TransitionBuilder<'a> {
    /// Continues with `step`, which becomes the current step.
    pub fn to(self, step: &'a dyn Step) -> JobBuilder<'a> {
        let mut builder = self.builder;
        let index = builder.node_index(step);
        let mut builder = builder.add_transition(self.pattern, FlowTarget::Step(index));
        builder.current = Some(index);
        builder
    }

    /// Ends the job COMPLETED.
    pub fn end(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, FlowTarget::End)
    }

    /// Ends the job FAILED.
    pub fn fail(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, FlowTarget::Fail)
    }

    /// Ends the job STOPPED, so that it can be restarted.
    pub fn stop(self) -> JobBuilder<'a> {
        self.builder.add_transition(self.pattern, FlowTarget::Stop)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::core::{
        repository::{InMemoryJobRepository, JobRepository},
        step::{RepeatStatus, StepBuilder, Tasklet},
    };

    struct ScriptedTasklet {
        fail: bool,
        calls: Cell<usize>,
    }

    impl ScriptedTasklet {
        fn succeeding() -> Self {
            Self {
                fail: false,
                calls: Cell::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: Cell::new(0),
            }
        }
    }

    impl Tasklet for ScriptedTasklet {
        fn execute(&self, _: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(BatchError::Step("scripted failure".to_string()))
            } else {
                Ok(RepeatStatus::Finished)
            }
        }
    }

    fn run_job(job: &dyn Job, repository: &InMemoryJobRepository) -> JobExecution {
        let parameters = JobParameters::unique();
        let mut job_execution = repository
            .create_job_execution(job.get_name(), &parameters, true)
            .unwrap();
        let context = StepContext::new(repository, CancellationToken::new());
        job.execute(&mut job_execution, &context);
        job_execution
    }

    #[test]
    fn steps_run_in_sequence() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let first = ScriptedTasklet::succeeding();
        let second = ScriptedTasklet::succeeding();
        let first_step = StepBuilder::new("first").tasklet(&first).build();
        let second_step = StepBuilder::new("second").tasklet(&second).build();

        let job = JobBuilder::new()
            .name("sequence")
            .start(&first_step)
            .next(&second_step)
            .build()?;

        let job_execution = run_job(&job, &repository);

        assert_eq!(job_execution.status, BatchStatus::Completed);
        let names: Vec<&str> = job_execution
            .step_executions
            .iter()
            .map(|step_execution| step_execution.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn failed_step_halts_downstream_steps() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let first = ScriptedTasklet::failing();
        let second = ScriptedTasklet::succeeding();
        let first_step = StepBuilder::new("first").tasklet(&first).build();
        let second_step = StepBuilder::new("second").tasklet(&second).build();

        let job = JobBuilder::new()
            .start(&first_step)
            .next(&second_step)
            .build()?;

        let job_execution = run_job(&job, &repository);

        assert_eq!(job_execution.status, BatchStatus::Failed);
        assert_eq!(second.calls.get(), 0);
        assert_eq!(job_execution.step_executions.len(), 1);
        assert_eq!(
            job_execution.get_step_execution("first").map(|s| s.status),
            Some(BatchStatus::Failed)
        );
        Ok(())
    }

    #[test]
    fn failed_step_can_branch_to_a_recovery_step() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let load = ScriptedTasklet::failing();
        let report = ScriptedTasklet::succeeding();
        let cleanup = ScriptedTasklet::succeeding();
        let load_step = StepBuilder::new("load").tasklet(&load).build();
        let report_step = StepBuilder::new("report").tasklet(&report).build();
        let cleanup_step = StepBuilder::new("cleanup").tasklet(&cleanup).build();

        let job = JobBuilder::new()
            .start(&load_step)
            .on(BatchStatus::Failed)
            .to(&cleanup_step)
            .from(&load_step)
            .next(&report_step)
            .build()?;

        let job_execution = run_job(&job, &repository);

        assert_eq!(job_execution.status, BatchStatus::Completed);
        assert_eq!(cleanup.calls.get(), 1);
        assert_eq!(report.calls.get(), 0);
        Ok(())
    }

    #[test]
    fn exact_status_wins_over_wildcard() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let load = ScriptedTasklet::succeeding();
        let audit = ScriptedTasklet::succeeding();
        let load_step = StepBuilder::new("load").tasklet(&load).build();
        let audit_step = StepBuilder::new("audit").tasklet(&audit).build();

        let job = JobBuilder::new()
            .start(&load_step)
            .on_any()
            .to(&audit_step)
            .from(&load_step)
            .on(BatchStatus::Completed)
            .fail()
            .build()?;

        let job_execution = run_job(&job, &repository);

        assert_eq!(job_execution.status, BatchStatus::Failed);
        assert_eq!(audit.calls.get(), 0);
        Ok(())
    }

    #[test]
    fn stop_request_prevents_any_step() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let tasklet = ScriptedTasklet::succeeding();
        let step = StepBuilder::new("only").tasklet(&tasklet).build();
        let job = JobBuilder::new().start(&step).build()?;

        let mut job_execution =
            repository.create_job_execution("stopped", &JobParameters::new(), true)?;
        let stop_signal = CancellationToken::new();
        stop_signal.cancel();
        job.execute(&mut job_execution, &StepContext::new(&repository, stop_signal));

        assert_eq!(job_execution.status, BatchStatus::Stopped);
        assert_eq!(tasklet.calls.get(), 0);
        Ok(())
    }

    #[test]
    fn builder_rejects_empty_jobs_and_dangling_transitions() {
        assert!(matches!(
            JobBuilder::new().name("empty").build(),
            Err(BatchError::Configuration(_))
        ));
        assert!(matches!(
            JobBuilder::new().on_any().end().build(),
            Err(BatchError::Configuration(_))
        ));
    }

    #[test]
    fn unnamed_jobs_get_a_generated_name() -> Result<(), BatchError> {
        let tasklet = ScriptedTasklet::succeeding();
        let step = StepBuilder::new("only").tasklet(&tasklet).build();
        let job = JobBuilder::new().start(&step).prevent_restart().build()?;

        assert_eq!(job.get_name().len(), 8);
        assert!(!job.is_restartable());
        Ok(())
    }
}
