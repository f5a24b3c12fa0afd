use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::{
    job::{JobExecution, JobInstance},
    parameters::JobParameters,
    step::{BatchStatus, StepExecution},
};

/// Persistence of job instances, job executions and step executions.
///
/// Steps update their execution at every commit, so that a later run of the
/// same job instance resumes from the last committed position.
pub trait JobRepository: Send + Sync {
    /// Finds the instance matching `job_name` and the identifying `parameters`.
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError>;

    /// Creates a new execution, and the instance itself when it does not exist yet.
    ///
    /// The last execution of an existing instance is checked in the same
    /// critical section that adds the new one, so two launches of one
    /// instance never both succeed.
    ///
    /// # Errors
    ///
    /// [`BatchError::Restart`] when the last execution is still running, is
    /// COMPLETED, or ended otherwise while `restartable` is `false`.
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError>;

    fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> Result<Option<JobExecution>, BatchError>;

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    /// Most recent execution of `step_name` across every run of `job_instance`.
    fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepositoryState {
    job_instances: Vec<JobInstance>,
    job_executions: Vec<JobExecution>,
    step_executions: Vec<StepExecution>,
}

impl RepositoryState {
    fn find_instance(&self, job_name: &str, parameters: &JobParameters) -> Option<&JobInstance> {
        let job_key = parameters.job_key();
        self.job_instances
            .iter()
            .find(|instance| instance.job_name == job_name && instance.job_key == job_key)
    }

    fn check_restart(
        &self,
        job_instance: &JobInstance,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<(), BatchError> {
        let Some(last) = self.last_job_execution(job_instance) else {
            return Ok(());
        };

        match last.status {
            status if status.is_running() => Err(BatchError::Restart(format!(
                "a job execution for job {} is already running: {}",
                job_instance.job_name, last.id
            ))),
            BatchStatus::Completed => Err(BatchError::Restart(format!(
                "job instance {} already exists and is complete for parameters [{}], change the parameters to run it again",
                job_instance.job_name,
                parameters.job_key()
            ))),
            _ if !restartable => Err(BatchError::Restart(format!(
                "job instance {} already exists and is not restartable",
                job_instance.job_name
            ))),
            status => {
                info!(
                    "Restarting job {} from its last execution ended {}",
                    job_instance.job_name, status
                );
                Ok(())
            }
        }
    }

    fn create_job_execution(
        &mut self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        let job_instance = match self.find_instance(job_name, parameters) {
            Some(instance) => {
                self.check_restart(instance, parameters, restartable)?;
                instance.clone()
            }
            None => {
                let instance = JobInstance::new(job_name, parameters);
                debug!("New job instance {} for {}", instance.id, job_name);
                self.job_instances.push(instance.clone());
                instance
            }
        };

        let job_execution = JobExecution::new(job_instance, parameters.clone());
        self.job_executions.push(job_execution.clone());
        Ok(job_execution)
    }

    fn last_job_execution(&self, job_instance: &JobInstance) -> Option<&JobExecution> {
        self.job_executions
            .iter()
            .rev()
            .find(|execution| execution.job_instance.id == job_instance.id)
    }

    fn update_job_execution(&mut self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let stored = self
            .job_executions
            .iter_mut()
            .find(|execution| execution.id == job_execution.id)
            .ok_or_else(|| {
                BatchError::Repository(format!("unknown job execution {}", job_execution.id))
            })?;
        *stored = job_execution.clone();
        Ok(())
    }

    fn save_step_execution(&mut self, step_execution: &StepExecution) {
        match self
            .step_executions
            .iter_mut()
            .find(|execution| execution.id == step_execution.id)
        {
            Some(stored) => *stored = step_execution.clone(),
            None => self.step_executions.push(step_execution.clone()),
        }
    }

    fn last_step_execution(&self, job_instance: &JobInstance, step_name: &str) -> Option<&StepExecution> {
        let job_execution_ids: Vec<_> = self
            .job_executions
            .iter()
            .filter(|execution| execution.job_instance.id == job_instance.id)
            .map(|execution| execution.id)
            .collect();

        self.step_executions.iter().rev().find(|execution| {
            execution.name == step_name && job_execution_ids.contains(&execution.job_execution_id)
        })
    }
}

fn lock(state: &Mutex<RepositoryState>) -> Result<MutexGuard<'_, RepositoryState>, BatchError> {
    state
        .lock()
        .map_err(|_| BatchError::Repository("repository state is poisoned".to_string()))
}

/// Repository keeping everything in memory, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        Ok(lock(&self.state)?.find_instance(job_name, parameters).cloned())
    }

    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        lock(&self.state)?.create_job_execution(job_name, parameters, restartable)
    }

    fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock(&self.state)?.last_job_execution(job_instance).cloned())
    }

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        lock(&self.state)?.update_job_execution(job_execution)
    }

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        lock(&self.state)?.save_step_execution(step_execution);
        Ok(())
    }

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        lock(&self.state)?.save_step_execution(step_execution);
        Ok(())
    }

    fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(lock(&self.state)?
            .last_step_execution(job_instance, step_name)
            .cloned())
    }
}

/// Repository persisted as a JSON document, so restarts survive the process.
///
/// The whole document is rewritten after every change: first to a sibling
/// temporary file, then renamed over the previous version.
///
/// # Examples
///
/// ```no_run
/// use chunk_batch::core::repository::JsonFileJobRepository;
///
/// let repository = JsonFileJobRepository::open("target/batch-repository.json").unwrap();
/// ```
#[derive(Debug)]
pub struct JsonFileJobRepository {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl JsonFileJobRepository {
    /// Opens the repository stored at `path`, starting empty when the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            RepositoryState::default()
        };

        debug!(
            "Job repository {} opened with {} job instance(s)",
            path.display(),
            state.job_instances.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &RepositoryState) -> Result<(), BatchError> {
        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        let mut writer = BufWriter::new(File::create(&temporary)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temporary, &self.path)?;
        Ok(())
    }

    /// Applies `change` to a copy of the state, which replaces the current
    /// state only once written to disk.
    fn modify<T>(
        &self,
        change: impl FnOnce(&mut RepositoryState) -> Result<T, BatchError>,
    ) -> Result<T, BatchError> {
        let mut state = lock(&self.state)?;
        let mut next = state.clone();
        let result = change(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(result)
    }
}

impl JobRepository for JsonFileJobRepository {
    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        Ok(lock(&self.state)?.find_instance(job_name, parameters).cloned())
    }

    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        self.modify(|state| state.create_job_execution(job_name, parameters, restartable))
    }

    fn get_last_job_execution(
        &self,
        job_instance: &JobInstance,
    ) -> Result<Option<JobExecution>, BatchError> {
        Ok(lock(&self.state)?.last_job_execution(job_instance).cloned())
    }

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        self.modify(|state| state.update_job_execution(job_execution))
    }

    fn add_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.modify(|state| {
            state.save_step_execution(step_execution);
            Ok(())
        })
    }

    fn update_step_execution(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.modify(|state| {
            state.save_step_execution(step_execution);
            Ok(())
        })
    }

    fn get_last_step_execution(
        &self,
        job_instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        Ok(lock(&self.state)?
            .last_step_execution(job_instance, step_name)
            .cloned())
    }
}
