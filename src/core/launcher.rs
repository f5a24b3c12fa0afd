use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::BatchError;

use super::{
    job::{Job, JobExecution},
    parameters::JobParameters,
    repository::JobRepository,
    step::{BatchStatus, StepContext},
};

/// Entry point running jobs against a [`JobRepository`].
///
/// Launching with the identifying parameters of an existing instance resumes
/// that instance: steps that completed are skipped and the others restart
/// from their last committed position.
pub struct JobLauncher<'r> {
    repository: &'r dyn JobRepository,
}

impl<'r> JobLauncher<'r> {
    pub fn new(repository: &'r dyn JobRepository) -> Self {
        Self { repository }
    }

    /// Runs `job` to its end.
    ///
    /// # Errors
    ///
    /// Only launch failures are returned: [`BatchError::Restart`] when the
    /// instance cannot be run again, [`BatchError::Repository`] when the
    /// execution cannot be created. Failures inside the job are reported by
    /// the status of the returned execution.
    pub fn run(
        &self,
        job: &dyn Job,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        self.run_with_stop_signal(job, parameters, CancellationToken::new())
    }

    /// Same as [`JobLauncher::run`], stopping at the next chunk boundary once
    /// `stop_signal` is cancelled.
    pub fn run_with_stop_signal(
        &self,
        job: &dyn Job,
        parameters: &JobParameters,
        stop_signal: CancellationToken,
    ) -> Result<JobExecution, BatchError> {
        let mut job_execution = self.repository.create_job_execution(
            job.get_name(),
            parameters,
            job.is_restartable(),
        )?;
        job_execution.status = BatchStatus::Started;
        job_execution.start_time = Some(Utc::now());
        self.repository.update_job_execution(&job_execution)?;

        let context = StepContext::new(self.repository, stop_signal);
        job.execute(&mut job_execution, &context);
        job_execution.end_time = Some(Utc::now());

        if let Err(error) = self.repository.update_job_execution(&job_execution) {
            warn!(
                "Unable to save the end of job execution {}: {}",
                job_execution.id, error
            );
            job_execution.status = BatchStatus::Failed;
            job_execution.add_failure(&error);
        }

        info!(
            "Job: [name={}] completed with the following parameters: [{}] and the following status: [{}]",
            job.get_name(),
            parameters.job_key(),
            job_execution.status
        );

        Ok(job_execution)
    }
}
