use std::cell::Cell;

use chunk_batch::{
    core::{
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::InMemoryJobRepository,
        step::{RepeatStatus, StepBuilder, StepExecution, Tasklet},
    },
    error::BatchError,
};
use log::info;

struct CounterTasklet {
    count: Cell<u32>,
    limit: u32,
}

impl Tasklet for CounterTasklet {
    fn execute(&self, _step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        let count = self.count.get() + 1;
        self.count.set(count);
        info!("Hello world from tasklet, count = {}", count);

        if count < self.limit {
            Ok(RepeatStatus::Continuable)
        } else {
            Ok(RepeatStatus::Finished)
        }
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let tasklet = CounterTasklet {
        count: Cell::new(0),
        limit: 5,
    };
    let step = StepBuilder::new("firstStep").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("firstJob").start(&step).build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    info!("Job ended with status {}", execution.status);

    Ok(())
}
