use chunk_batch::{
    core::{
        item::PassThroughProcessor,
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::InMemoryJobRepository,
        step::StepBuilder,
    },
    item::{
        logger::LoggerWriter,
        rdbc::{FromRowMapper, RdbcCursorItemReaderBuilder},
    },
};
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
struct Person {
    people_id: i64,
    first_name: String,
    last_name: String,
    pick: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Prepare database
    let dir = tempfile::tempdir()?;
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("people.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::raw_sql(include_str!("../tests/data/people.sql"))
        .execute(&pool)
        .await?;

    // Prepare readers
    let query = "SELECT * FROM people WHERE pick = ? ORDER BY people_id";
    let row_mapper = FromRowMapper::<Person>::new();
    let red_reader = RdbcCursorItemReaderBuilder::new()
        .pool(&pool)
        .query(query)
        .add_parameter("RED")
        .row_mapper(&row_mapper)
        .build()?;
    let blue_reader = RdbcCursorItemReaderBuilder::new()
        .pool(&pool)
        .query(query)
        .add_parameter("BLUE")
        .row_mapper(&row_mapper)
        .build()?;

    // Prepare writer
    let writer = LoggerWriter::new("Read From DB");

    let red_step = StepBuilder::new("jdbcCursorStep")
        .chunk::<Person, Person>(10)
        .reader(&red_reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .build()?;
    let blue_step = StepBuilder::new("jdbcCursorStep2")
        .chunk::<Person, Person>(10)
        .reader(&blue_reader)
        .processor(&PassThroughProcessor)
        .writer(&writer)
        .build()?;

    let job = JobBuilder::new()
        .name("jdbcCursorJob")
        .start(&red_step)
        .next(&blue_step)
        .build()?;

    let repository = InMemoryJobRepository::new();
    let execution = JobLauncher::new(&repository).run(&job, &JobParameters::unique())?;

    for step_execution in &execution.step_executions {
        info!(
            "Step {} read {} people",
            step_execution.name, step_execution.read_count
        );
    }

    Ok(())
}
