use chunk_batch::{
    core::{
        item::{ItemProcessorResult, PassThroughProcessor},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::JobParameters,
        repository::InMemoryJobRepository,
        step::{BatchStatus, StepBuilder},
    },
    item::{
        logger::LoggerWriter,
        rdbc::{
            DatabaseItemBinder, FromRowMapper, PagingQueryProvider,
            RdbcOffsetPagingItemReaderBuilder, RdbcPagingItemReaderBuilder, SqliteItemWriter,
        },
    },
};
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::{query_builder::Separated, sqlite::SqliteConnectOptions, FromRow, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
struct Person {
    people_id: i64,
    first_name: String,
    last_name: String,
    pick: String,
}

struct PersonBinder;

impl DatabaseItemBinder<Person, Sqlite> for PersonBinder {
    fn bind(&self, item: &Person, mut query_builder: Separated<Sqlite, &str>) {
        query_builder.push_bind(item.people_id);
        query_builder.push_bind(item.first_name.clone());
        query_builder.push_bind(item.last_name.clone());
        query_builder.push_bind(item.pick.clone());
    }
}

fn upper_case(person: &Person) -> ItemProcessorResult<Person> {
    Ok(Some(Person {
        last_name: person.last_name.to_uppercase(),
        ..person.clone()
    }))
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

    let row_mapper = FromRowMapper::<Person>::new();

    // Keyset pagination: each page starts after the last people_id read
    let paging_reader = RdbcPagingItemReaderBuilder::new()
        .pool(&pool)
        .query_provider(
            PagingQueryProvider::new("select *", "from people", "people_id")
                .where_clause("pick = :pick"),
        )
        .parameter("pick", "RED")
        .page_size(10)
        .row_mapper(&row_mapper)
        .build()?;

    let binder = PersonBinder;
    let archive_writer = SqliteItemWriter::<Person>::new()
        .pool(&pool)
        .table("people_archive")
        .add_column("people_id")
        .add_column("first_name")
        .add_column("last_name")
        .add_column("pick")
        .item_binder(&binder);

    let archive_step = StepBuilder::new("jdbcPagingStep")
        .chunk::<Person, Person>(10)
        .reader(&paging_reader)
        .processor(&upper_case)
        .writer(&archive_writer)
        .build()?;

    // Offset pagination over the archive
    let offset_reader = RdbcOffsetPagingItemReaderBuilder::new()
        .pool(&pool)
        .query("SELECT * FROM people_archive ORDER BY people_id")
        .page_size(5)
        .row_mapper(&row_mapper)
        .build()?;
    let logger = LoggerWriter::new("Read From Archive");

    let log_step = StepBuilder::new("logArchiveStep")
        .chunk::<Person, Person>(5)
        .reader(&offset_reader)
        .processor(&PassThroughProcessor)
        .writer(&logger)
        .build()?;

    let job = JobBuilder::new()
        .name("jdbcPagingJob")
        .start(&archive_step)
        .next(&log_step)
        .build()?;

    let repository = InMemoryJobRepository::new();
    let parameters = JobParameters::new().add_string("pick", "RED");
    let execution = JobLauncher::new(&repository).run(&job, &parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    info!(
        "Archived {} people",
        execution.step_executions[0].write_count
    );

    Ok(())
}
