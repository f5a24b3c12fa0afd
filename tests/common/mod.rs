#![allow(dead_code)]

pub mod mocks;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Person {
    pub people_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub pick: String,
}

/// Fields of `persons.csv`, which has no header line.
pub const PERSON_FIELDS: [&str; 4] = ["people_id", "first_name", "last_name", "pick"];

pub const PEOPLE: usize = 23;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn data_path(file_name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(file_name)
}

/// Temporary SQLite file loaded with `people.sql`.
///
/// The directory must outlive the pool.
pub async fn people_database() -> anyhow::Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("people.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    sqlx::raw_sql(include_str!("../data/people.sql"))
        .execute(&pool)
        .await?;

    Ok((dir, pool))
}
