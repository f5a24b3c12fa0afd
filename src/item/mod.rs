/// In-memory reader, mostly useful for tests and small reference data.
pub mod list;

#[cfg(feature = "logger")]
/// This module provides a logger item writer, useful for debugging purposes.
pub mod logger;

#[cfg(feature = "csv")]
/// This module provides a CSV item reader and writer implementation.
pub mod csv;

#[cfg(feature = "json")]
/// This module provides a JSON item reader and writer implementation.
pub mod json;

#[cfg(feature = "rdbc-sqlite")]
/// This module provides database item readers (cursor and paging) and a writer built on sqlx.
pub mod rdbc;
