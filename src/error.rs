use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    /// The source itself can no longer be read: broken document, I/O or
    /// query failure. No later item can be trusted.
    #[error("ItemSource from: {0}")]
    ItemSource(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Step {0} failed")]
    Step(String),

    #[error("Restart refused: {0}")]
    Restart(String),

    #[error("JobRepository from: {0}")]
    Repository(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl BatchError {
    /// Returns `true` for per-item failures that a skip policy may tolerate.
    ///
    /// Only read and process failures concern a single item. A failing
    /// source is never skipped. Writer failures concern a whole chunk and go
    /// through the retry path instead.
    pub fn is_skippable(&self) -> bool {
        matches!(self, BatchError::ItemReader(_) | BatchError::ItemProcessor(_))
    }
}
