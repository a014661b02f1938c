//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop the worker.
///
/// Per-file failures never surface here; they are recorded on the file's
/// record by the pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("State store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
