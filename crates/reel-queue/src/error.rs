//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Invalid concurrency limit: {0}")]
    InvalidLimit(usize),
}
