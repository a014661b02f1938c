//! Store error types.

use std::path::PathBuf;

use reel_models::VideoStatus;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the state store.
///
/// None of these are recoverable by a pipeline run: the worker stops when it
/// sees one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State document I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Illegal status transition for {key}: {from} -> {to}")]
    IllegalTransition {
        key: String,
        from: VideoStatus,
        to: VideoStatus,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
