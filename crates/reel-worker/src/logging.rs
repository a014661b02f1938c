//! Structured per-file logging.
//!
//! Every pipeline run gets a [`FileLogger`] so lifecycle events carry the
//! file name, the operation and a run id correlating one attempt's lines.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FileLogger {
    file: String,
    operation: String,
    run_id: String,
}

impl FileLogger {
    pub fn new(file: &str, operation: &str) -> Self {
        Self {
            file: file.to_string(),
            operation: operation.to_string(),
            run_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id,
            "Started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id,
            "Failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id,
            "Completed: {}", message
        );
    }

    /// Span wrapping the whole run, for `Instrument`.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "file",
            file = %self.file,
            operation = %self.operation,
            run_id = %self.run_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logger_creation() {
        let logger = FileLogger::new("match.mp4", "pipeline");
        assert_eq!(logger.file, "match.mp4");
        assert_eq!(logger.operation, "pipeline");
        assert_eq!(logger.run_id.len(), 8);
    }

    #[test]
    fn test_run_ids_differ() {
        let a = FileLogger::new("a.mp4", "pipeline");
        let b = FileLogger::new("a.mp4", "pipeline");
        assert_ne!(a.run_id, b.run_id);
    }
}
