//! Per-file pipeline record.
//!
//! One [`VideoRecord`] exists per watched file, keyed by its original file
//! name. The record carries the status plus the cached results of the
//! expensive stages so a restarted pipeline resumes where it stopped.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::highlight::Analysis;

/// Pipeline status of a video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    /// Discovered, nothing done yet
    #[default]
    Pending,
    /// Analysis started; once `analysis` is cached the file is ready to render
    Analyzing,
    /// Montage rendered, upload not attempted yet
    Rendered,
    /// Montage uploaded
    Uploaded,
    /// Analysis or render failed
    Failed,
    /// Montage rendered and no publisher is configured
    RenderedNoUpload,
    /// Upload failed; the next run retries only the upload
    UploadFailed,
}

impl VideoStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "PENDING",
            VideoStatus::Analyzing => "ANALYZING",
            VideoStatus::Rendered => "RENDERED",
            VideoStatus::Uploaded => "UPLOADED",
            VideoStatus::Failed => "FAILED",
            VideoStatus::RenderedNoUpload => "RENDERED_NO_UPLOAD",
            VideoStatus::UploadFailed => "UPLOAD_FAILED",
        }
    }

    /// Check if this is a terminal state (the pipeline takes no further action).
    ///
    /// `UploadFailed` is not terminal: processing the file again retries the
    /// upload from the cached montage.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VideoStatus::Uploaded | VideoStatus::Failed | VideoStatus::RenderedNoUpload
        )
    }

    /// Terminal without an error.
    pub fn is_success(&self) -> bool {
        matches!(self, VideoStatus::Uploaded | VideoStatus::RenderedNoUpload)
    }

    /// Position along the pipeline.
    fn rank(&self) -> u8 {
        match self {
            VideoStatus::Pending => 0,
            VideoStatus::Analyzing => 1,
            VideoStatus::Rendered => 2,
            VideoStatus::UploadFailed => 3,
            VideoStatus::Uploaded | VideoStatus::Failed | VideoStatus::RenderedNoUpload => 4,
        }
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Status never regresses and never leaves a terminal state. Rewriting the
    /// same non-terminal status is allowed so stages can add cached fields.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one watched file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// Current pipeline status
    pub status: VideoStatus,

    /// File name the record is keyed by
    pub original_name: String,

    /// Cached analysis result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,

    /// Cached path of the rendered montage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<PathBuf>,

    /// Remote identifier assigned by the publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,

    /// Last failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// When the record was last written
    pub last_updated: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a fresh `PENDING` record.
    pub fn new(original_name: impl Into<String>) -> Self {
        Self {
            status: VideoStatus::Pending,
            original_name: original_name.into(),
            analysis: None,
            output_file_path: None,
            upload_id: None,
            error_message: None,
            last_updated: Utc::now(),
        }
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update over this record.
    ///
    /// Cached fields are only ever set, never cleared. A stale error message
    /// is dropped when the record reaches a successful terminal status. The
    /// caller is responsible for validating the status transition first.
    pub fn apply(&mut self, update: RecordUpdate) {
        if let Some(status) = update.status {
            self.status = status;
            if status.is_success() {
                self.error_message = None;
            }
        }
        if let Some(analysis) = update.analysis {
            self.analysis = Some(analysis);
        }
        if let Some(path) = update.output_file_path {
            self.output_file_path = Some(path);
        }
        if let Some(upload_id) = update.upload_id {
            self.upload_id = Some(upload_id);
        }
        if let Some(message) = update.error_message {
            self.error_message = Some(message);
        }
        self.last_updated = Utc::now();
    }
}

/// Partial update merged over a [`VideoRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<VideoStatus>,
    pub analysis: Option<Analysis>,
    pub output_file_path: Option<PathBuf>,
    pub upload_id: Option<String>,
    pub error_message: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Mark failed with an error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::status(VideoStatus::Failed).with_error(message)
    }

    pub fn with_analysis(mut self, analysis: Analysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file_path = Some(path.into());
        self
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}
