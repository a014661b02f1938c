//! Per-file pipeline.
//!
//! Drives one file through analyze, render and publish. Every stage result is
//! written to the state store before the next stage starts, and cached results
//! are reused, so a file interrupted at any point resumes where it stopped.
//!
//! ```text
//! PENDING ─ analysis ok ─> ANALYZING (analysis cached)
//! PENDING ─ zero highlights ─> FAILED
//! ANALYZING ─ render ok ─> RENDERED (montage path cached)
//! RENDERED ─ no publisher ─> RENDERED_NO_UPLOAD
//! RENDERED ─ upload ok ─> UPLOADED
//! RENDERED ─ upload fails ─> UPLOAD_FAILED (next run retries the upload only)
//! any non-terminal ─ analysis/render error ─> FAILED
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reel_media::{stitch, Encoder, MediaError, StitchError, StitchOptions};
use reel_models::{Analysis, RecordUpdate, VideoRecord, VideoStatus};
use reel_store::{StateStore, StoreError};
use thiserror::Error;
use tracing::Instrument;

use crate::analyzer::{AnalysisError, Analyzer};
use crate::logging::FileLogger;
use crate::publisher::{PublishError, Publisher, UploadMetadata};
use crate::video::montage_file_name;

/// How a [`Pipeline::process`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The record was already terminal; nothing ran
    Skipped(VideoStatus),
    /// Stages ran and left the record in this status
    Finished(VideoStatus),
}

impl ProcessOutcome {
    pub fn status(&self) -> VideoStatus {
        match self {
            Self::Skipped(s) | Self::Finished(s) => *s,
        }
    }
}

/// A stage failure. Everything except [`StageError::Store`] is recorded on
/// the file's record instead of being returned.
#[derive(Debug, Error)]
enum StageError {
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("no highlights found")]
    NoHighlights,

    #[error("render failed: {0}")]
    Stitch(#[from] StitchError),

    #[error("render failed: {0}")]
    Render(#[from] MediaError),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Folder source files are read from
    pub watch_dir: PathBuf,
    /// Folder montages are written to
    pub output_dir: PathBuf,
    /// Upper bound on each external call
    pub stage_timeout: Duration,
    pub stitch: StitchOptions,
}

/// The per-file state machine and its collaborators.
pub struct Pipeline {
    store: Arc<StateStore>,
    analyzer: Arc<dyn Analyzer>,
    encoder: Arc<dyn Encoder>,
    publisher: Option<Arc<dyn Publisher>>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        store: Arc<StateStore>,
        analyzer: Arc<dyn Analyzer>,
        encoder: Arc<dyn Encoder>,
        publisher: Option<Arc<dyn Publisher>>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            analyzer,
            encoder,
            publisher,
            options,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Where the montage for `filename` is written.
    pub fn montage_path(&self, filename: &str) -> PathBuf {
        self.options.output_dir.join(montage_file_name(filename))
    }

    /// Run every stage `filename` still needs.
    ///
    /// Stage failures are recorded on the record and reported through the
    /// outcome. Only state store errors are returned.
    pub async fn process(&self, filename: &str) -> Result<ProcessOutcome, StoreError> {
        let logger = FileLogger::new(filename, "pipeline");
        let span = logger.create_span();
        self.process_logged(filename, &logger).instrument(span).await
    }

    async fn process_logged(&self, filename: &str, logger: &FileLogger) -> Result<ProcessOutcome, StoreError> {
        let record = self.store.get(filename).await?;
        if let Some(record) = record.as_ref().filter(|r| r.is_terminal()) {
            logger.log_progress(&format!("Already {}, skipping", record.status));
            return Ok(ProcessOutcome::Skipped(record.status));
        }

        logger.log_start(&format!(
            "processing from {}",
            record.as_ref().map(|r| r.status).unwrap_or_default()
        ));

        match self.run_stages(filename, record, logger).await {
            Ok(status) => {
                logger.log_completion(&format!("now {}", status));
                Ok(ProcessOutcome::Finished(status))
            }
            Err(StageError::Store(e)) => Err(e),
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&message);
                self.store.update(filename, RecordUpdate::failed(message)).await?;
                Ok(ProcessOutcome::Finished(VideoStatus::Failed))
            }
        }
    }

    async fn run_stages(
        &self,
        filename: &str,
        record: Option<VideoRecord>,
        logger: &FileLogger,
    ) -> Result<VideoStatus, StageError> {
        let source = self.options.watch_dir.join(filename);
        let status = record.as_ref().map(|r| r.status).unwrap_or_default();
        let cached_analysis = record.as_ref().and_then(|r| r.analysis.clone());
        let cached_output = record.and_then(|r| r.output_file_path);

        let analysis = match cached_analysis {
            Some(analysis) => {
                logger.log_progress("Using cached analysis");
                analysis
            }
            None => self.analyze(filename, &source, status, logger).await?,
        };
        if analysis.highlights.is_empty() {
            return Err(StageError::NoHighlights);
        }

        let montage = match cached_output {
            Some(path) => {
                logger.log_progress(&format!("Using cached montage {}", path.display()));
                path
            }
            None => self.render(filename, &source, &analysis, logger).await?,
        };

        self.publish(filename, &montage, &analysis, logger).await
    }

    async fn analyze(
        &self,
        filename: &str,
        source: &Path,
        status: VideoStatus,
        logger: &FileLogger,
    ) -> Result<Analysis, StageError> {
        if status == VideoStatus::Pending {
            self.store
                .update(filename, RecordUpdate::status(VideoStatus::Analyzing))
                .await?;
        }

        logger.log_progress("Analyzing");
        let analysis = self
            .timed("analysis", self.analyzer.analyze(source))
            .await??;
        if analysis.highlights.is_empty() {
            return Err(StageError::NoHighlights);
        }

        logger.log_progress(&format!("Found {} highlights", analysis.highlights.len()));
        self.store
            .update(filename, RecordUpdate::default().with_analysis(analysis.clone()))
            .await?;
        Ok(analysis)
    }

    async fn render(
        &self,
        filename: &str,
        source: &Path,
        analysis: &Analysis,
        logger: &FileLogger,
    ) -> Result<PathBuf, StageError> {
        let graph = stitch(&analysis.highlights, &self.options.stitch)?;
        let output = self.montage_path(filename);

        logger.log_progress(&format!(
            "Rendering {} segments ({:.1}s) to {}",
            graph.segments.len(),
            graph.total_duration,
            output.display()
        ));
        self.timed("render", self.encoder.encode(&graph, source, &output))
            .await??;

        self.store
            .update(
                filename,
                RecordUpdate::status(VideoStatus::Rendered).with_output(output.clone()),
            )
            .await?;
        Ok(output)
    }

    async fn publish(
        &self,
        filename: &str,
        montage: &Path,
        analysis: &Analysis,
        logger: &FileLogger,
    ) -> Result<VideoStatus, StageError> {
        let Some(publisher) = &self.publisher else {
            logger.log_progress("No publisher configured");
            self.store
                .update(filename, RecordUpdate::status(VideoStatus::RenderedNoUpload))
                .await?;
            return Ok(VideoStatus::RenderedNoUpload);
        };

        let metadata = UploadMetadata {
            title: analysis.title.clone(),
            description: analysis.upload_description(),
        };

        logger.log_progress("Uploading");
        let result = match self.timed("upload", publisher.upload(montage, &metadata)).await {
            Ok(result) => result.map_err(|e: PublishError| e.to_string()),
            Err(timeout) => Err(timeout.to_string()),
        };

        match result {
            Ok(upload_id) => {
                self.store
                    .update(
                        filename,
                        RecordUpdate::status(VideoStatus::Uploaded).with_upload_id(upload_id),
                    )
                    .await?;
                Ok(VideoStatus::Uploaded)
            }
            Err(message) => {
                logger.log_warning(&format!("Upload failed: {}", message));
                self.store
                    .update(
                        filename,
                        RecordUpdate::status(VideoStatus::UploadFailed).with_error(message),
                    )
                    .await?;
                Ok(VideoStatus::UploadFailed)
            }
        }
    }

    async fn timed<T>(&self, stage: &'static str, fut: impl Future<Output = T>) -> Result<T, StageError> {
        tokio::time::timeout(self.options.stage_timeout, fut)
            .await
            .map_err(|_| StageError::Timeout {
                stage,
                after: self.options.stage_timeout,
            })
    }
}
