//! Watch-folder highlight worker.
//!
//! This crate provides:
//! - The per-file pipeline (analyze, render, publish) over the state store
//! - Gemini analysis and YouTube publishing clients
//! - Folder reconciliation, watching and the long-running executor
//! - Graceful shutdown

pub mod analyzer;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod reconciler;
pub mod retry;
pub mod video;
pub mod watcher;

pub use analyzer::{AnalysisError, Analyzer, GeminiAnalyzer};
pub use config::{state_file_from_env, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{Executor, ExecutorOptions};
pub use logging::FileLogger;
pub use pipeline::{Pipeline, PipelineOptions, ProcessOutcome};
pub use publisher::{PublishError, Publisher, UploadMetadata, YouTubePublisher};
pub use reconciler::{backfill, pending_files, scan_video_files};
pub use watcher::{wait_until_stable, DirectoryWatcher, Stability};
