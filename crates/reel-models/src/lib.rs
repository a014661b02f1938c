//! Shared data models for the highlight reel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Per-file pipeline records and statuses
//! - Highlights and analysis results
//! - Validated timecodes
//! - The montage encoding profile

pub mod encoding;
pub mod highlight;
pub mod record;
pub mod timestamp;

// Re-export common types
pub use encoding::EncodingConfig;
pub use highlight::{Analysis, AnalysisParseError, Highlight};
pub use record::{RecordUpdate, VideoRecord, VideoStatus};
pub use timestamp::{parse_timestamp, Timecode, TimestampError};
