//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Stderr lines quoted in a failure message.
const QUOTED_STDERR_LINES: usize = 3;

/// Errors that can occur while rendering a montage.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg exited with {}{}", describe_exit(.exit_code), quote_stderr(.stderr))]
    FfmpegFailed {
        exit_code: Option<i32>,
        /// Last diagnostic lines FFmpeg wrote to stderr
        stderr: Option<String>,
    },

    #[error("Failed to spawn FFmpeg: {0}")]
    SpawnFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(exit_code: Option<i32>, stderr: Option<String>) -> Self {
        Self::FfmpegFailed { exit_code, stderr }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

fn quote_stderr(stderr: &Option<String>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(QUOTED_STDERR_LINES);
    format!(": {}", lines[start..].join(" | "))
}
