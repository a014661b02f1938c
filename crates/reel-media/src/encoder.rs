//! Montage encoder.
//!
//! [`Encoder`] is the seam between the pipeline and the external video
//! encoder. [`FfmpegEncoder`] renders a [`FilterGraph`] with the FFmpeg CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reel_models::EncodingConfig;
use tokio::fs;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::stitch::FilterGraph;

/// Renders a filter graph applied to one input into an output file.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, graph: &FilterGraph, input: &Path, output: &Path) -> MediaResult<()>;
}

#[async_trait]
impl<T: Encoder + ?Sized> Encoder for Arc<T> {
    async fn encode(&self, graph: &FilterGraph, input: &Path, output: &Path) -> MediaResult<()> {
        (**self).encode(graph, input, output).await
    }
}

/// Encoder backed by the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    runner: FfmpegRunner,
    encoding: EncodingConfig,
}

impl FfmpegEncoder {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self {
            runner,
            encoding: EncodingConfig::montage(),
        }
    }

    /// Build the FFmpeg command writing to `output`.
    pub fn command(&self, graph: &FilterGraph, input: &Path, output: &Path) -> FfmpegCommand {
        let [video, audio] = graph.map_labels();
        FfmpegCommand::new(input, output)
            .filter_complex(graph.to_filter_complex())
            .map(video)
            .map(audio)
            .output_args(self.encoding.to_ffmpeg_args())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(&self, graph: &FilterGraph, input: &Path, output: &Path) -> MediaResult<()> {
        if !fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Render next to the destination, then rename so a killed encode
        // never leaves a truncated montage at the final path.
        let partial = partial_path(output);
        let cmd = self.command(graph, input, &partial);

        info!(
            input = %input.display(),
            output = %output.display(),
            segments = graph.segments.len(),
            duration_secs = graph.total_duration,
            "Encoding montage"
        );

        let total_ms = (graph.total_duration * 1000.0) as i64;
        let result = self
            .runner
            .run_with_progress(&cmd, move |p| {
                debug!(percent = p.percentage(total_ms), speed = p.speed, "Encode progress");
            })
            .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        fs::rename(&partial, output).await?;
        Ok(())
    }
}

/// `clip_highlights.mp4` -> `clip_highlights.partial.mp4`, keeping the
/// extension so FFmpeg picks the same muxer.
fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "montage".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}
