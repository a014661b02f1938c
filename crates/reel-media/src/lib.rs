//! Montage rendering.
//!
//! This crate provides:
//! - The segment stitcher turning highlights into an FFmpeg filter graph
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - The [`Encoder`] seam and its FFmpeg implementation

pub mod command;
pub mod encoder;
pub mod error;
pub mod progress;
pub mod stitch;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use encoder::{Encoder, FfmpegEncoder};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use stitch::{stitch, Crossfade, FilterGraph, Segment, StitchError, StitchOptions};
