//! Segment stitching.
//!
//! Turns an ordered list of highlights into a single FFmpeg filter graph:
//! each highlight becomes a padded segment trimmed out of input `0`, and
//! consecutive segments are chained left to right with a video cross-dissolve
//! and an audio cross-fade.
//!
//! The stitcher is a pure function. The same highlights and options always
//! produce a byte-identical graph.

use std::fmt::Write as _;

use reel_models::Highlight;
use serde::{Deserialize, Serialize};

/// Seconds of context kept before and after each highlight.
pub const DEFAULT_PAD_SECS: f64 = 2.0;
/// Length of each crossfade transition in seconds.
pub const DEFAULT_CROSSFADE_SECS: f64 = 0.5;
/// Output frame rate every segment is normalized to.
pub const DEFAULT_FPS: u32 = 60;
/// Output pixel format every segment is normalized to.
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Final video output label.
pub const VIDEO_OUT: &str = "outv";
/// Final audio output label.
pub const AUDIO_OUT: &str = "outa";

/// Errors from building a filter graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StitchError {
    #[error("no highlights to process")]
    NoHighlights,

    #[error("highlight {index} ends at {end}s, not after its start at {start}s")]
    InvalidRange { index: usize, start: f64, end: f64 },

    #[error("crossfade of {crossfade}s does not fit segment {index} lasting {duration}s")]
    CrossfadeTooLong {
        index: usize,
        crossfade: f64,
        duration: f64,
    },

    #[error("invalid stitch options: {0}")]
    InvalidOptions(String),
}

/// Stitching parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchOptions {
    pub pad_secs: f64,
    pub crossfade_secs: f64,
    pub fps: u32,
    pub pixel_format: String,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            pad_secs: DEFAULT_PAD_SECS,
            crossfade_secs: DEFAULT_CROSSFADE_SECS,
            fps: DEFAULT_FPS,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
        }
    }
}

impl StitchOptions {
    fn validate(&self) -> Result<(), StitchError> {
        if !self.pad_secs.is_finite() || self.pad_secs < 0.0 {
            return Err(StitchError::InvalidOptions(format!(
                "pad must be a non-negative number of seconds, got {}",
                self.pad_secs
            )));
        }
        if !self.crossfade_secs.is_finite() || self.crossfade_secs <= 0.0 {
            return Err(StitchError::InvalidOptions(format!(
                "crossfade must be a positive number of seconds, got {}",
                self.crossfade_secs
            )));
        }
        if self.fps == 0 {
            return Err(StitchError::InvalidOptions("fps must be positive".to_string()));
        }
        if self.pixel_format.is_empty() {
            return Err(StitchError::InvalidOptions("pixel format is empty".to_string()));
        }
        Ok(())
    }
}

/// A highlight's time range after padding, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl Segment {
    /// Pad a `[start, end)` range in seconds, clamping the start at zero.
    ///
    /// `index` is only used for error reporting.
    pub fn padded(index: usize, start: f64, end: f64, pad: f64) -> Result<Self, StitchError> {
        if end <= start {
            return Err(StitchError::InvalidRange { index, start, end });
        }
        let start = (start - pad).max(0.0);
        let end = end + pad;
        Ok(Self {
            start,
            end,
            duration: end - start,
        })
    }

    pub fn from_highlight(index: usize, highlight: &Highlight, pad: f64) -> Result<Self, StitchError> {
        Self::padded(
            index,
            highlight.start_time.seconds(),
            highlight.end_time.seconds(),
            pad,
        )
    }
}

/// One pairwise crossfade in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossfade {
    pub video_inputs: (String, String),
    pub audio_inputs: (String, String),
    pub video_output: String,
    pub audio_output: String,
    /// Start of the transition on the accumulated timeline
    pub offset: f64,
    pub duration: f64,
}

/// A fully resolved filter graph ready for `-filter_complex`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGraph {
    pub segments: Vec<Segment>,
    pub transitions: Vec<Crossfade>,
    pub video_label: String,
    pub audio_label: String,
    /// Length of the montage in seconds
    pub total_duration: f64,
    fps: u32,
    pixel_format: String,
}

impl FilterGraph {
    /// Render the graph as an FFmpeg `-filter_complex` argument.
    pub fn to_filter_complex(&self) -> String {
        let single = self.transitions.is_empty();
        let mut chains = Vec::with_capacity(self.segments.len() * 2 + self.transitions.len() * 2);

        for (i, seg) in self.segments.iter().enumerate() {
            let (v, a) = if single {
                (self.video_label.clone(), self.audio_label.clone())
            } else {
                segment_labels(i)
            };
            chains.push(format!(
                "[0:v]trim=start={}:end={},setpts=PTS-STARTPTS,fps={},format={}[{}]",
                fmt_secs(seg.start),
                fmt_secs(seg.end),
                self.fps,
                self.pixel_format,
                v
            ));
            chains.push(format!(
                "[0:a]atrim=start={}:end={},asetpts=PTS-STARTPTS[{}]",
                fmt_secs(seg.start),
                fmt_secs(seg.end),
                a
            ));
        }

        for xf in &self.transitions {
            chains.push(format!(
                "[{}][{}]xfade=transition=fade:duration={}:offset={}[{}]",
                xf.video_inputs.0,
                xf.video_inputs.1,
                fmt_secs(xf.duration),
                fmt_secs(xf.offset),
                xf.video_output
            ));
            chains.push(format!(
                "[{}][{}]acrossfade=d={}[{}]",
                xf.audio_inputs.0,
                xf.audio_inputs.1,
                fmt_secs(xf.duration),
                xf.audio_output
            ));
        }

        chains.join(";")
    }

    /// The `-map` arguments selecting the graph outputs.
    pub fn map_labels(&self) -> [String; 2] {
        [
            format!("[{}]", self.video_label),
            format!("[{}]", self.audio_label),
        ]
    }
}

/// Build the montage filter graph for `highlights`, in the order given.
pub fn stitch(highlights: &[Highlight], options: &StitchOptions) -> Result<FilterGraph, StitchError> {
    if highlights.is_empty() {
        return Err(StitchError::NoHighlights);
    }
    options.validate()?;

    let segments = highlights
        .iter()
        .enumerate()
        .map(|(i, h)| Segment::from_highlight(i, h, options.pad_secs))
        .collect::<Result<Vec<_>, _>>()?;

    build_graph(segments, options)
}

fn build_graph(segments: Vec<Segment>, options: &StitchOptions) -> Result<FilterGraph, StitchError> {
    let fade = options.crossfade_secs;

    if segments.len() > 1 {
        if let Some((index, seg)) = segments
            .iter()
            .enumerate()
            .find(|(_, seg)| seg.duration <= fade)
        {
            return Err(StitchError::CrossfadeTooLong {
                index,
                crossfade: fade,
                duration: seg.duration,
            });
        }
    }

    let last = segments.len() - 1;
    let mut transitions = Vec::with_capacity(last);
    let mut accumulated = segments[0].duration;
    let (mut prev_v, mut prev_a) = segment_labels(0);

    for (i, next) in segments.iter().enumerate().skip(1) {
        let (next_v, next_a) = segment_labels(i);
        let (out_v, out_a) = if i == last {
            (VIDEO_OUT.to_string(), AUDIO_OUT.to_string())
        } else {
            (format!("vx{i}"), format!("ax{i}"))
        };

        transitions.push(Crossfade {
            video_inputs: (prev_v, next_v),
            audio_inputs: (prev_a, next_a),
            video_output: out_v.clone(),
            audio_output: out_a.clone(),
            offset: accumulated - fade,
            duration: fade,
        });

        accumulated += next.duration - fade;
        prev_v = out_v;
        prev_a = out_a;
    }

    Ok(FilterGraph {
        segments,
        transitions,
        video_label: VIDEO_OUT.to_string(),
        audio_label: AUDIO_OUT.to_string(),
        total_duration: accumulated,
        fps: options.fps,
        pixel_format: options.pixel_format.clone(),
    })
}

fn segment_labels(i: usize) -> (String, String) {
    (format!("v{i}"), format!("a{i}"))
}

/// Format seconds with at most three decimals and no trailing zeros.
fn fmt_secs(secs: f64) -> String {
    let mut s = String::new();
    let _ = write!(s, "{:.3}", secs);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reel_models::Timecode;

    fn hl(start: &str, end: &str) -> Highlight {
        Highlight::new(start, end, "moment").unwrap()
    }

    #[test]
    fn test_single_segment() {
        let graph = stitch(&[hl("00:00:10", "00:00:12")], &StitchOptions::default()).unwrap();

        assert_eq!(
            graph.segments,
            vec![Segment {
                start: 8.0,
                end: 14.0,
                duration: 6.0
            }]
        );
        assert!(graph.transitions.is_empty());
        assert_eq!(graph.total_duration, 6.0);

        let fc = graph.to_filter_complex();
        assert!(!fc.contains("xfade"));
        assert!(!fc.contains("acrossfade"));
        assert_eq!(
            fc,
            "[0:v]trim=start=8:end=14,setpts=PTS-STARTPTS,fps=60,format=yuv420p[outv];\
             [0:a]atrim=start=8:end=14,asetpts=PTS-STARTPTS[outa]"
        );
    }

    #[test]
    fn test_two_segments_offsets() {
        let graph = stitch(
            &[hl("00:00:10", "00:00:12"), hl("00:00:20", "00:00:22")],
            &StitchOptions::default(),
        )
        .unwrap();

        assert_eq!(graph.segments[0].duration, 6.0);
        assert_eq!(graph.segments[1].start, 18.0);
        assert_eq!(graph.segments[1].end, 24.0);
        assert_eq!(graph.transitions.len(), 1);
        assert_eq!(graph.transitions[0].offset, 5.5);
        assert_eq!(graph.total_duration, 11.5);

        let fc = graph.to_filter_complex();
        assert!(fc.contains("[v0][v1]xfade=transition=fade:duration=0.5:offset=5.5[outv]"));
        assert!(fc.contains("[a0][a1]acrossfade=d=0.5[outa]"));
    }

    #[test]
    fn test_three_segments_use_intermediate_labels() {
        let graph = stitch(
            &[
                hl("00:00:10", "00:00:12"),
                hl("00:00:20", "00:00:22"),
                hl("00:01:00", "00:01:03"),
            ],
            &StitchOptions::default(),
        )
        .unwrap();

        let t = &graph.transitions;
        assert_eq!(t[0].video_output, "vx1");
        assert_eq!(t[0].audio_output, "ax1");
        assert_eq!(t[1].video_inputs, ("vx1".to_string(), "v2".to_string()));
        assert_eq!(t[1].offset, 11.0);
        assert_eq!(t[1].video_output, "outv");
        assert_eq!(graph.total_duration, 11.5 + 7.0 - 0.5);
    }

    #[test]
    fn test_start_clamped_at_zero() {
        let graph = stitch(&[hl("00:00:01", "00:00:04")], &StitchOptions::default()).unwrap();
        assert_eq!(graph.segments[0].start, 0.0);
        assert_eq!(graph.segments[0].duration, 6.0);
    }

    #[test]
    fn test_fractional_offsets_formatting() {
        let graph = stitch(
            &[hl("00:00:10.25", "00:00:12"), hl("30", "31.125")],
            &StitchOptions::default(),
        )
        .unwrap();
        let fc = graph.to_filter_complex();
        assert!(fc.contains("trim=start=8.25:end=14,"));
        assert!(fc.contains("trim=start=28:end=33.125,"));
        assert!(fc.contains("offset=5.25[outv]"));
    }

    #[test]
    fn test_empty_rejected() {
        let err = stitch(&[], &StitchOptions::default()).unwrap_err();
        assert_eq!(err, StitchError::NoHighlights);
        assert_eq!(err.to_string(), "no highlights to process");
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = stitch(
            &[hl("00:00:10", "00:00:12"), hl("00:00:30", "00:00:30")],
            &StitchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StitchError::InvalidRange { index: 1, .. }));
    }

    #[test]
    fn test_crossfade_longer_than_segment_rejected() {
        let options = StitchOptions {
            pad_secs: 0.0,
            crossfade_secs: 1.5,
            ..Default::default()
        };
        let err = stitch(&[hl("10", "11"), hl("20", "25")], &options).unwrap_err();
        assert!(matches!(err, StitchError::CrossfadeTooLong { index: 0, .. }));

        // A single segment has no transition to fit.
        assert!(stitch(&[hl("10", "11")], &options).is_ok());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = StitchOptions {
            crossfade_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            stitch(&[hl("10", "11")], &options),
            Err(StitchError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_order_preserved() {
        let graph = stitch(
            &[hl("00:01:00", "00:01:05"), hl("00:00:05", "00:00:09")],
            &StitchOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.segments[0].start, 58.0);
        assert_eq!(graph.segments[1].start, 3.0);
    }

    #[test]
    fn test_map_labels() {
        let graph = stitch(&[hl("10", "12")], &StitchOptions::default()).unwrap();
        assert_eq!(graph.map_labels(), ["[outv]".to_string(), "[outa]".to_string()]);
    }

    #[test]
    fn test_fmt_secs() {
        assert_eq!(fmt_secs(8.0), "8");
        assert_eq!(fmt_secs(5.5), "5.5");
        assert_eq!(fmt_secs(1.0 / 3.0), "0.333");
        assert_eq!(fmt_secs(0.0), "0");
    }

    fn highlights_strategy() -> impl Strategy<Value = Vec<Highlight>> {
        prop::collection::vec((0u32..36_000, 1u32..120_000), 1..12).prop_map(|ranges| {
            ranges
                .into_iter()
                .map(|(start_ms, len_ms)| {
                    let start = start_ms as f64 / 10.0;
                    Highlight {
                        start_time: Timecode::from_seconds(start),
                        end_time: Timecode::from_seconds(start + len_ms as f64 / 1000.0),
                        description: String::new(),
                    }
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_stitch_is_deterministic(highlights in highlights_strategy()) {
            let options = StitchOptions::default();
            let a = stitch(&highlights, &options);
            let b = stitch(&highlights, &options);
            prop_assert_eq!(&a, &b);
            if let Ok(graph) = a {
                prop_assert_eq!(graph.to_filter_complex(), b.unwrap().to_filter_complex());
            }
        }

        #[test]
        fn prop_chain_shape(highlights in highlights_strategy()) {
            let graph = stitch(&highlights, &StitchOptions::default()).unwrap();
            let n = highlights.len();
            prop_assert_eq!(graph.segments.len(), n);
            prop_assert_eq!(graph.transitions.len(), n - 1);

            let sum: f64 = graph.segments.iter().map(|s| s.duration).sum();
            let expected = sum - DEFAULT_CROSSFADE_SECS * (n - 1) as f64;
            prop_assert!((graph.total_duration - expected).abs() < 1e-6);

            for t in &graph.transitions {
                prop_assert!(t.offset > 0.0);
            }
        }
    }
}
