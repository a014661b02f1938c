//! Timestamp parsing and validation utilities.
//!
//! Highlight boundaries arrive from the analyzer as timecode strings in the
//! forms `HH:MM:SS`, `MM:SS` or `SS`, each optionally with fractional seconds.
//! [`Timecode`] is the validated form used everywhere past the analyzer
//! boundary.

use std::fmt;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum reasonable video duration (24 hours in seconds).
pub const MAX_VIDEO_DURATION_SECS: f64 = 86400.0;

/// Parse a timestamp string to total seconds.
///
/// # Examples
/// ```
/// use reel_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    const UNITS: [&str; 3] = ["hours", "minutes", "seconds"];

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > UNITS.len() {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    // Right-align the components so "MM:SS" maps onto minutes/seconds.
    let units = &UNITS[UNITS.len() - parts.len()..];
    let mut total = 0.0;
    for (part, unit) in parts.iter().zip(units.iter().copied()) {
        let value: f64 = part
            .trim()
            .parse()
            .map_err(|_| TimestampError::InvalidValue(unit, part.to_string()))?;
        if !value.is_finite() {
            return Err(TimestampError::InvalidValue(unit, part.to_string()));
        }
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }

    if total > MAX_VIDEO_DURATION_SECS {
        return Err(TimestampError::ExceedsMaxDuration(MAX_VIDEO_DURATION_SECS));
    }

    Ok(total)
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// A validated timecode.
///
/// Keeps the original text so a persisted record round-trips exactly as the
/// analyzer produced it, alongside the parsed value in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timecode {
    raw: String,
    seconds: f64,
}

impl Timecode {
    /// Parse and validate a timecode.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TimestampError> {
        let raw = raw.into();
        let seconds = parse_timestamp(&raw)?;
        Ok(Self {
            raw: raw.trim().to_string(),
            seconds,
        })
    }

    /// Build a timecode from seconds, normalized to `HH:MM:SS(.mmm)`.
    pub fn from_seconds(seconds: f64) -> Self {
        let seconds = seconds.max(0.0);
        Self {
            raw: format_seconds(seconds),
            seconds,
        }
    }

    /// Value in seconds.
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// The timecode as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for Timecode {
    type Error = TimestampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Timecode::parse(value)
    }
}

impl From<Timecode> for String {
    fn from(tc: Timecode) -> Self {
        tc.raw
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl JsonSchema for Timecode {
    fn schema_name() -> String {
        "Timecode".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampError {
    /// Timestamp string is empty
    Empty,
    /// Timestamp contains negative values
    Negative,
    /// Invalid numeric value for a component
    InvalidValue(&'static str, String),
    /// Invalid timestamp format
    InvalidFormat(String),
    /// Timestamp exceeds maximum allowed duration
    ExceedsMaxDuration(f64),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Timestamp cannot be empty"),
            Self::Negative => write!(f, "Timestamp cannot be negative"),
            Self::InvalidValue(component, value) => {
                write!(f, "Invalid {} value: {}", component, value)
            }
            Self::InvalidFormat(ts) => write!(
                f,
                "Invalid timestamp format '{}'. Use HH:MM:SS, MM:SS or SS",
                ts
            ),
            Self::ExceedsMaxDuration(max) => {
                write!(f, "Timestamp exceeds maximum allowed duration ({} hours)", max / 3600.0)
            }
        }
    }
}

impl std::error::Error for TimestampError {}
