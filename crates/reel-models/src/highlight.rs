//! Highlight and analysis models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timestamp::{Timecode, TimestampError};

/// A highlight detected in the source video.
///
/// Highlights keep the order the analyzer produced them in; that order is the
/// order segments appear in the montage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    /// Start timestamp (HH:MM:SS, MM:SS or SS)
    pub start_time: Timecode,

    /// End timestamp (HH:MM:SS, MM:SS or SS)
    pub end_time: Timecode,

    /// Human readable description of the moment
    #[serde(default)]
    pub description: String,
}

impl Highlight {
    /// Create a new highlight from timecode strings.
    pub fn new(
        start: &str,
        end: &str,
        description: impl Into<String>,
    ) -> Result<Self, TimestampError> {
        Ok(Self {
            start_time: Timecode::parse(start)?,
            end_time: Timecode::parse(end)?,
            description: description.into(),
        })
    }
}

/// Result of the analysis stage, cached on the video record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Title for the montage
    pub title: String,

    /// Highlights in temporal order
    pub highlights: Vec<Highlight>,
}

impl Analysis {
    pub fn new(title: impl Into<String>, highlights: Vec<Highlight>) -> Self {
        Self {
            title: title.into(),
            highlights,
        }
    }

    /// Parse an analyzer payload.
    ///
    /// Accepts the JSON object optionally wrapped in a markdown code fence.
    /// Shape errors (missing fields, `highlights` not an array, malformed
    /// timecodes) are reported as [`AnalysisParseError`].
    pub fn from_payload(text: &str) -> Result<Self, AnalysisParseError> {
        let text = strip_code_fence(text);
        if text.is_empty() {
            return Err(AnalysisParseError::Empty);
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Upload description: one line per highlight.
    pub fn upload_description(&self) -> String {
        self.highlights
            .iter()
            .map(|h| {
                if h.description.trim().is_empty() {
                    h.start_time.to_string()
                } else {
                    format!("{} – {}", h.start_time, h.description.trim())
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Error parsing an analyzer payload.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisParseError {
    #[error("analysis payload is empty")]
    Empty,

    #[error("malformed analysis payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_payload_with_code_fence() {
        let payload = r#"```json
{"title": "Match day", "highlights": [
  {"startTime": "00:00:10", "endTime": "00:00:12", "description": "Kickoff"},
  {"startTime": "1:05", "endTime": "1:09", "description": "Save"}
]}
```"#;
        let analysis = Analysis::from_payload(payload).unwrap();
        assert_eq!(analysis.title, "Match day");
        assert_eq!(analysis.highlights.len(), 2);
        assert_eq!(analysis.highlights[1].start_time.seconds(), 65.0);
    }

    #[test]
    fn test_from_payload_keeps_order() {
        let payload = r#"{"title": "t", "highlights": [
            {"startTime": "00:01:00", "endTime": "00:01:05", "description": "later"},
            {"startTime": "00:00:05", "endTime": "00:00:09", "description": "earlier"}
        ]}"#;
        let analysis = Analysis::from_payload(payload).unwrap();
        assert_eq!(analysis.highlights[0].description, "later");
        assert_eq!(analysis.highlights[1].description, "earlier");
    }

    #[test]
    fn test_from_payload_rejects_non_array_highlights() {
        let payload = r#"{"title": "t", "highlights": "none"}"#;
        assert!(matches!(
            Analysis::from_payload(payload),
            Err(AnalysisParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_payload_rejects_bad_timecode() {
        let payload = r#"{"title": "t", "highlights": [
            {"startTime": "soon", "endTime": "00:00:05", "description": "x"}
        ]}"#;
        assert!(Analysis::from_payload(payload).is_err());
    }

    #[test]
    fn test_from_payload_empty() {
        assert!(matches!(Analysis::from_payload("  "), Err(AnalysisParseError::Empty)));
    }

    #[test]
    fn test_upload_description() {
        let analysis = Analysis::new(
            "t",
            vec![
                Highlight::new("00:00:10", "00:00:12", "Kickoff").unwrap(),
                Highlight::new("00:00:20", "00:00:22", "").unwrap(),
            ],
        );
        assert_eq!(analysis.upload_description(), "00:00:10 – Kickoff\n00:00:20");
    }
}
