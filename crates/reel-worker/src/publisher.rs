//! Montage publishing.
//!
//! [`Publisher`] is the seam to the upload target. [`YouTubePublisher`] uses
//! the YouTube Data API v3 resumable upload with a bearer access token.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::YouTubeConfig;
use crate::error::WorkerResult;
use crate::retry::{retry_async, RetryConfig};

pub const YOUTUBE_BASE_URL: &str = "https://www.googleapis.com";

/// YouTube rejects titles longer than this many characters.
const MAX_TITLE_CHARS: usize = 100;
/// YouTube rejects descriptions longer than this many bytes.
const MAX_DESCRIPTION_BYTES: usize = 5000;
/// "People & Blogs"
const DEFAULT_CATEGORY_ID: &str = "22";

/// Metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub title: String,
    pub description: String,
}

/// Uploads a rendered montage and returns the remote id.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload(&self, video: &Path, metadata: &UploadMetadata) -> Result<String, PublishError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YouTube API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("YouTube response missing {0}")]
    MissingField(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: Status<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    description: &'a str,
    category_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status<'a> {
    privacy_status: &'a str,
    self_declared_made_for_kids: bool,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: Option<String>,
}

pub struct YouTubePublisher {
    client: Client,
    access_token: String,
    privacy_status: String,
    base_url: String,
    retry: RetryConfig,
}

impl YouTubePublisher {
    pub fn new(config: &YouTubeConfig) -> WorkerResult<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            access_token: config.access_token.clone(),
            privacy_status: config.privacy_status.clone(),
            base_url: YOUTUBE_BASE_URL.to_string(),
            retry: RetryConfig::new("youtube upload"),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn start_session(&self, size: u64, metadata: &UploadMetadata) -> Result<String, PublishError> {
        let title = sanitize_title(&metadata.title);
        let description = truncate_bytes(&metadata.description, MAX_DESCRIPTION_BYTES);

        let response = self
            .client
            .post(format!("{}/upload/youtube/v3/videos", self.base_url))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Length", size.to_string())
            .header("X-Upload-Content-Type", "video/mp4")
            .json(&VideoResource {
                snippet: Snippet {
                    title: &title,
                    description,
                    category_id: DEFAULT_CATEGORY_ID,
                },
                status: Status {
                    privacy_status: &self.privacy_status,
                    self_declared_made_for_kids: false,
                },
            })
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or(PublishError::MissingField("Location header"))
    }

    async fn send_file(&self, session_url: &str, video: &Path, size: u64) -> Result<String, PublishError> {
        let file = tokio::fs::File::open(video).await?;
        let response = self
            .client
            .put(session_url)
            .bearer_auth(&self.access_token)
            .header("Content-Length", size.to_string())
            .header("Content-Type", "video/mp4")
            .body(file)
            .send()
            .await?;
        let uploaded: UploadedVideo = check_status(response).await?.json().await?;
        uploaded.id.ok_or(PublishError::MissingField("video id"))
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    async fn upload(&self, video: &Path, metadata: &UploadMetadata) -> Result<String, PublishError> {
        let size = tokio::fs::metadata(video).await?.len();

        let id = retry_async(
            &self.retry,
            || async {
                let session = self.start_session(size, metadata).await?;
                debug!(size, "Opened YouTube upload session");
                self.send_file(&session, video, size).await
            },
            PublishError::is_transient,
        )
        .await?;

        info!(video_id = %id, privacy = %self.privacy_status, "Uploaded montage to YouTube");
        Ok(id)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PublishError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Drop characters YouTube rejects in titles and cap the length.
fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_TITLE_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "Highlights".to_string()
    } else {
        cleaned.to_string()
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
