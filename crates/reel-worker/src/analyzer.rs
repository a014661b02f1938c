//! Highlight analysis.
//!
//! [`Analyzer`] is the seam to the AI service. [`GeminiAnalyzer`] uploads the
//! video through the Gemini File API, waits until the file is processed and
//! asks a model for a title plus time-coded highlights as JSON.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reel_models::{Analysis, AnalysisParseError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::WorkerResult;
use crate::retry::{retry_async, RetryConfig};
use crate::video;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Produces an [`Analysis`] for a video file.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, video: &Path) -> Result<Analysis, AnalysisError>;
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Gemini request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Gemini response missing {0}")]
    MissingField(&'static str),

    #[error("Gemini could not process the file: {0}")]
    FileFailed(String),

    #[error("Gemini file {name} not active after {secs} seconds")]
    NotActive { name: String, secs: u64 },

    #[error("No content in Gemini response")]
    EmptyResponse,

    #[error(transparent)]
    Payload(#[from] AnalysisParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct StartUploadRequest<'a> {
    file: DisplayName<'a>,
}

#[derive(Debug, Serialize)]
struct DisplayName<'a> {
    display_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<FileStatus>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini-backed analyzer.
pub struct GeminiAnalyzer {
    client: Client,
    api_key: String,
    models: Vec<String>,
    base_url: String,
    retry: RetryConfig,
    poll_interval: Duration,
    activation_timeout: Duration,
}

impl GeminiAnalyzer {
    pub fn new(config: &GeminiConfig) -> WorkerResult<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            base_url: GEMINI_BASE_URL.to_string(),
            retry: RetryConfig::new("gemini"),
            poll_interval: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(600),
        })
    }

    /// Point the client at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// How often to check whether an uploaded file is ready, and for how long.
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.activation_timeout = timeout;
        self
    }

    /// Upload via the resumable protocol: a start request returns the upload
    /// URL, then the bytes are sent with `upload, finalize`.
    async fn upload(&self, path: &Path) -> Result<GeminiFile, AnalysisError> {
        let size = tokio::fs::metadata(path).await?.len();
        let mime = video::mime_type(path);
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime)
            .json(&StartUploadRequest {
                file: DisplayName {
                    display_name: &display_name,
                },
            })
            .send()
            .await?;
        let response = check_status(response).await?;

        let upload_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or(AnalysisError::MissingField("x-goog-upload-url header"))?;

        let file = tokio::fs::File::open(path).await?;
        let response = self
            .client
            .post(&upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file)
            .send()
            .await?;
        let uploaded: UploadResponse = check_status(response).await?.json().await?;

        debug!(name = %uploaded.file.name, size, "Uploaded video to Gemini");
        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> Result<GeminiFile, AnalysisError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn wait_until_active(&self, mut file: GeminiFile) -> Result<GeminiFile, AnalysisError> {
        let started = Instant::now();
        loop {
            match file.state.as_deref() {
                Some("ACTIVE") => return Ok(file),
                Some("FAILED") => {
                    let reason = file
                        .error
                        .map(|e| e.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "processing failed".to_string());
                    return Err(AnalysisError::FileFailed(reason));
                }
                _ => {}
            }

            if started.elapsed() >= self.activation_timeout {
                return Err(AnalysisError::NotActive {
                    name: file.name,
                    secs: self.activation_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let name = file.name.clone();
            file = retry_async(&self.retry, || self.get_file(&name), AnalysisError::is_transient).await?;
        }
    }

    async fn generate(&self, model: &str, file: &GeminiFile, path: &Path) -> Result<Analysis, AnalysisError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part {
                        file_data: Some(FileData {
                            mime_type: file
                                .mime_type
                                .clone()
                                .unwrap_or_else(|| video::mime_type(path).to_string()),
                            file_uri: file.uri.clone(),
                        }),
                        text: None,
                    },
                    Part {
                        file_data: None,
                        text: Some(build_prompt()),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let response: GenerateResponse = check_status(response).await?.json().await?;

        let text = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<String>();
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }

        Ok(Analysis::from_payload(&text)?)
    }

    fn cleanup(&self, name: &str) -> UploadedFile {
        UploadedFile {
            client: self.client.clone(),
            url: format!("{}/v1beta/{}", self.base_url, name),
            api_key: self.api_key.clone(),
            armed: true,
        }
    }

    async fn analyze_uploaded(&self, file: GeminiFile, path: &Path) -> Result<Analysis, AnalysisError> {
        let file = self.wait_until_active(file).await?;

        let mut last_error = AnalysisError::MissingField("model");
        for model in &self.models {
            info!(model = %model, "Requesting highlights from Gemini");
            match retry_async(
                &self.retry,
                || self.generate(model, &file, path),
                AnalysisError::is_transient,
            )
            .await
            {
                Ok(analysis) => {
                    info!(model = %model, highlights = analysis.highlights.len(), "Got highlights");
                    return Ok(analysis);
                }
                Err(e) => {
                    warn!(model = %model, "Gemini model failed: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<Analysis, AnalysisError> {
        let file = retry_async(&self.retry, || self.upload(path), AnalysisError::is_transient).await?;
        let cleanup = self.cleanup(&file.name);

        let result = self.analyze_uploaded(file, path).await;
        cleanup.delete().await;
        result
    }
}

/// Best-effort removal of an uploaded file. If the analysis future is
/// dropped before [`UploadedFile::delete`] runs, the delete is spawned instead.
struct UploadedFile {
    client: Client,
    url: String,
    api_key: String,
    armed: bool,
}

impl UploadedFile {
    async fn delete(mut self) {
        self.armed = false;
        delete_remote(&self.client, &self.url, &self.api_key).await;
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(url = %self.url, "No runtime to delete Gemini file");
            return;
        };
        let client = self.client.clone();
        let url = std::mem::take(&mut self.url);
        let api_key = std::mem::take(&mut self.api_key);
        handle.spawn(async move {
            delete_remote(&client, &url, &api_key).await;
        });
    }
}

async fn delete_remote(client: &Client, url: &str, api_key: &str) {
    let result = client.delete(url).header("x-goog-api-key", api_key).send().await;
    match result {
        Ok(r) if r.status().is_success() => debug!(url, "Deleted Gemini file"),
        Ok(r) => warn!(url, status = %r.status(), "Failed to delete Gemini file"),
        Err(e) => warn!(url, "Failed to delete Gemini file: {}", e),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AnalysisError::Api {
        status: status.as_u16(),
        body,
    })
}

fn build_prompt() -> String {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(Analysis)).unwrap_or_default();
    format!(
        r#"Watch this video and pick out its highlights: the moments a viewer would want to see in a short recap.

Return ONLY a single JSON object matching this JSON schema:
{schema}

Rules:
- "title" is a short, descriptive title for the recap.
- Each highlight has "startTime" and "endTime" in "HH:MM:SS" format, with endTime after startTime.
- Each highlight has a one-sentence "description".
- List highlights in the order they occur in the video and do not overlap them.
- If nothing in the video is worth highlighting, return an empty "highlights" array.
"#
    )
}
