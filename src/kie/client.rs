//! KieClient - handles communication with the KIE.ai jobs API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::prompt::validate_image_url;

/// The environment variable name for the KIE.ai API key.
pub const KIE_API_KEY_ENV: &str = "KIE_API_KEY";

/// Default base URL for the KIE.ai API.
pub const KIE_API_BASE_URL: &str = "https://api.kie.ai/api/v1";

/// Model identifier for Kling video generation.
pub const DEFAULT_MODEL: &str = "kling-3.0/video";

/// Clip length in seconds, as the string the API expects.
pub const DEFAULT_DURATION: &str = "15";

/// Vertical short-form aspect ratio.
pub const DEFAULT_ASPECT_RATIO: &str = "9:16";

/// Logical success code in KIE.ai response envelopes.
const KIE_SUCCESS_CODE: i64 = 200;

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Generation quality mode. Serialized as the API's `"std"` / `"pro"` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityMode {
    Standard,
    #[default]
    Pro,
}

impl QualityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityMode::Standard => "std",
            QualityMode::Pro => "pro",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "std" | "standard" => Some(QualityMode::Standard),
            "pro" => Some(QualityMode::Pro),
            _ => None,
        }
    }
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one video generation job. Immutable once constructed;
/// lives only for the duration of a single `submit_job` call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Full prompt text, usually built by [`super::prompt::build_prompt`].
    pub prompt: String,
    /// URL of the product image the clip starts from.
    pub source_image_url: String,
    /// Clip length in seconds, as a string (fixed at "15").
    pub duration: String,
    /// Quality mode.
    pub mode: QualityMode,
    /// Aspect ratio (fixed at "9:16").
    pub aspect_ratio: String,
}

impl GenerationRequest {
    /// Build a request with the fixed vertical-ad defaults.
    pub fn new(prompt: impl Into<String>, source_image_url: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_image_url: source_image_url.into(),
            duration: DEFAULT_DURATION.to_string(),
            mode: QualityMode::default(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
        }
    }

    pub fn with_mode(mut self, mode: QualityMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Opaque identifier for a submitted job. Held for the lifetime of the
/// polling loop; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub task_id: String,
}

/// Status of a submitted generation job, derived fresh on every poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Job is queued or still rendering.
    Pending,
    /// Job finished and the video is ready to fetch.
    Completed { video_url: String },
    /// The provider reported a failure.
    Failed { reason: String },
}

/// Request body for `POST /jobs/createTask`.
#[derive(Debug, Serialize)]
struct CreateTaskPayload<'a> {
    model: &'a str,
    input: TaskInput<'a>,
}

#[derive(Debug, Serialize)]
struct TaskInput<'a> {
    mode: &'a str,
    image_urls: Vec<&'a str>,
    prompt: &'a str,
    duration: &'a str,
    aspect_ratio: &'a str,
    multi_shots: bool,
    sound: bool,
}

/// Response envelope from `POST /jobs/createTask`.
#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<CreateTaskData>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskData {
    #[serde(rename = "taskId", default)]
    task_id: String,
}

/// Response envelope from `GET /jobs/recordInfo`.
#[derive(Debug, Deserialize)]
struct RecordInfoResponse {
    #[serde(default)]
    data: Option<RecordInfoData>,
}

#[derive(Debug, Deserialize)]
struct RecordInfoData {
    #[serde(default)]
    state: String,
    /// Nested JSON-encoded string; parsed again into [`ResultPayload`].
    #[serde(rename = "resultJson", default)]
    result_json: Option<String>,
    #[serde(rename = "failMsg", default)]
    fail_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    #[serde(rename = "resultUrls", default)]
    result_urls: Vec<String>,
}

/// Client for the KIE.ai video generation API.
///
/// Stateless between calls: each operation performs exactly one outbound
/// HTTP request and retries nothing. Retry policy belongs to the caller.
pub struct KieClient {
    api_key: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl KieClient {
    /// Create a client by reading the API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns `KieError::MissingApiKey` if `KIE_API_KEY` is not set.
    pub fn new() -> Result<Self, KieError> {
        let api_key = std::env::var(KIE_API_KEY_ENV).map_err(|_| KieError::MissingApiKey)?;
        Self::with_api_key(api_key)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(api_key: String) -> Result<Self, KieError> {
        Self::with_base_url(api_key, KIE_API_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL. Useful for testing against a
    /// mock server.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, KieError> {
        if api_key.is_empty() {
            return Err(KieError::MissingApiKey);
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key,
            base_url,
            model: DEFAULT_MODEL.to_string(),
            http_client,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Submit a generation job.
    ///
    /// Sends the provider-specific payload to `POST /jobs/createTask` and
    /// returns the job handle to poll with.
    ///
    /// # Errors
    ///
    /// Returns `KieError::EmptyPrompt` or `KieError::InvalidImageUrl` if the
    /// request fails validation, `KieError::Api` when the provider returns a
    /// non-success logical code (or the HTTP status is not 2xx), and
    /// `KieError::Http` on transport failure.
    pub async fn submit_job(&self, request: &GenerationRequest) -> Result<JobHandle, KieError> {
        if request.prompt.trim().is_empty() {
            return Err(KieError::EmptyPrompt);
        }
        validate_image_url(&request.source_image_url)?;

        let url = format!("{}/jobs/createTask", self.base_url);
        let payload = CreateTaskPayload {
            model: &self.model,
            input: TaskInput {
                mode: request.mode.as_str(),
                image_urls: vec![&request.source_image_url],
                prompt: &request.prompt,
                duration: &request.duration,
                aspect_ratio: &request.aspect_ratio,
                multi_shots: false,
                sound: true,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KieError::Api(format!(
                "createTask failed with status {}: {}",
                status, error_text
            )));
        }

        let body: CreateTaskResponse = response.json().await?;

        match body.data {
            Some(data) if body.code == KIE_SUCCESS_CODE && !data.task_id.is_empty() => {
                log::info!("Job submitted, task_id: {}", data.task_id);
                Ok(JobHandle {
                    task_id: data.task_id,
                })
            }
            _ => Err(KieError::Api(format!(
                "createTask returned code {}: {}",
                body.code,
                if body.msg.is_empty() {
                    "no message"
                } else {
                    &body.msg
                }
            ))),
        }
    }

    /// Query the status of a submitted job.
    ///
    /// Maps the provider's `state` field:
    /// - `"success"` → `JobStatus::Completed` with the first result URL
    /// - `"fail"` → `JobStatus::Failed` with the provider's message
    /// - `"waiting"` or anything else → `JobStatus::Pending`
    ///
    /// A `success` record whose `resultJson` is missing, unparseable, or has
    /// an empty `resultUrls` list is a completed job with no retrievable
    /// asset, reported as `KieError::MalformedResponse` rather than
    /// `Completed`.
    ///
    /// # Errors
    ///
    /// Returns `KieError::Http` on transport failure and on a non-2xx HTTP
    /// status: a 502/503 from a gateway says nothing about the job itself,
    /// so the polling loop treats both the same way and tries again on the
    /// next tick. Only the response body can declare the job dead.
    pub async fn job_status(&self, handle: &JobHandle) -> Result<JobStatus, KieError> {
        let url = format!("{}/jobs/recordInfo", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("taskId", handle.task_id.as_str())])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if let Err(status_error) = response.error_for_status_ref() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!("recordInfo returned status {}: {}", status, body);
            return Err(KieError::Http(status_error));
        }

        let body: RecordInfoResponse = response.json().await?;
        let data = body.data.ok_or_else(|| {
            KieError::MalformedResponse("recordInfo response missing data".to_string())
        })?;

        match data.state.as_str() {
            "success" => {
                let raw = data.result_json.ok_or_else(|| {
                    KieError::MalformedResponse(
                        "job succeeded but resultJson is missing".to_string(),
                    )
                })?;
                let payload: ResultPayload = serde_json::from_str(&raw).map_err(|e| {
                    KieError::MalformedResponse(format!("failed to parse resultJson: {}", e))
                })?;
                match payload.result_urls.into_iter().next() {
                    Some(video_url) => Ok(JobStatus::Completed { video_url }),
                    None => Err(KieError::MalformedResponse(
                        "job succeeded but resultUrls is empty".to_string(),
                    )),
                }
            }
            "fail" => Ok(JobStatus::Failed {
                reason: data
                    .fail_msg
                    .unwrap_or_else(|| "Unknown generation failure".to_string()),
            }),
            other => {
                // "waiting" is the documented non-terminal state; any new
                // state the provider adds is treated the same way.
                if other != "waiting" {
                    log::debug!("treating unrecognized state '{}' as pending", other);
                }
                Ok(JobStatus::Pending)
            }
        }
    }

    /// Download a finished video from a URL to disk.
    ///
    /// Streams the body to the destination file without buffering the whole
    /// video in memory. Parent directories are created if needed.
    pub async fn download_video(&self, url: &str, dest: &Path) -> Result<PathBuf, KieError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KieError::Api(format!(
                "video download failed with status {}: {}",
                status, error_text
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        Ok(dest.to_path_buf())
    }
}

/// Errors that can occur during KIE.ai operations.
#[derive(Debug, thiserror::Error)]
pub enum KieError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Generation timed out")]
    Timeout,

    #[error("Empty prompt")]
    EmptyPrompt,

    #[error("Invalid image URL: {url}")]
    InvalidImageUrl { url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_api_key_creates_client() {
        let client = KieClient::with_api_key("test-api-key".to_string()).unwrap();
        assert_eq!(client.api_key(), "test-api-key");
        assert_eq!(client.base_url(), KIE_API_BASE_URL);
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn with_api_key_empty_returns_error() {
        let result = KieClient::with_api_key(String::new());
        assert!(matches!(result, Err(KieError::MissingApiKey)));
    }

    #[test]
    fn with_base_url_creates_client() {
        let client =
            KieClient::with_base_url("test-key".to_string(), "https://custom.api".to_string())
                .unwrap();
        assert_eq!(client.base_url(), "https://custom.api");
    }

    #[test]
    fn quality_mode_strings() {
        assert_eq!(QualityMode::Standard.as_str(), "std");
        assert_eq!(QualityMode::Pro.as_str(), "pro");
        assert_eq!(QualityMode::from_str("std"), Some(QualityMode::Standard));
        assert_eq!(QualityMode::from_str("pro"), Some(QualityMode::Pro));
        assert_eq!(QualityMode::from_str("ultra"), None);
    }

    #[test]
    fn generation_request_defaults() {
        let request = GenerationRequest::new("a prompt", "https://img/a.jpg");
        assert_eq!(request.duration, "15");
        assert_eq!(request.aspect_ratio, "9:16");
        assert_eq!(request.mode, QualityMode::Pro);
    }

    #[test]
    fn create_task_payload_serialization() {
        let payload = CreateTaskPayload {
            model: DEFAULT_MODEL,
            input: TaskInput {
                mode: "pro",
                image_urls: vec!["https://img/a.jpg"],
                prompt: "unboxing video",
                duration: "15",
                aspect_ratio: "9:16",
                multi_shots: false,
                sound: true,
            },
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["model"], "kling-3.0/video");
        assert_eq!(json["input"]["mode"], "pro");
        assert_eq!(json["input"]["image_urls"][0], "https://img/a.jpg");
        assert_eq!(json["input"]["duration"], "15");
        assert_eq!(json["input"]["aspect_ratio"], "9:16");
        assert_eq!(json["input"]["multi_shots"], false);
        assert_eq!(json["input"]["sound"], true);
    }

    #[test]
    fn create_task_response_deserialization() {
        let json = r#"{"code": 200, "msg": "ok", "data": {"taskId": "abc123"}}"#;
        let response: CreateTaskResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.data.unwrap().task_id, "abc123");
    }

    #[test]
    fn record_info_waiting_deserialization() {
        let json = r#"{"data": {"taskId": "abc123", "state": "waiting"}}"#;
        let response: RecordInfoResponse = serde_json::from_str(json).unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.state, "waiting");
        assert!(data.result_json.is_none());
        assert!(data.fail_msg.is_none());
    }

    #[test]
    fn record_info_success_deserialization() {
        let json = r#"{
            "data": {
                "taskId": "abc123",
                "state": "success",
                "resultJson": "{\"resultUrls\":[\"https://cdn/out.mp4\"]}"
            }
        }"#;
        let response: RecordInfoResponse = serde_json::from_str(json).unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.state, "success");

        let payload: ResultPayload = serde_json::from_str(&data.result_json.unwrap()).unwrap();
        assert_eq!(payload.result_urls, vec!["https://cdn/out.mp4"]);
    }

    #[test]
    fn record_info_fail_deserialization() {
        let json = r#"{"data": {"state": "fail", "failMsg": "content rejected"}}"#;
        let response: RecordInfoResponse = serde_json::from_str(json).unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.state, "fail");
        assert_eq!(data.fail_msg.as_deref(), Some("content rejected"));
    }

    #[test]
    fn kie_error_display() {
        assert_eq!(KieError::MissingApiKey.to_string(), "API key not configured");
        assert_eq!(KieError::Timeout.to_string(), "Generation timed out");
        assert_eq!(
            KieError::Api("bad request".to_string()).to_string(),
            "API error: bad request"
        );
        assert_eq!(
            KieError::MalformedResponse("no urls".to_string()).to_string(),
            "Malformed response: no urls"
        );
    }

    #[test]
    fn malformed_response_distinct_from_provider_failure() {
        let malformed = KieError::MalformedResponse("empty resultUrls".to_string());
        assert!(!matches!(malformed, KieError::Api(_)));

        let failed = JobStatus::Failed {
            reason: "nsfw".to_string(),
        };
        assert!(matches!(failed, JobStatus::Failed { .. }));
    }
}
