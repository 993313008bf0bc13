//! Sending artifacts to the webhook

use crate::archive::Artifact;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Webhook target
#[derive(Clone)]
pub struct Endpoint {
    pub url: String,
    /// Sent as `Authorization: Bearer` when set
    pub token: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for Endpoint {
    // Webhook URLs embed their secret
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &redact(&self.url))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Scheme and host only
pub fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}/...",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    /// Worth retrying (network trouble, 408, 429, 5xx)
    TransientFailure(String),
    /// Retrying cannot help (bad URL, other 4xx)
    PermanentFailure(String),
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, artifact: &Artifact, message: &str, endpoint: &Endpoint) -> UploadOutcome;
}

/// Posts `multipart/form-data` with a `payload_json` part and a `file` part
#[derive(Debug, Clone)]
pub struct WebhookUploader {
    client: Client,
}

impl WebhookUploader {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("quicksave/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn mime_for(artifact: &Artifact) -> &'static str {
    match artifact.path.extension().and_then(|e| e.to_str()) {
        Some("7z") => "application/x-7z-compressed",
        Some("zst") => "application/zstd",
        _ => "application/octet-stream",
    }
}

/// Map an HTTP status onto an outcome
pub fn classify_status(status: StatusCode, body: &str) -> UploadOutcome {
    if status.is_success() {
        return UploadOutcome::Success;
    }

    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate(body, 200))
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        UploadOutcome::TransientFailure(detail)
    } else {
        UploadOutcome::PermanentFailure(detail)
    }
}

fn classify_error(err: &reqwest::Error) -> UploadOutcome {
    if err.is_builder() {
        UploadOutcome::PermanentFailure(format!("invalid request: {}", err))
    } else {
        // Connect, timeout and mid-body failures all leave the remote state unknown
        UploadOutcome::TransientFailure(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl Uploader for WebhookUploader {
    async fn upload(&self, artifact: &Artifact, message: &str, endpoint: &Endpoint) -> UploadOutcome {
        let url = match Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return UploadOutcome::PermanentFailure(format!(
                    "unsupported scheme '{}'",
                    url.scheme()
                ))
            }
            Err(e) => return UploadOutcome::PermanentFailure(format!("invalid webhook URL: {}", e)),
        };

        let bytes = match tokio::fs::read(&artifact.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return UploadOutcome::PermanentFailure(format!(
                    "cannot read artifact {}: {}",
                    artifact.path.display(),
                    e
                ))
            }
        };

        let payload = serde_json::json!({ "content": message }).to_string();
        let form = match (
            Part::text(payload).mime_str("application/json"),
            Part::bytes(bytes)
                .file_name(artifact.file_name())
                .mime_str(mime_for(artifact)),
        ) {
            (Ok(payload), Ok(file)) => Form::new().part("payload_json", payload).part("file", file),
            (Err(e), _) | (_, Err(e)) => {
                return UploadOutcome::PermanentFailure(format!("cannot build form: {}", e))
            }
        };

        let mut request = self
            .client
            .post(url)
            .timeout(endpoint.timeout)
            .multipart(form);
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token);
        }

        debug!(endpoint = %redact(&endpoint.url), bytes = artifact.size, "uploading artifact");

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = if status.is_success() {
                    String::new()
                } else {
                    response.text().await.unwrap_or_default()
                };
                classify_status(status, &body)
            }
            Err(e) => classify_error(&e),
        }
    }
}
