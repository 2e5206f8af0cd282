//! Client for the remote document-conversion backend.
//!
//! Endpoints:
//! - `POST /api/generate/{docx|pptx|pdf}`: plan JSON in, binary file out
//! - `POST /api/generate/diagram`: bring-your-own-key diagram generation, `{ code }` out
//! - `POST /api/generate/plan`: plan JSON generated server-side
//! - `GET /api/health`: admin status for the stored token
//!
//! Every request carries `X-Device-Id`, plus `X-Admin-Token` when one is set.
//! Non-2xx responses become [`BackendError::Status`] whose message is the
//! body's `detail` field when present.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::plan::{Plan, StyledPlan};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

const DEVICE_HEADER: &str = "x-device-id";
const ADMIN_HEADER: &str = "x-admin-token";

/// Maximum accepted artifact size (64MB).
const MAX_ARTIFACT_LEN: usize = 64 * 1_024 * 1_024;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Non-success status. Displays the backend's own message verbatim.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("backend unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned an unexpected body: {0}")]
    InvalidBody(String),

    #[error("artifact too large: {0} bytes")]
    TooLarge(usize),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Message for a failed response: `detail` when present, else a generic line.
pub fn error_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail);
    match detail {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Some(other) if !other.is_null() && !other.is_string() => other.to_string(),
        _ => format!("Backend error: status {status}"),
    }
}

// =============================================================================
// Device fingerprint
// =============================================================================

/// Stable identifier derived from user agent, screen and timezone.
///
/// Only used for soft rate limiting on the backend; it is trivially forged and
/// must not be treated as an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    pub fn new(user_agent: &str, screen: &str, timezone: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (idx, part) in [user_agent, screen, timezone].iter().enumerate() {
            if idx > 0 {
                hasher.update(b"|");
            }
            hasher.update(part.as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    /// Fingerprint of the current process environment.
    pub fn current() -> Self {
        let user_agent = format!(
            "docsmith/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let screen = format!(
            "{}x{}",
            std::env::var("COLUMNS").unwrap_or_else(|_| "80".into()),
            std::env::var("LINES").unwrap_or_else(|_| "24".into())
        );
        let timezone = chrono::Local::now().offset().to_string();
        Self::new(&user_agent, &screen, &timezone)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Output format of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionFormat {
    Docx,
    Pptx,
    Pdf,
}

impl ConversionFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Pdf => "pdf",
        }
    }
}

/// A converted file as returned by the backend.
#[derive(Debug, Clone)]
pub struct ConvertedFile {
    pub format: ConversionFormat,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Body for backend-side diagram generation with the caller's own key.
#[derive(Debug, Clone, Serialize)]
pub struct DiagramGenerationRequest {
    pub api_key: String,
    pub diagram_type: String,
    pub description: String,
    pub use_icons: bool,
}

#[derive(Deserialize)]
struct DiagramGenerationResponse {
    code: String,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    topic: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub status: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct ConversionClient {
    client: reqwest::Client,
    base_url: String,
    device_id: DeviceFingerprint,
    admin_token: Option<String>,
}

impl ConversionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        Self::with_device(base_url, timeout, DeviceFingerprint::current())
    }

    pub fn with_device(
        base_url: impl Into<String>,
        timeout: Duration,
        device_id: DeviceFingerprint,
    ) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackendError::Config("backend url is empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            device_id,
            admin_token: None,
        })
    }

    /// Attach an admin token; blank tokens are ignored.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn device_id(&self) -> &DeviceFingerprint {
        &self.device_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(DEVICE_HEADER, self.device_id.as_str());
        match &self.admin_token {
            Some(token) => builder.header(ADMIN_HEADER, token),
            None => builder,
        }
    }

    /// Send and collect the body, mapping non-2xx statuses to errors.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<(Vec<u8>, Option<String>), BackendError> {
        let mut response = self.decorate(builder).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_ARTIFACT_LEN {
                return Err(BackendError::TooLarge(new_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(status.as_u16(), &bytes),
            });
        }
        Ok((bytes, content_type))
    }

    /// Convert a plan into a file. One POST, no retry.
    pub async fn convert<P: Plan>(
        &self,
        format: ConversionFormat,
        plan: &P,
        style: Option<&str>,
    ) -> Result<ConvertedFile, BackendError> {
        let body = StyledPlan {
            plan,
            style: style.map(str::trim).filter(|s| !s.is_empty()),
        };
        let url = self.url(&format!("/api/generate/{}", format.extension()));
        let (bytes, content_type) = self.send(self.client.post(url).json(&body)).await?;
        debug!(format = format.extension(), bytes = bytes.len(), "converted plan");
        Ok(ConvertedFile {
            format,
            bytes,
            content_type,
        })
    }

    /// Generate Mermaid code on the backend with the caller's own model key.
    pub async fn generate_diagram(
        &self,
        request: &DiagramGenerationRequest,
    ) -> Result<String, BackendError> {
        let url = self.url("/api/generate/diagram");
        let (bytes, _) = self.send(self.client.post(url).json(request)).await?;
        let parsed: DiagramGenerationResponse = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::InvalidBody(e.to_string()))?;
        Ok(parsed.code)
    }

    /// Ask the backend for a plan instead of a model. The raw body is returned
    /// so it goes through the same sanitize and parse path as model output.
    pub async fn generate_plan(&self, topic: &str, kind: &str) -> Result<String, BackendError> {
        let url = self.url("/api/generate/plan");
        let body = PlanRequest { topic, kind };
        let (bytes, _) = self.send(self.client.post(url).json(&body)).await?;
        String::from_utf8(bytes).map_err(|e| BackendError::InvalidBody(e.to_string()))
    }

    pub async fn health(&self) -> Result<HealthStatus, BackendError> {
        let url = self.url("/api/health");
        let (bytes, _) = self.send(self.client.get(url)).await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidBody(e.to_string()))
    }
}
