//! Generator configuration: JSON file, then environment overrides.
//!
//! Recognized variables:
//! - `DOCSMITH_API_KEY`, `DOCSMITH_CHAT_BASE_URL`, `DOCSMITH_CHAT_TIMEOUT_SECONDS`
//! - `DOCSMITH_BACKEND_URL`
//! - `DOCSMITH_STATE_PATH`
//! - `DOCSMITH_MMDC`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_BACKEND_URL;
use crate::delivery::ContentKind;
use crate::fallback::ModelCandidates;
use crate::gateway::chat_completions::DEFAULT_BASE_URL;
use crate::render::DEFAULT_MMDC;

const DIAGRAM_MODELS: [&str; 3] = ["gemini-2.0-flash", "gemini-1.5-flash", "gpt-4o-mini"];
const DOCUMENT_MODELS: [&str; 3] = ["gemini-2.0-flash", "gemini-1.5-flash", "gpt-4o-mini"];
const PRESENTATION_MODELS: [&str; 4] = [
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gpt-4o-mini",
    "claude-sonnet-4",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub diagram: ModelCandidates,
    pub document: ModelCandidates,
    pub presentation: ModelCandidates,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            diagram: ModelCandidates::from_static(&DIAGRAM_MODELS),
            document: ModelCandidates::from_static(&DOCUMENT_MODELS),
            presentation: ModelCandidates::from_static(&PRESENTATION_MODELS),
        }
    }
}

impl ModelConfig {
    pub fn for_kind(&self, kind: ContentKind) -> &ModelCandidates {
        match kind {
            ContentKind::Diagram => &self.diagram,
            ContentKind::Document => &self.document,
            ContentKind::Presentation => &self.presentation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.into(),
            timeout_seconds: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub mmdc: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mmdc: PathBuf::from(DEFAULT_MMDC),
            timeout_seconds: 60,
        }
    }
}

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub chat: ChatConfig,
    pub models: ModelConfig,
    pub backend: BackendConfig,
    pub renderer: RendererConfig,
    pub state_path: PathBuf,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            chat: ChatConfig::default(),
            models: ModelConfig::default(),
            backend: BackendConfig::default(),
            renderer: RendererConfig::default(),
            state_path: PathBuf::from(".docsmith_state.sqlite"),
        }
    }
}

impl GeneratorConfig {
    /// Defaults, overlaid with `path` when given, then with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("DOCSMITH_API_KEY") {
            self.chat.api_key = Some(key);
        }
        if let Some(url) = var("DOCSMITH_CHAT_BASE_URL") {
            self.chat.base_url = url;
        }
        if let Some(raw) = var("DOCSMITH_CHAT_TIMEOUT_SECONDS") {
            self.chat.timeout_seconds = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DOCSMITH_CHAT_TIMEOUT_SECONDS",
                value: raw.clone(),
            })?;
        }
        if let Some(url) = var("DOCSMITH_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(path) = var("DOCSMITH_STATE_PATH") {
            self.state_path = PathBuf::from(path);
        }
        if let Some(path) = var("DOCSMITH_MMDC") {
            self.renderer.mmdc = PathBuf::from(path);
        }
        Ok(self)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat.timeout_seconds)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_seconds)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.renderer.timeout_seconds)
    }
}
