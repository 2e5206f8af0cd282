//! Ordered model fallback.
//!
//! Tries each candidate model exactly once, in priority order, and returns the
//! first successful response. Later candidates are never called once one
//! succeeds. There is no backoff and no memory of earlier failures: every call
//! to [`run_fallback`] starts from the top of the list.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ChatResponse, ProviderError};

/// User-facing message when every candidate failed.
pub const ALL_MODELS_FAILED: &str = "All AI models failed to respond. Please try again later.";

// =============================================================================
// Candidates
// =============================================================================

/// Non-empty, priority-ordered list of model identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ModelCandidates(Vec<String>);

impl ModelCandidates {
    /// Build a candidate list. Blank identifiers are dropped; nothing left is an error.
    pub fn new<I, S>(models: I) -> Result<Self, FallbackError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models: Vec<String> = models
            .into_iter()
            .map(Into::into)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(FallbackError::NoModels);
        }
        Ok(Self(models))
    }

    /// Built-in lists, known to be non-empty.
    pub(crate) fn from_static(models: &[&str]) -> Self {
        debug_assert!(!models.is_empty());
        Self(models.iter().map(|m| m.to_string()).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most preferred model.
    pub fn primary(&self) -> &str {
        &self.0[0]
    }
}

impl TryFrom<Vec<String>> for ModelCandidates {
    type Error = FallbackError;

    fn try_from(models: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(models)
    }
}

impl From<ModelCandidates> for Vec<String> {
    fn from(c: ModelCandidates) -> Self {
        c.0
    }
}

// =============================================================================
// Outcome and errors
// =============================================================================

/// One candidate that was tried and failed.
#[derive(Debug)]
pub struct FailedAttempt {
    pub model: String,
    pub error: ProviderError,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// Result of a successful fallback run.
#[derive(Debug)]
pub struct FallbackOutcome {
    /// Model that produced the response.
    pub model: String,
    /// The raw response. Content may be empty.
    pub response: ChatResponse,
    /// Candidates tried (and failed) before the winner, in order.
    pub failures: Vec<FailedAttempt>,
}

impl FallbackOutcome {
    pub fn content(&self) -> &str {
        &self.response.content
    }

    pub fn into_content(self) -> String {
        self.response.content
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("no models configured")]
    NoModels,
    #[error("All AI models failed to respond. Please try again later.")]
    Exhausted { attempts: Vec<FailedAttempt> },
}

impl FallbackError {
    /// Per-candidate failures joined for logs, e.g. `"a: http error ...; b: ..."`.
    pub fn detail(&self) -> String {
        match self {
            Self::NoModels => "no models configured".into(),
            Self::Exhausted { attempts } => attempts
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Sampling options shared by every candidate in one run.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            json_mode: false,
        }
    }
}

impl CallOptions {
    /// Options for calls that must answer with a JSON object.
    pub fn json() -> Self {
        Self {
            json_mode: true,
            ..Self::default()
        }
    }
}

/// Run `prompt` against each candidate in order until one succeeds.
pub async fn run_fallback(
    gateway: &dyn ChatGateway,
    candidates: &ModelCandidates,
    prompt: &str,
    options: CallOptions,
    attribution: Attribution,
) -> Result<FallbackOutcome, FallbackError> {
    let mut failures: Vec<FailedAttempt> = Vec::new();

    for model in candidates.as_slice() {
        let mut req = ChatRequest::prompt(ChatModel::new(model), prompt, attribution.clone())
            .temperature(options.temperature);
        if let Some(max) = options.max_tokens {
            req = req.max_tokens(max);
        }
        if options.json_mode {
            req = req.json();
        }

        let start = Instant::now();
        match gateway.chat(req).await {
            Ok(response) => {
                info!(
                    model = %model,
                    caller = attribution.caller,
                    failed_before = failures.len(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "used model"
                );
                return Ok(FallbackOutcome {
                    model: model.clone(),
                    response,
                    failures,
                });
            }
            Err(error) => {
                warn!(
                    model = %model,
                    caller = attribution.caller,
                    code = error.code(),
                    http_status = ?error.http_status(),
                    provider_request_id = ?error.request_id(),
                    error = %error,
                    "model failed"
                );
                failures.push(FailedAttempt {
                    model: model.clone(),
                    error,
                });
            }
        }
    }

    Err(FallbackError::Exhausted { attempts: failures })
}
