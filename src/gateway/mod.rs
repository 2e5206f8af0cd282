//! Chat gateway for OpenAI-compatible completion services.

pub mod chat_completions;
pub mod error;
pub mod types;
pub mod usage;

use std::sync::Arc;

use chat_completions::{ChatCompletionsAdapter, ChatProvider};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Single-attempt gateway: one HTTP call per `chat`, recorded in the usage sink.
///
/// Retrying is the fallback executor's job (next candidate), never this layer's.
pub struct ProviderGateway<U: UsageSinkTrait> {
    adapter: ChatCompletionsAdapter,
    usage_sink: Arc<U>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let adapter = ChatCompletionsAdapter::from_env()?;
        Ok(Self {
            adapter,
            usage_sink,
        })
    }

    pub fn new(adapter: ChatCompletionsAdapter, usage_sink: Arc<U>) -> Self {
        Self {
            adapter,
            usage_sink,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let result = self.adapter.chat(&req).await;

        let record = ProviderCallRecord::new(
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .request(req.attribution.request_id);

        let record = match &result {
            Ok(resp) => record
                .tokens(resp.input_tokens, resp.output_tokens)
                .latency(resp.latency.as_millis() as u64),
            Err(err) => record.error(err.code()),
        };
        self.usage_sink.record(record).await;

        result
    }
}
