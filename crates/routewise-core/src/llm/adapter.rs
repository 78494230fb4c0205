//! Provider adapter contract
//!
//! Every provider integration implements [`ModelAdapter`]. The engine never
//! speaks a wire protocol itself; it hands a [`CompletionRequest`] to an
//! adapter and gets a [`ModelResponse`] back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::routing::provider_of;

/// Output format requested from the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A single completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 1000,
            temperature: 0.7,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }
}

/// Normalized model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model_id: String,
    pub provider: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    pub finish_reason: String,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ModelResponse {
    pub fn new(model_id: impl Into<String>, content: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let provider = provider_of(&model_id).to_string();
        Self {
            content: content.into(),
            model_id,
            provider,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            latency_ms: 0,
            finish_reason: "stop".to_string(),
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Set prompt/completion counts; total is their sum
    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self.total_tokens = prompt_tokens + completion_tokens;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = reason.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Result of an adapter health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
        }
    }

    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// What an adapter's model can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub supports_json_mode: bool,
    pub supports_streaming: bool,
    pub is_reasoning_model: bool,
}

/// A provider integration bound to one model
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Full `provider/model` identifier
    fn model_id(&self) -> &str;

    fn provider(&self) -> &str {
        provider_of(self.model_id())
    }

    fn capabilities(&self) -> AdapterCapabilities;

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse>;

    async fn health_check(&self) -> HealthStatus;

    /// Approximate token count (about four characters per token)
    fn estimate_tokens(&self, text: &str) -> u32 {
        u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ModelAdapter for Echo {
        fn model_id(&self) -> &str {
            "local/echo"
        }

        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities::default()
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
            Ok(ModelResponse::new(self.model_id(), request.prompt.clone()))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::healthy(0)
        }
    }

    #[test]
    fn test_default_provider_and_token_estimate() {
        let adapter = Echo;
        assert_eq!(adapter.provider(), "local");
        assert_eq!(adapter.estimate_tokens("abcdefgh"), 2);
        assert_eq!(adapter.estimate_tokens(""), 0);
    }

    #[tokio::test]
    async fn test_adapter_is_object_safe() {
        let adapter: Box<dyn ModelAdapter> = Box::new(Echo);
        let response = adapter
            .complete(&CompletionRequest::new("ping"))
            .await
            .unwrap();
        assert_eq!(response.content, "ping");
        assert_eq!(response.provider, "local");
    }

    #[test]
    fn test_response_usage_totals() {
        let response = ModelResponse::new("openai/gpt-4o", "hi").with_usage(120, 30);
        assert_eq!(response.total_tokens, 150);
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("list colors")
            .with_system_prompt(Some("Answer in JSON".to_string()))
            .with_max_tokens(64)
            .with_response_format(ResponseFormat::Json);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.response_format, ResponseFormat::Json);
        assert_eq!(request.system_prompt.as_deref(), Some("Answer in JSON"));
    }
}
