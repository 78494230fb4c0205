//! OpenAI-compatible chat completions adapter
//!
//! Talks to any endpoint implementing `POST /chat/completions` and
//! `GET /models` with bearer auth (OpenRouter by default).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use super::adapter::{
    AdapterCapabilities, CompletionRequest, HealthStatus, ModelAdapter, ModelResponse,
    ResponseFormat,
};
use super::types::{ChatRequest, ChatResponse, FinishReason, Message, ModelList};
use crate::error::{Error, Result};

/// OpenRouter API base URL
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default HTTP timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Retry-after used when a 429 carries no hint
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Adapter for one model behind an OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    http_client: HttpClient,
    model_id: String,
    api_key: String,
    base_url: String,
    capabilities: AdapterCapabilities,
}

impl std::fmt::Debug for OpenAiCompatibleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAdapter")
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Builder for [`OpenAiCompatibleAdapter`]
pub struct OpenAiCompatibleAdapterBuilder {
    model_id: String,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    capabilities: Option<AdapterCapabilities>,
}

impl OpenAiCompatibleAdapterBuilder {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            timeout_secs: None,
            capabilities: None,
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to OpenRouter)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn capabilities(mut self, capabilities: AdapterCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn build(self) -> Result<OpenAiCompatibleAdapter> {
        let api_key = self
            .api_key
            .ok_or_else(|| Error::Configuration("API key is required".to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(
                self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;

        let capabilities = self
            .capabilities
            .unwrap_or_else(|| infer_capabilities(&self.model_id));

        Ok(OpenAiCompatibleAdapter {
            http_client,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model_id: self.model_id,
            capabilities,
        })
    }
}

/// Capability guess from well-known model families
fn infer_capabilities(model_id: &str) -> AdapterCapabilities {
    let model = model_id.to_lowercase();
    let is_reasoning_model = model.contains("/o1")
        || model.contains("/o3")
        || model.contains("opus")
        || model.contains("reasoner");
    AdapterCapabilities {
        supports_json_mode: model.starts_with("openai/"),
        supports_streaming: true,
        is_reasoning_model,
    }
}

impl OpenAiCompatibleAdapter {
    pub fn builder(model_id: impl Into<String>) -> OpenAiCompatibleAdapterBuilder {
        OpenAiCompatibleAdapterBuilder::new(model_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        let chat = ChatRequest::new(self.model_id.clone(), messages)
            .with_temperature(request.temperature)
            .with_max_tokens(request.max_tokens);

        if request.response_format == ResponseFormat::Json && self.capabilities.supports_json_mode {
            chat.with_json_mode()
        } else {
            chat
        }
    }

    /// Map an error status to a crate error
    async fn handle_error_response<T>(
        &self,
        status: reqwest::StatusCode,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body))
    }
}

fn status_error(status: u16, body: &str) -> Error {
    match status {
        401 => Error::Provider(
            "Unauthorized: Invalid API key. Set ROUTEWISE_API_KEY or OPENROUTER_API_KEY environment variable."
                .to_string(),
        ),
        402 => Error::Provider("Payment required: Insufficient credits".to_string()),
        403 => Error::Provider(format!("Forbidden: {}", body)),
        404 => Error::Provider(format!("Model not found or endpoint unavailable: {}", body)),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        400 => Error::InvalidInput(format!("Bad request: {}", body)),
        500..=599 => Error::Provider(format!("Server error ({}): {}", status, body)),
        _ => Error::Provider(format!("HTTP error {}: {}", status, body)),
    }
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    if let Some(retry_after) = json.get("retry_after").and_then(|v| v.as_u64()) {
        return Some(retry_after);
    }
    json.get("error")
        .and_then(|e| e.get("retry_after"))
        .and_then(|v| v.as_u64())
}

fn into_model_response(
    chat: ChatResponse,
    model_id: &str,
    latency_ms: u64,
) -> Result<ModelResponse> {
    let choice = chat
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("Empty response from API".to_string()))?;

    let (prompt_tokens, completion_tokens) = chat
        .usage
        .map(|u| (u64::from(u.prompt_tokens), u64::from(u.completion_tokens)))
        .unwrap_or((0, 0));

    let mut response = ModelResponse::new(model_id, choice.message.content)
        .with_usage(prompt_tokens, completion_tokens)
        .with_latency(latency_ms)
        .with_finish_reason(
            choice
                .finish_reason
                .unwrap_or(FinishReason::Unknown)
                .to_string(),
        );
    if !chat.id.is_empty() {
        response = response.with_request_id(chat.id);
    }
    Ok(response)
}

#[async_trait]
impl ModelAdapter for OpenAiCompatibleAdapter {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let chat_request = self.chat_request(request);

        debug!(
            model = %self.model_id,
            messages = chat_request.messages.len(),
            max_tokens = request.max_tokens,
            "Sending chat completion request"
        );

        let started = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Routewise")
            .json(&chat_request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse response: {}", e)))?;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        into_model_response(chat_response, &self.model_id, latency_ms)
    }

    async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/models", self.base_url);
        let started = Instant::now();

        let result = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<ModelList>().await {
                    Ok(list) if !list.data.is_empty() && !list.data.iter().any(|m| m.id == self.model_id) => {
                        HealthStatus::unhealthy(latency_ms, "model not listed by endpoint")
                    }
                    _ => HealthStatus::healthy(latency_ms),
                }
            }
            Ok(response) => {
                let status = response.status();
                warn!(model = %self.model_id, status = %status, "Health check returned error status");
                HealthStatus::unhealthy(latency_ms, format!("HTTP {}", status))
            }
            Err(e) => HealthStatus::unhealthy(latency_ms, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Choice, Usage};

    fn adapter(model_id: &str) -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::builder(model_id)
            .api_key("test-key")
            .base_url("https://example.com/v1/")
            .timeout_secs(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_api_key() {
        let err = OpenAiCompatibleAdapter::builder("openai/gpt-4o")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "E100");
    }

    #[test]
    fn test_builder_trims_base_url() {
        let adapter = adapter("openai/gpt-4o");
        assert_eq!(adapter.base_url(), "https://example.com/v1");
        assert_eq!(adapter.provider(), "openai");
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("test-key"));
    }

    #[test]
    fn test_capability_inference() {
        assert!(adapter("openai/o3-mini").capabilities().is_reasoning_model);
        assert!(adapter("openai/gpt-4o").capabilities().supports_json_mode);
        assert!(!adapter("anthropic/claude-sonnet-4-20250514").capabilities().is_reasoning_model);
    }

    #[test]
    fn test_chat_request_mapping() {
        let request = CompletionRequest::new("Classify this ticket")
            .with_system_prompt(Some("You are a triage bot".to_string()))
            .with_max_tokens(50)
            .with_response_format(ResponseFormat::Json);

        let chat = adapter("openai/gpt-4o-mini").chat_request(&request);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].content, "You are a triage bot");
        assert_eq!(chat.max_tokens, Some(50));
        assert!(chat.response_format.is_some());

        // JSON mode is dropped for models that do not advertise it
        let chat = adapter("anthropic/claude-3-5-haiku-latest").chat_request(&request);
        assert!(chat.response_format.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(401, ""), Error::Provider(_)));
        assert!(matches!(status_error(404, "gone"), Error::Provider(_)));
        assert!(matches!(status_error(503, "busy"), Error::Provider(_)));
        assert!(matches!(
            status_error(429, r#"{"error": {"retry_after": 7}}"#),
            Error::RateLimited(7)
        ));
        assert!(matches!(status_error(429, "slow down"), Error::RateLimited(60)));
        assert!(status_error(502, "").is_retryable());
    }

    #[test]
    fn test_into_model_response() {
        let chat = ChatResponse {
            id: "gen-42".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("billing"),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(Usage {
                prompt_tokens: 40,
                completion_tokens: 2,
                total_tokens: 42,
            }),
        };

        let response = into_model_response(chat, "openai/gpt-4o-mini", 310).unwrap();
        assert_eq!(response.content, "billing");
        assert_eq!(response.total_tokens, 42);
        assert_eq!(response.latency_ms, 310);
        assert_eq!(response.request_id.as_deref(), Some("gen-42"));
        assert_eq!(response.provider, "openai");
    }

    #[test]
    fn test_empty_choices_is_provider_error() {
        let chat = ChatResponse {
            id: String::new(),
            model: "m/x".to_string(),
            choices: vec![],
            usage: None,
        };
        let err = into_model_response(chat, "m/x", 0).unwrap_err();
        assert!(err.is_retryable());
    }
}
