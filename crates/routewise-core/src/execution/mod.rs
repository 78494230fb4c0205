//! Task execution
//!
//! [`ExecutionCoordinator`] runs one task end to end: route, consult the
//! response cache, call the provider with retries and a per-call deadline,
//! fall back to the tier's second model, account cost and store the answer.
//!
//! Submitters never see an `Err`; every outcome is an [`ExecutionResult`]
//! with `success`, an `error_code` and the ordered retry reasons.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, ResponseCache};
use crate::config::Config;
use crate::cost::CostTracker;
use crate::error::Error;
use crate::llm::{AdapterRegistry, CompletionRequest, ModelResponse, ResponseFormat};
use crate::quality::ValidationVerdict;
use crate::routing::{RoutingDecision, RoutingEngine, Task};

/// Routing produced no model
pub const ROUTING_FAILED: &str = "routing_failed";
/// Model id could not be resolved to an adapter
pub const CONFIGURATION_ERROR: &str = "configuration_error";
/// The caller cancelled the task
pub const CANCELLED: &str = "cancelled";
/// Every attempt failed
pub const EXECUTION_FAILED: &str = "execution_failed";

/// Default base delay for linear backoff
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Default per-call deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry reason appended when a quality retry replaces a result
pub const QUALITY_RETRY_REASON: &str = "quality_below_threshold";

/// Outcome of executing one task
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub response: Option<ModelResponse>,
    /// Absent only when routing itself failed
    pub decision: Option<RoutingDecision>,
    pub verdict: Option<ValidationVerdict>,
    pub actual_cost: f64,
    pub cost_saved: f64,
    /// Failed attempts before the returned response
    pub retries: u32,
    pub retry_reasons: Vec<String>,
    pub quality_warning: bool,
    pub fallback_used: bool,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl ExecutionResult {
    fn failure(decision: Option<RoutingDecision>, code: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            fallback_used: decision.as_ref().is_some_and(|d| d.fallback_used),
            decision,
            verdict: None,
            actual_cost: 0.0,
            cost_saved: 0.0,
            retries: 0,
            retry_reasons: Vec::new(),
            quality_warning: false,
            cache_hit: false,
            latency_ms: 0,
            error: Some(error.into()),
            error_code: Some(code.to_string()),
        }
    }

    fn cached(decision: RoutingDecision, entry: CacheEntry) -> Self {
        let response = ModelResponse::new(entry.model.clone(), entry.response);
        let fallback_used = decision.fallback_used;
        Self {
            success: true,
            response: Some(response),
            decision: Some(decision),
            verdict: None,
            actual_cost: 0.0,
            cost_saved: entry.original_cost,
            retries: 0,
            retry_reasons: Vec::new(),
            quality_warning: false,
            fallback_used,
            cache_hit: true,
            latency_ms: 0,
            error: None,
            error_code: None,
        }
    }

    /// Response text, if the task succeeded
    pub fn content(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.content.as_str())
    }

    fn with_retry_reasons(mut self, reasons: Vec<String>) -> Self {
        self.retries = u32::try_from(reasons.len()).unwrap_or(u32::MAX);
        self.retry_reasons = reasons;
        self
    }

    fn with_latency(mut self, started: Instant) -> Self {
        self.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Runs tasks against providers
pub struct ExecutionCoordinator {
    router: Arc<RoutingEngine>,
    adapters: Arc<AdapterRegistry>,
    cost_tracker: Option<Arc<CostTracker>>,
    cache: Option<Arc<ResponseCache>>,
    similarity_threshold: f64,
    backoff_base: Duration,
    call_timeout: Duration,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("router", &self.router)
            .field("adapters", &self.adapters)
            .field("cache", &self.cache.is_some())
            .field("backoff_base", &self.backoff_base)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ExecutionCoordinator {
    pub fn builder() -> ExecutionCoordinatorBuilder {
        ExecutionCoordinatorBuilder::new()
    }

    pub fn router(&self) -> &Arc<RoutingEngine> {
        &self.router
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn cost_tracker(&self) -> Option<&Arc<CostTracker>> {
        self.cost_tracker.as_ref()
    }

    /// Execute a task with no external cancellation
    pub async fn execute(
        &self,
        task: &Task,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> ExecutionResult {
        self.execute_with_cancel(task, prompt, system_prompt, &CancellationToken::new())
            .await
    }

    /// Execute a task; cancelling `cancel` aborts any in-flight call or wait
    pub async fn execute_with_cancel(
        &self,
        task: &Task,
        prompt: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();

        let decision = match self.router.route(task).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(request_id = %task.request_id, error = %e, "Routing failed");
                return ExecutionResult::failure(None, ROUTING_FAILED, e.to_string())
                    .with_latency(started);
            }
        };

        if let Some(cache) = &self.cache
            && let Some(entry) =
                cache.find_similar_in(prompt, system_prompt, self.similarity_threshold)
        {
            info!(
                request_id = %task.request_id,
                model = %entry.model,
                cost_saved = entry.original_cost,
                "Served from response cache"
            );
            return ExecutionResult::cached(decision, entry).with_latency(started);
        }

        let mut model_id = decision.model_id.clone();
        let mut adapter = match self.adapters.resolve(&model_id) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(model = %model_id, error = %e, "No adapter for routed model");
                return ExecutionResult::failure(Some(decision), CONFIGURATION_ERROR, e.to_string())
                    .with_latency(started);
            }
        };

        let request = CompletionRequest::new(prompt)
            .with_system_prompt(system_prompt.map(str::to_string))
            .with_max_tokens(task.max_tokens)
            .with_temperature(task.temperature)
            .with_response_format(if task.requires_json {
                ResponseFormat::Json
            } else {
                ResponseFormat::Text
            });

        let total_attempts = task.max_retries.saturating_add(1);
        let timeout_ms = u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut fallback_used = decision.fallback_used;
        let mut reasons: Vec<String> = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            debug!(
                request_id = %task.request_id,
                model = %model_id,
                attempt = attempt,
                max = total_attempts,
                "Calling provider"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.cancelled(decision, reasons, fallback_used, started);
                }
                outcome = tokio::time::timeout(self.call_timeout, adapter.complete(&request)) => outcome,
            };

            let error = match outcome {
                Ok(Ok(response)) => {
                    return self.succeed(
                        task,
                        decision,
                        &model_id,
                        response,
                        reasons,
                        fallback_used,
                        (prompt, system_prompt),
                        started,
                    );
                }
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(timeout_ms),
            };

            warn!(
                request_id = %task.request_id,
                model = %model_id,
                attempt = attempt,
                error = %error,
                "Provider call failed"
            );
            reasons.push(format!("attempt {}: {}", attempt, error));
            last_error = error.to_string();

            if attempt == total_attempts {
                break;
            }

            if let Some(fallback) = self
                .router
                .catalog()
                .fallback_model(decision.tier, task.org_id.as_deref())
                && fallback != model_id
            {
                match self.adapters.resolve(&fallback) {
                    Ok(next) => {
                        info!(from = %model_id, to = %fallback, "Switching to fallback model");
                        adapter = next;
                        model_id = fallback;
                        fallback_used = true;
                    }
                    Err(e) => debug!(model = %fallback, error = %e, "Fallback model unresolvable"),
                }
            }

            let delay = self.backoff_base.saturating_mul(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.cancelled(decision, reasons, fallback_used, started);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        warn!(
            request_id = %task.request_id,
            attempts = total_attempts,
            "All attempts exhausted"
        );
        let mut result = ExecutionResult::failure(Some(decision), EXECUTION_FAILED, last_error)
            .with_retry_reasons(reasons)
            .with_latency(started);
        result.fallback_used = fallback_used;
        result
    }

    fn cancelled(
        &self,
        decision: RoutingDecision,
        reasons: Vec<String>,
        fallback_used: bool,
        started: Instant,
    ) -> ExecutionResult {
        info!(model = %decision.model_id, "Execution cancelled");
        let mut result =
            ExecutionResult::failure(Some(decision), CANCELLED, Error::Cancelled.to_string())
                .with_retry_reasons(reasons)
                .with_latency(started);
        result.fallback_used = fallback_used;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        task: &Task,
        decision: RoutingDecision,
        model_id: &str,
        response: ModelResponse,
        reasons: Vec<String>,
        fallback_used: bool,
        (prompt, system_prompt): (&str, Option<&str>),
        started: Instant,
    ) -> ExecutionResult {
        let cost = self.router.pricing().cost(
            model_id,
            response.prompt_tokens,
            response.completion_tokens,
        );

        if let (Some(tracker), Some(org_id)) = (&self.cost_tracker, task.org_id.as_deref()) {
            tracker.record(
                org_id,
                model_id,
                cost,
                response.prompt_tokens,
                response.completion_tokens,
            );
        }

        if let Some(cache) = &self.cache {
            cache.put_in(prompt, system_prompt, &response.content, model_id, cost);
        }

        info!(
            request_id = %task.request_id,
            model = %model_id,
            cost = cost,
            retries = reasons.len(),
            "Task executed"
        );

        ExecutionResult {
            success: true,
            response: Some(response),
            decision: Some(decision),
            verdict: None,
            actual_cost: cost,
            cost_saved: 0.0,
            retries: 0,
            retry_reasons: Vec::new(),
            quality_warning: false,
            fallback_used,
            cache_hit: false,
            latency_ms: 0,
            error: None,
            error_code: None,
        }
        .with_retry_reasons(reasons)
        .with_latency(started)
    }
}

/// Builder for [`ExecutionCoordinator`]
pub struct ExecutionCoordinatorBuilder {
    router: Option<Arc<RoutingEngine>>,
    adapters: Option<Arc<AdapterRegistry>>,
    cost_tracker: Option<Arc<CostTracker>>,
    cache: Option<Arc<ResponseCache>>,
    similarity_threshold: f64,
    backoff_base: Duration,
    call_timeout: Duration,
}

impl Default for ExecutionCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            router: None,
            adapters: None,
            cost_tracker: None,
            cache: None,
            similarity_threshold: crate::cache::DEFAULT_SIMILARITY_THRESHOLD,
            backoff_base: DEFAULT_BACKOFF_BASE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Apply cache and execution settings from config
    pub fn config(mut self, config: &Config) -> Self {
        self.similarity_threshold = config.cache.similarity_threshold;
        self.backoff_base = Duration::from_millis(config.execution.backoff_base_ms);
        self.call_timeout = Duration::from_secs(config.execution.call_timeout_secs);
        self
    }

    pub fn router(mut self, router: Arc<RoutingEngine>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> ExecutionCoordinator {
        ExecutionCoordinator {
            router: self.router.unwrap_or_default(),
            adapters: self.adapters.unwrap_or_default(),
            cost_tracker: self.cost_tracker,
            cache: self.cache,
            similarity_threshold: self.similarity_threshold,
            backoff_base: self.backoff_base,
            call_timeout: self.call_timeout,
        }
    }
}
