//! Output quality gate
//!
//! [`QualityRetryLoop`] wraps an [`ExecutionCoordinator`]: it runs a task,
//! asks an [`OutputValidator`] for a verdict, and when the verdict falls
//! short re-runs the task once with a feedback prompt describing what was
//! wrong. Scoring itself is out of scope; only the verdict is consumed.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::execution::{ExecutionCoordinator, ExecutionResult, QUALITY_RETRY_REASON};
use crate::llm::ModelResponse;
use crate::routing::Task;

/// A validator's judgement of one response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// 0.0 to 1.0
    pub score: f64,
    pub format_errors: Vec<String>,
    pub missing_fields: Vec<String>,
    pub failed_criteria: Vec<String>,
}

impl ValidationVerdict {
    pub fn pass(score: f64) -> Self {
        Self {
            is_valid: true,
            score: score.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn fail(score: f64) -> Self {
        Self {
            is_valid: false,
            score: score.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    pub fn with_format_error(mut self, error: impl Into<String>) -> Self {
        self.format_errors.push(error.into());
        self
    }

    pub fn with_missing_field(mut self, field: impl Into<String>) -> Self {
        self.missing_fields.push(field.into());
        self
    }

    pub fn with_failed_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.failed_criteria.push(criterion.into());
        self
    }

    /// Valid and scored at or above `threshold`
    pub fn meets(&self, threshold: f64) -> bool {
        self.is_valid && self.score >= threshold
    }
}

/// Judges a model response for a task
#[async_trait]
pub trait OutputValidator: Send + Sync {
    async fn validate(&self, task: &Task, response: &ModelResponse) -> ValidationVerdict;
}

/// Prompt asking the model to revise a rejected response
pub fn build_feedback_prompt(
    original_prompt: &str,
    previous_response: &str,
    verdict: &ValidationVerdict,
    threshold: f64,
) -> String {
    let mut prompt = String::with_capacity(original_prompt.len() + previous_response.len() + 256);
    prompt.push_str(original_prompt);
    prompt.push_str("\n\n---\nYour previous response did not meet the quality bar.\n\n");
    prompt.push_str("Previous response:\n");
    prompt.push_str(previous_response);
    prompt.push_str("\n\nIssues to fix:\n");

    for error in &verdict.format_errors {
        let _ = writeln!(prompt, "- Format error: {}", error);
    }
    for field in &verdict.missing_fields {
        let _ = writeln!(prompt, "- Missing field: {}", field);
    }
    for criterion in &verdict.failed_criteria {
        let _ = writeln!(prompt, "- Failed criterion: {}", criterion);
    }
    let _ = writeln!(
        prompt,
        "- Quality score: {:.2} (required {:.2})",
        verdict.score, threshold
    );

    prompt.push_str("\nRevise the response to address every issue above.");
    prompt
}

/// One bounded validate-and-retry cycle around an [`ExecutionCoordinator`]
#[derive(Debug, Clone)]
pub struct QualityRetryLoop {
    coordinator: Arc<ExecutionCoordinator>,
}

impl QualityRetryLoop {
    pub fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// Execute a task, retrying once with feedback if validation fails.
    ///
    /// Without a validator this is a plain execution. A failed retry keeps
    /// the first result and flags `quality_warning`.
    pub async fn execute_with_validation(
        &self,
        task: &Task,
        prompt: &str,
        system_prompt: Option<&str>,
        validator: Option<&dyn OutputValidator>,
    ) -> ExecutionResult {
        let mut first = self.coordinator.execute(task, prompt, system_prompt).await;

        let Some(validator) = validator else {
            return first;
        };
        if !first.success {
            return first;
        }
        let Some(response) = first.response.as_ref() else {
            return first;
        };

        let verdict = validator.validate(task, response).await;
        if verdict.meets(task.quality_threshold) {
            first.verdict = Some(verdict);
            return first;
        }

        // A rejected answer must not be served again from the cache
        if let Some(cache) = self.coordinator.cache() {
            cache.remove_in(prompt, system_prompt);
        }

        if first.retries >= task.max_retries {
            warn!(
                request_id = %task.request_id,
                score = verdict.score,
                retries = first.retries,
                "Quality below threshold with no retries left"
            );
            first.quality_warning = true;
            first.verdict = Some(verdict);
            return first;
        }

        info!(
            request_id = %task.request_id,
            score = verdict.score,
            threshold = task.quality_threshold,
            "Quality below threshold, retrying with feedback"
        );

        let feedback = build_feedback_prompt(prompt, &response.content, &verdict, task.quality_threshold);
        let mut retry = self.coordinator.execute(task, &feedback, system_prompt).await;

        if !retry.success {
            warn!(
                request_id = %task.request_id,
                error = retry.error.as_deref().unwrap_or_default(),
                "Quality retry failed, keeping first response"
            );
            first.quality_warning = true;
            first.verdict = Some(verdict);
            return first;
        }

        if let Some(response) = retry.response.as_ref() {
            let retry_verdict = validator.validate(task, response).await;
            retry.quality_warning = !retry_verdict.meets(task.quality_threshold);
            retry.verdict = Some(retry_verdict);
        }

        let mut reasons = first.retry_reasons;
        reasons.push(QUALITY_RETRY_REASON.to_string());
        retry.retry_reasons = reasons;
        retry.retries = first.retries + 1;
        retry.actual_cost += first.actual_cost;
        retry.cost_saved += first.cost_saved;
        retry.latency_ms += first.latency_ms;
        retry.fallback_used |= first.fallback_used;
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::cache::ResponseCache;
    use crate::catalog::{CatalogEntry, ModelCatalog};
    use crate::llm::{
        AdapterCapabilities, AdapterRegistry, CompletionRequest, HealthStatus, ModelAdapter,
    };
    use crate::routing::{ModelTier, RoutingEngine, TaskType};
    use std::sync::Mutex;

    /// Returns a canned answer per call and remembers the prompts it saw
    struct Recorder {
        answers: Vec<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(answers: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                answers,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelAdapter for Recorder {
        fn model_id(&self) -> &str {
            "test/model"
        }

        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities::default()
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
            let mut prompts = self.prompts.lock().unwrap();
            let answer = self.answers[prompts.len().min(self.answers.len() - 1)];
            prompts.push(request.prompt.clone());
            Ok(ModelResponse::new("test/model", answer).with_usage(100, 100))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::healthy(0)
        }
    }

    /// Accepts only responses containing "summary"
    struct MentionsSummary;

    #[async_trait]
    impl OutputValidator for MentionsSummary {
        async fn validate(&self, _task: &Task, response: &ModelResponse) -> ValidationVerdict {
            if response.content.contains("summary") {
                ValidationVerdict::pass(0.9)
            } else {
                ValidationVerdict::fail(0.3)
                    .with_missing_field("summary")
                    .with_failed_criterion("must summarize")
            }
        }
    }

    fn quality_loop(adapter: Arc<Recorder>, cache: Option<Arc<ResponseCache>>) -> QualityRetryLoop {
        let catalog = Arc::new(ModelCatalog::empty());
        catalog.register(CatalogEntry::new("test/model", ModelTier::Conversation));
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(adapter);

        let mut builder = ExecutionCoordinator::builder()
            .router(Arc::new(RoutingEngine::builder().catalog(catalog).build()))
            .adapters(registry);
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        QualityRetryLoop::new(Arc::new(builder.build()))
    }

    #[test]
    fn test_feedback_prompt_lists_issues() {
        let verdict = ValidationVerdict::fail(0.42)
            .with_format_error("not JSON")
            .with_missing_field("owner")
            .with_failed_criterion("cites sources");
        let prompt = build_feedback_prompt("Write the report", "draft text", &verdict, 0.7);

        assert!(prompt.starts_with("Write the report"));
        assert!(prompt.contains("Previous response:\ndraft text"));
        assert!(prompt.contains("- Format error: not JSON"));
        assert!(prompt.contains("- Missing field: owner"));
        assert!(prompt.contains("- Failed criterion: cites sources"));
        assert!(prompt.contains("- Quality score: 0.42 (required 0.70)"));
    }

    #[test]
    fn test_verdict_meets() {
        assert!(ValidationVerdict::pass(0.7).meets(0.7));
        assert!(!ValidationVerdict::pass(0.69).meets(0.7));
        assert!(!ValidationVerdict::fail(1.0).meets(0.7));
    }

    #[tokio::test]
    async fn test_without_validator_is_plain_execution() {
        let adapter = Recorder::new(vec!["anything"]);
        let quality = quality_loop(adapter.clone(), None);

        let result = quality
            .execute_with_validation(&Task::new(TaskType::Faq), "q", None, None)
            .await;
        assert!(result.success);
        assert!(result.verdict.is_none());
        assert_eq!(adapter.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_passing_verdict_is_attached() {
        let adapter = Recorder::new(vec!["a fine summary"]);
        let quality = quality_loop(adapter.clone(), None);

        let result = quality
            .execute_with_validation(&Task::new(TaskType::Faq), "q", None, Some(&MentionsSummary))
            .await;
        assert!(result.success);
        assert!(!result.quality_warning);
        assert_eq!(result.verdict.map(|v| v.score), Some(0.9));
        assert_eq!(adapter.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_verdict_retries_with_feedback() {
        let adapter = Recorder::new(vec!["rambling", "here is the summary"]);
        let quality = quality_loop(adapter.clone(), None);

        let result = quality
            .execute_with_validation(
                &Task::new(TaskType::Faq),
                "Summarize the memo",
                None,
                Some(&MentionsSummary),
            )
            .await;

        assert!(result.success);
        assert!(!result.quality_warning);
        assert_eq!(result.retries, 1);
        assert_eq!(result.retry_reasons, vec![QUALITY_RETRY_REASON.to_string()]);
        assert_eq!(result.content(), Some("here is the summary"));
        assert!(result.verdict.unwrap().is_valid);

        let prompts = adapter.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("Summarize the memo"));
        assert!(prompts[1].contains("rambling"));
        assert!(prompts[1].contains("- Missing field: summary"));
    }

    #[tokio::test]
    async fn test_no_retry_budget_flags_warning() {
        let adapter = Recorder::new(vec!["rambling"]);
        let quality = quality_loop(adapter.clone(), None);
        let task = Task::new(TaskType::Faq).with_max_retries(0);

        let result = quality
            .execute_with_validation(&task, "q", None, Some(&MentionsSummary))
            .await;
        assert!(result.success);
        assert!(result.quality_warning);
        assert_eq!(result.retries, 0);
        assert_eq!(adapter.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_still_poor_is_flagged() {
        let adapter = Recorder::new(vec!["rambling", "more rambling"]);
        let quality = quality_loop(adapter.clone(), None);

        let result = quality
            .execute_with_validation(&Task::new(TaskType::Faq), "q", None, Some(&MentionsSummary))
            .await;
        assert!(result.success);
        assert!(result.quality_warning);
        assert_eq!(result.retries, 1);
        assert_eq!(result.content(), Some("more rambling"));
    }

    #[tokio::test]
    async fn test_rejected_answer_is_evicted_from_cache() {
        let adapter = Recorder::new(vec!["rambling", "the summary"]);
        let cache = Arc::new(ResponseCache::default());
        let quality = quality_loop(adapter.clone(), Some(cache.clone()));

        quality
            .execute_with_validation(&Task::new(TaskType::Faq), "memo", None, Some(&MentionsSummary))
            .await;

        assert!(cache.get("memo").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_answer_is_evicted_under_its_system_prompt() {
        let adapter = Recorder::new(vec!["rambling", "the summary"]);
        let cache = Arc::new(ResponseCache::default());
        let quality = quality_loop(adapter.clone(), Some(cache.clone()));

        quality
            .execute_with_validation(
                &Task::new(TaskType::Faq),
                "memo",
                Some("Be formal"),
                Some(&MentionsSummary),
            )
            .await;

        assert!(cache.get_in("memo", Some("Be formal")).is_none());
        assert_eq!(cache.len(), 1);
    }
}
