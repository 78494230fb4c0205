//! Routing engine
//!
//! Turns a [`Task`] into a [`RoutingDecision`]:
//! - Classify the task into a tier
//! - Pick the tier's primary model, walking to cheaper tiers when a tier is empty
//! - Downgrade one tier when the estimate would overrun the org's daily budget
//! - Swap to the tier's second model when the primary fails its health probe

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::classifier::TaskClassifier;
use super::types::{ModelTier, RoutingDecision, RoutingReason, Task};
use crate::catalog::ModelCatalog;
use crate::cost::{CostTracker, PricingTable};
use crate::error::{Error, Result};

/// Chooses a tier and model for each task
pub struct RoutingEngine {
    classifier: TaskClassifier,
    catalog: Arc<ModelCatalog>,
    cost_tracker: Option<Arc<CostTracker>>,
    pricing: PricingTable,
    default_fallback_tier: Option<ModelTier>,
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("catalog", &self.catalog)
            .field("cost_tracker", &self.cost_tracker.is_some())
            .finish()
    }
}

impl RoutingEngine {
    /// Engine over the default catalog with no budget enforcement
    pub fn new() -> Self {
        RoutingEngineBuilder::new().build()
    }

    pub fn builder() -> RoutingEngineBuilder {
        RoutingEngineBuilder::new()
    }

    pub fn classifier(&self) -> &TaskClassifier {
        &self.classifier
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Estimated USD cost of running `task` on `model`
    pub fn estimate_cost(&self, model_id: &str, task: &Task) -> f64 {
        self.pricing.cost(
            model_id,
            task.estimated_input_tokens(),
            task.estimated_output_tokens(),
        )
    }

    /// Produce a routing decision for a task
    pub async fn route(&self, task: &Task) -> Result<RoutingDecision> {
        let classified = self.classifier.classify(task);
        let org = task.org_id.as_deref();

        let (mut tier, mut models, mut reason) = self.tier_with_models(classified, task)?;
        let mut over_budget = false;

        if let (Some(tracker), Some(org_id)) = (&self.cost_tracker, org) {
            let estimated = self.estimate_cost(&models[0], task);
            if !tracker.check_budget(org_id, estimated) {
                over_budget = true;
                if let Some((cheaper, cheaper_models)) = self.next_cheaper(tier, org) {
                    warn!(
                        org = %org_id,
                        from = %tier,
                        to = %cheaper,
                        estimated_cost = estimated,
                        spent_today = tracker.spent_today(org_id),
                        "Estimate exceeds daily budget, downgrading tier"
                    );
                    tier = cheaper;
                    models = cheaper_models;
                    reason = RoutingReason::BudgetDowngrade;
                } else {
                    warn!(
                        org = %org_id,
                        tier = %tier,
                        estimated_cost = estimated,
                        "Estimate exceeds daily budget, no cheaper tier available"
                    );
                }
            }
        }

        let primary = models[0].clone();
        let mut decision = if !self.catalog.is_healthy(&primary).await && models.len() > 1 {
            info!(
                from = %primary,
                to = %models[1],
                tier = %tier,
                "Primary model unhealthy, using fallback"
            );
            RoutingDecision::new(models[1].clone(), tier, RoutingReason::HealthFallback)
                .with_fallback(primary)
        } else {
            RoutingDecision::new(primary, tier, reason)
        };

        let estimated = self.estimate_cost(&decision.model_id, task);
        decision = decision
            .with_estimated_cost(estimated)
            .with_over_budget(over_budget);

        debug!(
            request_id = %task.request_id,
            task_type = %task.task_type,
            classified = %classified,
            tier = %decision.tier,
            model = %decision.model_id,
            reason = %decision.reason,
            estimated_cost = decision.estimated_cost,
            "Routed task"
        );

        Ok(decision)
    }

    /// First tier with reachable models: the classified tier, then the
    /// task's declared fallback tier (or the engine default), then every
    /// cheaper tier down to Local
    fn tier_with_models(
        &self,
        classified: ModelTier,
        task: &Task,
    ) -> Result<(ModelTier, Vec<String>, RoutingReason)> {
        let org = task.org_id.as_deref();

        let models = self.catalog.tier_models(classified, org);
        if !models.is_empty() {
            return Ok((classified, models, RoutingReason::TierMatch));
        }

        if let Some(declared) = task.fallback_tier.or(self.default_fallback_tier) {
            let models = self.catalog.tier_models(declared, org);
            if !models.is_empty() {
                info!(from = %classified, to = %declared, "Using declared fallback tier");
                return Ok((declared, models, RoutingReason::TierFallback));
            }
        }

        if let Some((tier, models)) = self.next_cheaper(classified, org) {
            info!(from = %classified, to = %tier, "Tier empty, walked downgrade chain");
            return Ok((tier, models, RoutingReason::TierFallback));
        }

        Err(Error::RoutingExhausted(classified.to_string()))
    }

    /// Nearest cheaper tier that has reachable models
    fn next_cheaper(&self, from: ModelTier, org: Option<&str>) -> Option<(ModelTier, Vec<String>)> {
        let mut tier = from;
        while !tier.is_terminal() {
            tier = tier.downgrade();
            let models = self.catalog.tier_models(tier, org);
            if !models.is_empty() {
                return Some((tier, models));
            }
        }
        None
    }
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`RoutingEngine`]
#[derive(Default)]
pub struct RoutingEngineBuilder {
    classifier: Option<TaskClassifier>,
    catalog: Option<Arc<ModelCatalog>>,
    cost_tracker: Option<Arc<CostTracker>>,
    pricing: Option<PricingTable>,
    default_fallback_tier: Option<ModelTier>,
}

impl RoutingEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classifier(mut self, classifier: TaskClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set cost tracker; enables budget-aware downgrades
    pub fn cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    /// Pricing for estimates. Defaults to the cost tracker's table.
    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Fallback tier for tasks that do not declare one
    pub fn default_fallback_tier(mut self, tier: Option<ModelTier>) -> Self {
        self.default_fallback_tier = tier;
        self
    }

    pub fn build(self) -> RoutingEngine {
        let pricing = match (self.pricing, &self.cost_tracker) {
            (Some(pricing), _) => pricing,
            (None, Some(tracker)) => tracker.pricing().clone(),
            (None, None) => PricingTable::default(),
        };

        RoutingEngine {
            classifier: self.classifier.unwrap_or_default(),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(ModelCatalog::with_defaults())),
            cost_tracker: self.cost_tracker,
            pricing,
            default_fallback_tier: self.default_fallback_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, HealthProbe};
    use crate::routing::TaskType;
    use async_trait::async_trait;

    struct DownProbe(&'static str);

    #[async_trait]
    impl HealthProbe for DownProbe {
        async fn probe(&self, model_id: &str) -> bool {
            model_id != self.0
        }
    }

    #[tokio::test]
    async fn test_general_task_routes_to_conversation_primary() {
        let engine = RoutingEngine::new();
        let decision = engine.route(&Task::new(TaskType::General)).await.unwrap();

        assert_eq!(decision.tier, ModelTier::Conversation);
        assert_eq!(decision.model_id, "openai/gpt-4o-mini");
        assert_eq!(decision.provider, "openai");
        assert_eq!(decision.reason, RoutingReason::TierMatch);
        assert!(!decision.fallback_used);
        assert!(!decision.over_budget);
        assert_eq!(decision.estimated_latency_ms, 1500);
    }

    #[tokio::test]
    async fn test_estimated_cost_uses_integer_token_estimates() {
        let engine = RoutingEngine::new();
        // 4003 / 4 = 1000 input tokens, 2001 / 2 = 1000 output tokens
        let task = Task::new(TaskType::Faq)
            .with_context_length(4003)
            .with_max_tokens(2001);
        let decision = engine.route(&task).await.unwrap();

        let expected = 1000.0 / 1e6 * 0.15 + 1000.0 / 1e6 * 0.60;
        assert!((decision.estimated_cost - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_high_stakes_goes_to_reasoning() {
        let engine = RoutingEngine::new();
        let task = Task::new(TaskType::General).with_high_stakes(true);
        let decision = engine.route(&task).await.unwrap();
        assert_eq!(decision.tier, ModelTier::Reasoning);
        assert_eq!(decision.model_id, "anthropic/claude-opus-4-20250514");
    }

    #[tokio::test]
    async fn test_budget_downgrade() {
        let catalog = Arc::new(ModelCatalog::empty());
        catalog.register(CatalogEntry::new("acme/big", ModelTier::Generation));
        catalog.register(CatalogEntry::new("acme/small", ModelTier::Conversation));

        let pricing = PricingTable::empty()
            .with_price("acme/big", 50.0, 50.0)
            .with_price("acme/small", 0.1, 0.1);
        let tracker = Arc::new(CostTracker::new(1.00, 0.8).with_pricing(pricing));
        tracker.record("org-1", "acme/big", 0.95, 0, 0);

        let engine = RoutingEngine::builder()
            .catalog(catalog)
            .cost_tracker(tracker)
            .build();

        // 1000 input + 1000 output tokens at $50/M each = $0.10
        let task = Task::new(TaskType::ContentGeneration)
            .with_context_length(4000)
            .with_max_tokens(2000)
            .with_org("org-1");
        let decision = engine.route(&task).await.unwrap();

        assert_eq!(decision.tier, ModelTier::Conversation);
        assert_eq!(decision.model_id, "acme/small");
        assert_eq!(decision.reason, RoutingReason::BudgetDowngrade);
        assert!(decision.over_budget);
        assert!(decision.estimated_cost < 0.001);
    }

    #[tokio::test]
    async fn test_within_budget_keeps_tier() {
        let tracker = Arc::new(CostTracker::new(10.0, 0.8));
        let engine = RoutingEngine::builder().cost_tracker(tracker).build();

        let task = Task::new(TaskType::ReportWriting).with_org("org-1");
        let decision = engine.route(&task).await.unwrap();
        assert_eq!(decision.tier, ModelTier::Generation);
        assert!(!decision.over_budget);
    }

    #[tokio::test]
    async fn test_no_org_skips_budget_check() {
        let tracker = Arc::new(CostTracker::new(0.0, 0.8));
        let engine = RoutingEngine::builder().cost_tracker(tracker).build();

        let decision = engine
            .route(&Task::new(TaskType::StrategicAnalysis))
            .await
            .unwrap();
        assert_eq!(decision.tier, ModelTier::Reasoning);
        assert!(!decision.over_budget);
    }

    #[tokio::test]
    async fn test_over_budget_at_local_stays_local() {
        let tracker = Arc::new(
            CostTracker::new(0.0, 0.8)
                .with_pricing(PricingTable::empty().with_price("local/llama3.1-8b", 1.0, 1.0)),
        );
        let engine = RoutingEngine::builder().cost_tracker(tracker).build();

        let task = Task::new(TaskType::PrivateData).with_org("org-1");
        let decision = engine.route(&task).await.unwrap();
        assert_eq!(decision.tier, ModelTier::Local);
        assert!(decision.over_budget);
        assert_eq!(decision.reason, RoutingReason::TierMatch);
    }

    #[tokio::test]
    async fn test_unhealthy_primary_uses_second_model() {
        let catalog = Arc::new(
            ModelCatalog::with_defaults().with_prober(Arc::new(DownProbe("openai/gpt-4o-mini"))),
        );
        let engine = RoutingEngine::builder().catalog(catalog).build();

        let decision = engine.route(&Task::new(TaskType::Faq)).await.unwrap();
        assert_eq!(decision.model_id, "anthropic/claude-3-5-haiku-latest");
        assert!(decision.fallback_used);
        assert_eq!(decision.original_model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(decision.reason, RoutingReason::HealthFallback);
    }

    #[tokio::test]
    async fn test_unhealthy_only_model_is_still_used() {
        let catalog = Arc::new(ModelCatalog::empty().with_prober(Arc::new(DownProbe("solo/model"))));
        catalog.register(CatalogEntry::new("solo/model", ModelTier::Conversation));
        let engine = RoutingEngine::builder().catalog(catalog).build();

        let decision = engine.route(&Task::new(TaskType::Faq)).await.unwrap();
        assert_eq!(decision.model_id, "solo/model");
        assert!(!decision.fallback_used);
    }

    #[tokio::test]
    async fn test_declared_fallback_tier() {
        let catalog = Arc::new(ModelCatalog::empty());
        catalog.register(CatalogEntry::new("acme/reasoner", ModelTier::Reasoning));
        catalog.register(CatalogEntry::new("acme/tiny", ModelTier::Local));
        let engine = RoutingEngine::builder().catalog(catalog).build();

        let task = Task::new(TaskType::Faq).with_fallback_tier(ModelTier::Reasoning);
        let decision = engine.route(&task).await.unwrap();
        assert_eq!(decision.tier, ModelTier::Reasoning);
        assert_eq!(decision.reason, RoutingReason::TierFallback);

        // Without a declared tier the chain walks down to Local
        let decision = engine.route(&Task::new(TaskType::Faq)).await.unwrap();
        assert_eq!(decision.tier, ModelTier::Local);
        assert_eq!(decision.model_id, "acme/tiny");
    }

    #[tokio::test]
    async fn test_engine_default_fallback_tier() {
        let catalog = Arc::new(ModelCatalog::empty());
        catalog.register(CatalogEntry::new("acme/reasoner", ModelTier::Reasoning));
        catalog.register(CatalogEntry::new("acme/tiny", ModelTier::Local));
        let engine = RoutingEngine::builder()
            .catalog(catalog)
            .default_fallback_tier(Some(ModelTier::Reasoning))
            .build();

        let decision = engine.route(&Task::new(TaskType::Faq)).await.unwrap();
        assert_eq!(decision.model_id, "acme/reasoner");

        let task = Task::new(TaskType::Faq).with_fallback_tier(ModelTier::Local);
        let decision = engine.route(&task).await.unwrap();
        assert_eq!(decision.model_id, "acme/tiny");
    }

    #[tokio::test]
    async fn test_exhausted_catalog_is_an_error() {
        let catalog = Arc::new(ModelCatalog::with_defaults());
        for tier in [ModelTier::Classification, ModelTier::Local] {
            for model in catalog.tier_models(tier, None) {
                catalog.set_reachable(&model, false);
            }
        }
        let engine = RoutingEngine::builder().catalog(catalog).build();

        let err = engine
            .route(&Task::new(TaskType::Sentiment))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoutingExhausted(ref tier) if tier == "classification"));
        assert_eq!(err.to_string(), "No models available for tier classification");
    }

    #[tokio::test]
    async fn test_builder_pricing_overrides_tracker() {
        let tracker = Arc::new(CostTracker::default());
        let engine = RoutingEngine::builder()
            .cost_tracker(tracker)
            .pricing(PricingTable::empty())
            .build();

        let task = Task::new(TaskType::Faq)
            .with_context_length(4_000_000)
            .with_max_tokens(0);
        let decision = engine.route(&task).await.unwrap();
        assert!((decision.estimated_cost - 1.0).abs() < 1e-9);
    }
}
