//! Types for tier-based model routing
//!
//! This module defines the tasks the engine accepts, the tiers it routes
//! between and the decisions it hands to the execution layer.

use serde::{Deserialize, Serialize};

/// Cost/capability class of a model
///
/// Ordered from most capable (and most expensive) to cheapest. The numeric
/// index only drives downgrades, never upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Reasoning = 1,
    Generation = 2,
    Conversation = 3,
    Classification = 4,
    Local = 5,
}

impl ModelTier {
    /// All tiers, most capable first
    pub const ALL: [ModelTier; 5] = [
        Self::Reasoning,
        Self::Generation,
        Self::Conversation,
        Self::Classification,
        Self::Local,
    ];

    /// Numeric tier index (1 = reasoning, 5 = local)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Next cheaper tier. `Local` is terminal and downgrades to itself.
    pub fn downgrade(self) -> Self {
        match self {
            Self::Reasoning => Self::Generation,
            Self::Generation => Self::Conversation,
            Self::Conversation => Self::Classification,
            Self::Classification | Self::Local => Self::Local,
        }
    }

    /// Whether this tier has no cheaper tier below it
    pub fn is_terminal(self) -> bool {
        self == Self::Local
    }

    /// Rough latency expectation for models in this tier
    pub fn expected_latency_ms(self) -> u64 {
        match self {
            Self::Reasoning => 8000,
            Self::Generation => 4000,
            Self::Conversation => 1500,
            Self::Classification => 500,
            Self::Local => 2500,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reasoning => write!(f, "reasoning"),
            Self::Generation => write!(f, "generation"),
            Self::Conversation => write!(f, "conversation"),
            Self::Classification => write!(f, "classification"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reasoning" => Ok(Self::Reasoning),
            "generation" => Ok(Self::Generation),
            "conversation" => Ok(Self::Conversation),
            "classification" => Ok(Self::Classification),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown model tier: {}", s)),
        }
    }
}

/// Declared kind of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// No declared type; tier comes from the task's flags
    #[default]
    General,
    StrategicAnalysis,
    DecisionSupport,
    ContentGeneration,
    ReportWriting,
    Summarization,
    Conversation,
    Faq,
    Classification,
    IntentDetection,
    EntityExtraction,
    Sentiment,
    Routing,
    PrivateData,
    GovernanceCheck,
}

impl TaskType {
    pub const ALL: [TaskType; 15] = [
        Self::General,
        Self::StrategicAnalysis,
        Self::DecisionSupport,
        Self::ContentGeneration,
        Self::ReportWriting,
        Self::Summarization,
        Self::Conversation,
        Self::Faq,
        Self::Classification,
        Self::IntentDetection,
        Self::EntityExtraction,
        Self::Sentiment,
        Self::Routing,
        Self::PrivateData,
        Self::GovernanceCheck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::StrategicAnalysis => "strategic_analysis",
            Self::DecisionSupport => "decision_support",
            Self::ContentGeneration => "content_generation",
            Self::ReportWriting => "report_writing",
            Self::Summarization => "summarization",
            Self::Conversation => "conversation",
            Self::Faq => "faq",
            Self::Classification => "classification",
            Self::IntentDetection => "intent_detection",
            Self::EntityExtraction => "entity_extraction",
            Self::Sentiment => "sentiment",
            Self::Routing => "routing",
            Self::PrivateData => "private_data",
            Self::GovernanceCheck => "governance_check",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown task type: {}", s))
    }
}

/// A unit of work submitted for routing and execution
///
/// Carries the characteristics of the work, never the prompt itself. The
/// engine only ever borrows a task, so it cannot change after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_type: TaskType,
    /// Prompt size proxy, in characters
    pub context_length: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub requires_reasoning: bool,
    pub requires_generation: bool,
    pub requires_json: bool,
    pub requires_low_latency: bool,
    pub high_stakes: bool,
    /// Minimum acceptable validator score (0.0 to 1.0)
    pub quality_threshold: f64,
    pub max_retries: u32,
    pub org_id: Option<String>,
    pub request_id: String,
    /// Tier to try when the classified tier has no reachable models
    pub fallback_tier: Option<ModelTier>,
}

impl Task {
    /// Create a new task with defaults
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            context_length: 1000,
            max_tokens: 1000,
            temperature: 0.7,
            requires_reasoning: false,
            requires_generation: false,
            requires_json: false,
            requires_low_latency: false,
            high_stakes: false,
            quality_threshold: 0.7,
            max_retries: 2,
            org_id: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            fallback_tier: None,
        }
    }

    pub fn with_context_length(mut self, length: u32) -> Self {
        self.context_length = length;
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

    pub fn with_reasoning(mut self, required: bool) -> Self {
        self.requires_reasoning = required;
        self
    }

    pub fn with_generation(mut self, required: bool) -> Self {
        self.requires_generation = required;
        self
    }

    pub fn with_json(mut self, required: bool) -> Self {
        self.requires_json = required;
        self
    }

    pub fn with_low_latency(mut self, required: bool) -> Self {
        self.requires_low_latency = required;
        self
    }

    pub fn with_high_stakes(mut self, high_stakes: bool) -> Self {
        self.high_stakes = high_stakes;
        self
    }

    /// Set quality threshold, clamped to 0.0..=1.0
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_fallback_tier(mut self, tier: ModelTier) -> Self {
        self.fallback_tier = Some(tier);
        self
    }

    /// Input tokens assumed when estimating cost before the call
    pub fn estimated_input_tokens(&self) -> u64 {
        u64::from(self.context_length / 4)
    }

    /// Output tokens assumed when estimating cost before the call
    pub fn estimated_output_tokens(&self) -> u64 {
        u64::from(self.max_tokens / 2)
    }
}

/// Why the router picked the model it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    /// First reachable model of the classified tier
    TierMatch,
    /// The classified tier would overrun the org's daily budget
    BudgetDowngrade,
    /// Primary model failed its health probe
    HealthFallback,
    /// The classified tier had no reachable models
    TierFallback,
}

impl std::fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TierMatch => write!(f, "tier_match"),
            Self::BudgetDowngrade => write!(f, "budget_downgrade"),
            Self::HealthFallback => write!(f, "health_fallback"),
            Self::TierFallback => write!(f, "tier_fallback"),
        }
    }
}

/// Result of routing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model_id: String,
    pub tier: ModelTier,
    pub provider: String,
    pub reason: RoutingReason,
    pub fallback_used: bool,
    /// Preferred model that was passed over, if any
    pub original_model: Option<String>,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
    pub over_budget: bool,
}

impl RoutingDecision {
    /// Create a new routing decision
    pub fn new(model_id: impl Into<String>, tier: ModelTier, reason: RoutingReason) -> Self {
        let model_id = model_id.into();
        Self {
            provider: provider_of(&model_id).to_string(),
            model_id,
            tier,
            reason,
            fallback_used: false,
            original_model: None,
            estimated_cost: 0.0,
            estimated_latency_ms: tier.expected_latency_ms(),
            over_budget: false,
        }
    }

    /// Record that the preferred model was replaced
    pub fn with_fallback(mut self, original: impl Into<String>) -> Self {
        self.fallback_used = true;
        self.original_model = Some(original.into());
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_over_budget(mut self, over_budget: bool) -> Self {
        self.over_budget = over_budget;
        self
    }
}

/// Provider segment of a `provider/model` id, or the whole id if unsplit
pub fn provider_of(model_id: &str) -> &str {
    model_id.split_once('/').map(|(p, _)| p).unwrap_or(model_id)
}
