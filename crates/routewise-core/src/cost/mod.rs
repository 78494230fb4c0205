//! Cost management and budget enforcement
//!
//! This module provides:
//! - Model pricing and cost calculation
//! - Per-organization daily budgets with date rollover
//! - A capped usage log for analytics

mod tracker;

pub use tracker::{
    BudgetStatus, CostTracker, DayUsage, OrgBudget, UsageRecord, UsageStats,
    DEFAULT_ALERT_THRESHOLD, DEFAULT_DAILY_BUDGET_USD, MAX_USAGE_LOG_ENTRIES,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price per million input tokens applied to unregistered models
pub const UNKNOWN_INPUT_PRICE: f64 = 1.0;

/// Price per million output tokens applied to unregistered models
pub const UNKNOWN_OUTPUT_PRICE: f64 = 2.0;

/// Token usage for a single model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output)
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Pricing information for a model (per million tokens)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Calculate the USD cost of the given token usage
    pub fn calculate_cost(&self, tokens: &TokenUsage) -> f64 {
        let input_cost = (tokens.input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (tokens.output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

/// Static model id → price map with a fixed fallback for unknown ids
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
}

impl PricingTable {
    /// Empty table; every model is priced at the fallback
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
            fallback: ModelPricing::new(UNKNOWN_INPUT_PRICE, UNKNOWN_OUTPUT_PRICE),
        }
    }

    /// Add or replace the price for a model
    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices.insert(model.into(), pricing);
    }

    pub fn with_price(mut self, model: impl Into<String>, input: f64, output: f64) -> Self {
        self.insert(model, ModelPricing::new(input, output));
        self
    }

    /// Registered price, if the model is known
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.prices.get(model)
    }

    /// Price for a model, falling back to the unknown-model rate
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        self.prices.get(model).copied().unwrap_or(self.fallback)
    }

    /// USD cost of a call to `model`
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.pricing_for(model)
            .calculate_cost(&TokenUsage::new(prompt_tokens, completion_tokens))
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }
}

impl Default for PricingTable {
    /// Prices are per million tokens
    fn default() -> Self {
        Self::empty()
            // Anthropic models
            .with_price("anthropic/claude-opus-4-20250514", 15.0, 75.0)
            .with_price("anthropic/claude-sonnet-4-20250514", 3.0, 15.0)
            .with_price("anthropic/claude-3-5-haiku-latest", 0.80, 4.0)
            // OpenAI models
            .with_price("openai/o3-mini", 1.10, 4.40)
            .with_price("openai/gpt-4o", 2.50, 10.0)
            .with_price("openai/gpt-4o-mini", 0.15, 0.60)
            // Self-hosted
            .with_price("local/llama3.1-8b", 0.0, 0.0)
            .with_price("local/qwen2.5-7b", 0.0, 0.0)
    }
}
