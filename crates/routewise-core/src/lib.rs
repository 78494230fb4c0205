//! Routewise Core Library
//!
//! This crate provides the model routing and cost-optimization engine:
//! - Task classification into model tiers
//! - Tier-based model routing with budget downgrades and health fallback
//! - Execution with retries, linear backoff, per-call deadlines and cancellation
//! - One-shot quality retry driven by validator feedback
//! - Exact and near-duplicate response caching
//! - Per-organization daily budgets and usage analytics
//! - Key-value persistence (in-memory and SQLite)

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod cost;
pub mod error;
pub mod execution;
pub mod llm;
pub mod quality;
pub mod routing;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::ResponseCache;
    pub use crate::catalog::ModelCatalog;
    pub use crate::config::Config;
    pub use crate::cost::{CostTracker, PricingTable};
    pub use crate::error::{Error, Result};
    pub use crate::execution::{ExecutionCoordinator, ExecutionResult};
    pub use crate::llm::{AdapterRegistry, ModelAdapter};
    pub use crate::quality::{OutputValidator, QualityRetryLoop, ValidationVerdict};
    pub use crate::routing::{ModelTier, RoutingDecision, RoutingEngine, Task, TaskType};
    pub use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};
}
