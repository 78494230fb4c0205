//! Tier-based model routing
//!
//! The key components are:
//!
//! - **TaskClassifier**: pure mapping from a task to a [`ModelTier`], using a
//!   static task-type table first and capability flags second.
//!
//! - **RoutingEngine**: picks a concrete model for the tier from the
//!   [`crate::catalog::ModelCatalog`], downgrading when the org's daily budget
//!   would be exceeded and falling back when the primary model is unhealthy.
//!
//! ## Example
//!
//! ```rust,ignore
//! use routewise_core::routing::{RoutingEngine, Task, TaskType};
//!
//! let engine = RoutingEngine::builder()
//!     .cost_tracker(tracker.clone())
//!     .build();
//!
//! let task = Task::new(TaskType::Summarization).with_org("acme");
//! let decision = engine.route(&task).await?;
//! println!("{} via {} ({})", decision.model_id, decision.tier, decision.reason);
//! ```

mod classifier;
mod router;
mod types;

pub use classifier::{LONG_CONTEXT_THRESHOLD, SHORT_JSON_THRESHOLD, TaskClassifier};
pub use router::{RoutingEngine, RoutingEngineBuilder};
pub use types::{ModelTier, RoutingDecision, RoutingReason, Task, TaskType, provider_of};
