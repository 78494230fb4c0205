//! Provider boundary
//!
//! This module provides:
//! - The [`ModelAdapter`] contract every provider integration implements
//! - [`AdapterRegistry`] for resolving `provider/model` ids to adapters
//! - An OpenAI-compatible HTTP adapter (OpenRouter by default)

mod adapter;
mod openai;
mod registry;
pub mod types;

pub use adapter::{
    AdapterCapabilities, CompletionRequest, HealthStatus, ModelAdapter, ModelResponse,
    ResponseFormat,
};
pub use openai::{OPENROUTER_BASE_URL, OpenAiCompatibleAdapter, OpenAiCompatibleAdapterBuilder};
pub use registry::{AdapterFactory, AdapterRegistry, split_model_id};
