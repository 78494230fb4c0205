//! Adapter registry
//!
//! Maps `provider/model` ids to adapters. Explicit per-model registrations
//! win; otherwise the provider's factory builds an adapter once and it is
//! reused for later calls.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::adapter::ModelAdapter;
use crate::catalog::HealthProbe;
use crate::error::{Error, Result};

/// Builds an adapter for a full model id
pub type AdapterFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ModelAdapter>> + Send + Sync>;

/// Split a model id into `(provider, model)`.
///
/// Both parts must be non-empty; anything else is a configuration error.
pub fn split_model_id(model_id: &str) -> Result<(&str, &str)> {
    match model_id.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(Error::Configuration(format!(
            "Malformed model id '{}', expected provider/model",
            model_id
        ))),
    }
}

/// Resolves model ids to adapters
#[derive(Default)]
pub struct AdapterRegistry {
    factories: RwLock<HashMap<String, AdapterFactory>>,
    adapters: RwLock<HashMap<String, Arc<dyn ModelAdapter>>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers = self.providers();
        providers.sort();
        f.debug_struct("AdapterRegistry")
            .field("providers", &providers)
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory used for every model of `provider`
    pub fn register_provider<F>(&self, provider: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn ModelAdapter>> + Send + Sync + 'static,
    {
        let provider = provider.into();
        debug!(provider = %provider, "Registered provider factory");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider, Arc::new(factory));
    }

    /// Register an adapter for one model, overriding the provider factory
    pub fn register(&self, adapter: Arc<dyn ModelAdapter>) {
        let model_id = adapter.model_id().to_string();
        debug!(model = %model_id, "Registered model adapter");
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_id, adapter);
    }

    pub fn providers(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Adapter for a model id
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn ModelAdapter>> {
        let (provider, _) = split_model_id(model_id)?;

        if let Some(adapter) = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
        {
            return Ok(adapter.clone());
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!("No adapter registered for provider '{}'", provider))
            })?;

        let adapter = factory(model_id)?;
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model_id.to_string())
            .or_insert_with(|| adapter.clone());

        debug!(model = %model_id, provider = %provider, "Built adapter from provider factory");
        Ok(adapter)
    }
}

#[async_trait]
impl HealthProbe for AdapterRegistry {
    async fn probe(&self, model_id: &str) -> bool {
        let adapter = match self.resolve(model_id) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(model = %model_id, error = %e, "Cannot probe unresolvable model");
                return false;
            }
        };

        let status = adapter.health_check().await;
        if let Some(error) = &status.error {
            debug!(model = %model_id, error = %error, "Health check failed");
        }
        status.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AdapterCapabilities, CompletionRequest, HealthStatus, ModelResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        model_id: String,
        healthy: bool,
    }

    #[async_trait]
    impl ModelAdapter for Fixed {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities::default()
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<ModelResponse> {
            Ok(ModelResponse::new(&self.model_id, "ok"))
        }

        async fn health_check(&self) -> HealthStatus {
            if self.healthy {
                HealthStatus::healthy(5)
            } else {
                HealthStatus::unhealthy(5, "down")
            }
        }
    }

    fn fixed(model_id: &str, healthy: bool) -> Arc<dyn ModelAdapter> {
        Arc::new(Fixed {
            model_id: model_id.to_string(),
            healthy,
        })
    }

    #[test]
    fn test_split_model_id() {
        assert_eq!(split_model_id("openai/gpt-4o").unwrap(), ("openai", "gpt-4o"));
        assert_eq!(
            split_model_id("meta/llama/3").unwrap(),
            ("meta", "llama/3")
        );
        for bad in ["gpt-4o", "/gpt-4o", "openai/", ""] {
            let err = split_model_id(bad).unwrap_err();
            assert_eq!(err.code(), "E100", "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_factory_builds_once() {
        let registry = AdapterRegistry::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        registry.register_provider("openai", move |model_id: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(fixed(model_id, true))
        });

        let first = registry.resolve("openai/gpt-4o").unwrap();
        let second = registry.resolve("openai/gpt-4o").unwrap();
        assert_eq!(first.model_id(), "openai/gpt-4o");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_registration_wins() {
        let registry = AdapterRegistry::new();
        registry.register_provider("local", |_: &str| {
            Err(Error::Configuration("no local runtime".to_string()))
        });
        registry.register(fixed("local/llama3.1-8b", true));

        assert!(registry.resolve("local/llama3.1-8b").is_ok());
        assert!(registry.resolve("local/qwen2.5-7b").is_err());
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let registry = AdapterRegistry::new();
        let err = registry.resolve("mistral/large").err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_probe() {
        let registry = AdapterRegistry::new();
        registry.register(fixed("openai/gpt-4o", true));
        registry.register(fixed("openai/o3-mini", false));

        assert!(registry.probe("openai/gpt-4o").await);
        assert!(!registry.probe("openai/o3-mini").await);
        assert!(!registry.probe("nowhere/model").await);
    }
}
