//! Model catalog
//!
//! Tracks which concrete models serve each [`ModelTier`], per-organization
//! preference overrides, and model reachability. Reachability has two
//! layers: a static flag set by operators and a probed health status cached
//! for a short window.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Duration;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::ExpiringCache;
use crate::clock::{SharedClock, system_clock};
use crate::routing::{ModelTier, provider_of};

/// Default health cache window in seconds
pub const DEFAULT_HEALTH_CACHE_SECS: u64 = 60;

/// Default model line-up, primary first
const DEFAULT_MODELS: &[(ModelTier, &[&str])] = &[
    (
        ModelTier::Reasoning,
        &["anthropic/claude-opus-4-20250514", "openai/o3-mini"],
    ),
    (
        ModelTier::Generation,
        &["anthropic/claude-sonnet-4-20250514", "openai/gpt-4o"],
    ),
    (
        ModelTier::Conversation,
        &["openai/gpt-4o-mini", "anthropic/claude-3-5-haiku-latest"],
    ),
    (
        ModelTier::Classification,
        &["openai/gpt-4o-mini", "anthropic/claude-3-5-haiku-latest"],
    ),
    (ModelTier::Local, &["local/llama3.1-8b", "local/qwen2.5-7b"]),
];

/// A model known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Model identifier in `provider/model` form
    pub model_id: String,
    /// Tier the model was first registered under
    pub tier: ModelTier,
    pub provider: String,
    /// Static reachability flag
    pub reachable: bool,
}

impl CatalogEntry {
    pub fn new(model_id: impl Into<String>, tier: ModelTier) -> Self {
        let model_id = model_id.into();
        let provider = provider_of(&model_id).to_string();
        Self {
            model_id,
            tier,
            provider,
            reachable: true,
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }
}

/// Something that can tell whether a model is currently serving requests
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, model_id: &str) -> bool;
}

/// Models per tier with org overrides and cached health
pub struct ModelCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    tiers: RwLock<HashMap<ModelTier, Vec<String>>>,
    org_preferences: RwLock<HashMap<String, HashMap<ModelTier, Vec<String>>>>,
    health: ExpiringCache<String, bool>,
    clock: SharedClock,
    prober: Option<Arc<dyn HealthProbe>>,
}

impl std::fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("models", &self.read_entries().len())
            .field("health_ttl", &self.health.ttl())
            .field("prober", &self.prober.is_some())
            .finish()
    }
}

impl ModelCatalog {
    /// Empty catalog with no tiers populated
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tiers: RwLock::new(HashMap::new()),
            org_preferences: RwLock::new(HashMap::new()),
            health: ExpiringCache::new(Duration::seconds(DEFAULT_HEALTH_CACHE_SECS as i64)),
            clock: system_clock(),
            prober: None,
        }
    }

    /// Catalog with the default provider line-up
    pub fn with_defaults() -> Self {
        let catalog = Self::empty();
        for (tier, models) in DEFAULT_MODELS {
            for model in *models {
                catalog.add_to_tier(*tier, model);
            }
        }
        catalog
    }

    pub fn with_prober(mut self, prober: Arc<dyn HealthProbe>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_health_ttl(mut self, secs: u64) -> Self {
        let ttl = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        self.health = ExpiringCache::new(ttl).with_clock(self.clock.clone());
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.health = ExpiringCache::new(self.health.ttl()).with_clock(clock.clone());
        self.clock = clock;
        self
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_to_tier(&self, tier: ModelTier, model_id: &str) {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries
                .entry(model_id.to_string())
                .or_insert_with(|| CatalogEntry::new(model_id, tier));
        }
        let mut tiers = self.tiers.write().unwrap_or_else(PoisonError::into_inner);
        let list = tiers.entry(tier).or_default();
        if !list.iter().any(|m| m == model_id) {
            list.push(model_id.to_string());
        }
    }

    /// Register a model, appending it to its tier's global list.
    ///
    /// Re-registering replaces the entry's reachability and provider but
    /// keeps its position in every tier it already belongs to.
    pub fn register(&self, entry: CatalogEntry) {
        let tier = entry.tier;
        let model_id = entry.model_id.clone();
        self.add_to_tier(tier, &model_id);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_id.clone(), entry);
        debug!(model = %model_id, tier = %tier, "Registered model");
    }

    /// Set the static reachability flag for a model
    pub fn set_reachable(&self, model_id: &str, reachable: bool) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(model_id) {
            Some(entry) => entry.reachable = reachable,
            None => warn!(model = %model_id, "Reachability set for unknown model"),
        }
    }

    /// Override the model list for one tier of one organization
    pub fn set_org_preference(&self, org_id: &str, tier: ModelTier, models: Vec<String>) {
        info!(org = %org_id, tier = %tier, count = models.len(), "Set org model preference");
        self.org_preferences
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(org_id.to_string())
            .or_default()
            .insert(tier, models);
    }

    pub fn entry(&self, model_id: &str) -> Option<CatalogEntry> {
        self.read_entries().get(model_id).cloned()
    }

    /// Every tier with its global model list, in tier order
    pub fn tiers(&self) -> Vec<(ModelTier, Vec<String>)> {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        ModelTier::ALL
            .iter()
            .map(|tier| (*tier, tiers.get(tier).cloned().unwrap_or_default()))
            .collect()
    }

    /// Models not registered in the catalog are assumed reachable
    fn is_reachable(&self, model_id: &str) -> bool {
        self.read_entries()
            .get(model_id)
            .map(|e| e.reachable)
            .unwrap_or(true)
    }

    fn reachable(&self, models: &[String]) -> Vec<String> {
        models
            .iter()
            .filter(|m| self.is_reachable(m))
            .cloned()
            .collect()
    }

    /// Reachable models for a tier, primary first.
    ///
    /// An organization's preference list wins when at least one of its
    /// models is reachable; otherwise the global list is used.
    pub fn tier_models(&self, tier: ModelTier, org_id: Option<&str>) -> Vec<String> {
        if let Some(org) = org_id {
            let preferred = self
                .org_preferences
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(org)
                .and_then(|prefs| prefs.get(&tier))
                .cloned();

            if let Some(preferred) = preferred {
                let reachable = self.reachable(&preferred);
                if !reachable.is_empty() {
                    return reachable;
                }
                debug!(org = %org, tier = %tier, "No reachable preferred models, using defaults");
            }
        }

        let global = self
            .tiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tier)
            .cloned()
            .unwrap_or_default();
        self.reachable(&global)
    }

    /// Second model of the tier's list, if any
    pub fn fallback_model(&self, tier: ModelTier, org_id: Option<&str>) -> Option<String> {
        self.tier_models(tier, org_id).into_iter().nth(1)
    }

    /// Cached health of a model. Without a prober every model is healthy.
    pub async fn is_healthy(&self, model_id: &str) -> bool {
        let key = model_id.to_string();
        if let Some(healthy) = self.health.get(&key) {
            return healthy;
        }

        let Some(prober) = &self.prober else {
            return true;
        };

        let healthy = prober.probe(model_id).await;
        if !healthy {
            warn!(model = %model_id, "Model failed health probe");
        }
        self.health.insert(key, healthy);
        healthy
    }

    /// Forget a cached health result so the next check probes again
    pub fn invalidate_health(&self, model_id: &str) {
        self.health.remove(&model_id.to_string());
    }

    /// Probe every catalog model concurrently, refreshing the health cache
    pub async fn refresh_health(&self) -> Vec<(String, bool)> {
        let Some(prober) = &self.prober else {
            return Vec::new();
        };

        let mut models: Vec<String> = self.read_entries().keys().cloned().collect();
        models.sort();

        let probes = models.iter().map(|model| prober.probe(model));
        let results = join_all(probes).await;

        let report: Vec<(String, bool)> = models.into_iter().zip(results).collect();
        for (model, healthy) in &report {
            self.health.insert(model.clone(), *healthy);
        }

        info!(
            models = report.len(),
            unhealthy = report.iter().filter(|(_, h)| !h).count(),
            "Refreshed model health"
        );
        report
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}
