//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::routing::ModelTier;

/// Longest accepted response cache TTL (ten years)
pub const MAX_CACHE_TTL_HOURS: u64 = 87_600;
/// Longest accepted health probe cache lifetime (one day)
pub const MAX_HEALTH_CACHE_SECS: u64 = 86_400;

/// Routewise configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub cost: CostConfig,
    pub cache: CacheConfig,
    pub execution: ExecutionConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// How long a health probe result is trusted, in seconds
    pub health_cache_secs: u64,
    /// Tier tried when a task's own tier has no reachable models
    pub default_fallback_tier: Option<ModelTier>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            health_cache_secs: 60,
            default_fallback_tier: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub default_daily_budget_usd: f64,
    pub alert_threshold: f64,
    pub max_usage_log_entries: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            default_daily_budget_usd: 10.0,
            alert_threshold: 0.8,
            max_usage_log_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_hours: u64,
    pub max_entries: usize,
    pub similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: 24,
            max_entries: 1000,
            similarity_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Backoff unit; attempt n waits n times this
    pub backoff_base_ms: u64,
    /// Deadline for a single provider call
    pub call_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    /// OpenAI-compatible endpoint used by the HTTP adapter
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("ROUTEWISE_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    format!("***{}", &key[key.len() - 4..])
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Provider API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ROUTEWISE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("routewise")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// SQLite file holding budgets and cached responses
    pub fn state_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("state.db"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.providers.enforce_env_only()?;

        if self.cost.default_daily_budget_usd < 0.0 {
            return Err(anyhow!("Daily budget must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.cost.alert_threshold) {
            return Err(anyhow!("Alert threshold must be between 0.0 and 1.0"));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(anyhow!("Similarity threshold must be between 0.0 and 1.0"));
        }
        if self.cache.max_entries == 0 {
            return Err(anyhow!("Cache max_entries must be at least 1"));
        }
        if self.execution.call_timeout_secs == 0 {
            return Err(anyhow!("Call timeout must be at least 1 second"));
        }
        check_ttl_hours(self.cache.ttl_hours)?;
        check_health_cache_secs(self.routing.health_cache_secs)?;
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "routing.health_cache_secs" => Ok(self.routing.health_cache_secs.to_string()),
            "routing.default_fallback_tier" => Ok(self
                .routing
                .default_fallback_tier
                .map(|t| t.to_string())
                .unwrap_or_else(|| "(none)".to_string())),

            "cost.default_daily_budget_usd" => Ok(self.cost.default_daily_budget_usd.to_string()),
            "cost.alert_threshold" => Ok(self.cost.alert_threshold.to_string()),
            "cost.max_usage_log_entries" => Ok(self.cost.max_usage_log_entries.to_string()),

            "cache.enabled" => Ok(self.cache.enabled.to_string()),
            "cache.ttl_hours" => Ok(self.cache.ttl_hours.to_string()),
            "cache.max_entries" => Ok(self.cache.max_entries.to_string()),
            "cache.similarity_threshold" => Ok(self.cache.similarity_threshold.to_string()),

            "execution.backoff_base_ms" => Ok(self.execution.backoff_base_ms.to_string()),
            "execution.call_timeout_secs" => Ok(self.execution.call_timeout_secs.to_string()),

            "providers.base_url" => Ok(self.providers.base_url.clone()),

            // API key (special handling - show redacted)
            "providers.api_key" | "api_key" => match self.providers.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use ROUTEWISE_API_KEY or OPENROUTER_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `routewise config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "routing.health_cache_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid health_cache_secs value: {}", value))?;
                check_health_cache_secs(secs)?;
                self.routing.health_cache_secs = secs;
            }
            "routing.default_fallback_tier" => {
                self.routing.default_fallback_tier = match value {
                    "" | "none" => None,
                    tier => Some(tier.parse().map_err(|e: String| anyhow!(e))?),
                };
            }

            "cost.default_daily_budget_usd" => {
                let budget: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid daily budget value: {}", value))?;
                if budget < 0.0 {
                    return Err(anyhow!("Daily budget must be non-negative"));
                }
                self.cost.default_daily_budget_usd = budget;
            }
            "cost.alert_threshold" => {
                let threshold: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid alert_threshold value: {}", value))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!("Alert threshold must be between 0.0 and 1.0"));
                }
                self.cost.alert_threshold = threshold;
            }
            "cost.max_usage_log_entries" => {
                self.cost.max_usage_log_entries = value
                    .parse()
                    .with_context(|| format!("Invalid max_usage_log_entries value: {}", value))?;
            }

            "cache.enabled" => {
                self.cache.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "cache.ttl_hours" => {
                let hours: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid ttl_hours value: {}", value))?;
                check_ttl_hours(hours)?;
                self.cache.ttl_hours = hours;
            }
            "cache.max_entries" => {
                let max: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_entries value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("Cache max_entries must be at least 1"));
                }
                self.cache.max_entries = max;
            }
            "cache.similarity_threshold" => {
                let threshold: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid similarity_threshold value: {}", value))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!("Similarity threshold must be between 0.0 and 1.0"));
                }
                self.cache.similarity_threshold = threshold;
            }

            "execution.backoff_base_ms" => {
                self.execution.backoff_base_ms = value
                    .parse()
                    .with_context(|| format!("Invalid backoff_base_ms value: {}", value))?;
            }
            "execution.call_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid call_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Call timeout must be at least 1 second"));
                }
                self.execution.call_timeout_secs = secs;
            }

            "providers.base_url" => {
                self.providers.base_url = value.trim_end_matches('/').to_string();
            }

            // API key cannot be set via config
            "providers.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the ROUTEWISE_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `routewise config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "routing.health_cache_secs",
            "routing.default_fallback_tier",
            "cost.default_daily_budget_usd",
            "cost.alert_threshold",
            "cost.max_usage_log_entries",
            "cache.enabled",
            "cache.ttl_hours",
            "cache.max_entries",
            "cache.similarity_threshold",
            "execution.backoff_base_ms",
            "execution.call_timeout_secs",
            "providers.base_url",
            "providers.api_key",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn check_ttl_hours(hours: u64) -> anyhow::Result<()> {
    if hours > MAX_CACHE_TTL_HOURS {
        return Err(anyhow!(
            "Cache ttl_hours must be at most {} hours",
            MAX_CACHE_TTL_HOURS
        ));
    }
    Ok(())
}

fn check_health_cache_secs(secs: u64) -> anyhow::Result<()> {
    if secs > MAX_HEALTH_CACHE_SECS {
        return Err(anyhow!(
            "Health cache must be at most {} seconds",
            MAX_HEALTH_CACHE_SECS
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.cost.max_usage_log_entries, 10_000);
        assert_eq!(config.execution.backoff_base_ms, 500);
        assert!((config.cache.similarity_threshold - 0.95).abs() < 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("cost.default_daily_budget_usd", "2.5").unwrap();
        assert_eq!(config.get("cost.default_daily_budget_usd").unwrap(), "2.5");

        config.set("routing.default_fallback_tier", "local").unwrap();
        assert_eq!(config.routing.default_fallback_tier, Some(ModelTier::Local));

        config.set("routing.default_fallback_tier", "none").unwrap();
        assert_eq!(config.routing.default_fallback_tier, None);
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let mut config = Config::default();
        assert!(config.set("cost.alert_threshold", "1.5").is_err());
        assert!(config.set("cache.max_entries", "0").is_err());
        assert!(config.set("cache.similarity_threshold", "-0.1").is_err());
        assert!(config.set("routing.default_fallback_tier", "premium").is_err());
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        let mut config = Config::default();
        assert!(config.set("cache.ttl_hours", "3000000000000").is_err());
        assert!(config.set("routing.health_cache_secs", &u64::MAX.to_string()).is_err());
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.routing.health_cache_secs, 60);

        config.set("cache.ttl_hours", "87600").unwrap();
        config.set("routing.health_cache_secs", "86400").unwrap();
        assert!(config.validate().is_ok());

        let loaded: Config = toml::from_str("[cache]\nttl_hours = 3000000000000\n").unwrap();
        assert!(loaded.validate().is_err());
    }

    #[test]
    fn test_api_key_cannot_be_set() {
        let mut config = Config::default();
        assert!(config.set("providers.api_key", "sk-123").is_err());

        config.providers.api_key = Some("sk-123".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_with_missing_sections() {
        let config: Config = toml::from_str("[cache]\nttl_hours = 2\n").unwrap();
        assert_eq!(config.cache.ttl_hours, 2);
        assert_eq!(config.cache.max_entries, 1000);
        assert!((config.cost.default_daily_budget_usd - 10.0).abs() < 0.001);

        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cache.ttl_hours, 2);
    }

    #[test]
    fn test_list_contains_all_sections() {
        let keys: Vec<String> = Config::default()
            .list()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert!(keys.iter().any(|k| k.starts_with("routing.")));
        assert!(keys.iter().any(|k| k.starts_with("cost.")));
        assert!(keys.iter().any(|k| k.starts_with("cache.")));
        assert!(keys.iter().any(|k| k.starts_with("execution.")));
    }
}
