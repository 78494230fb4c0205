//! Routewise CLI - model routing and cost optimization

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use routewise_core::cache::ResponseCache;
use routewise_core::catalog::ModelCatalog;
use routewise_core::config::Config;
use routewise_core::cost::CostTracker;
use routewise_core::execution::{ExecutionCoordinator, ExecutionResult};
use routewise_core::llm::{AdapterRegistry, ModelAdapter, OpenAiCompatibleAdapter};
use routewise_core::routing::{ModelTier, RoutingEngine, Task, TaskType};
use routewise_core::storage::SqliteStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Providers served through the OpenAI-compatible endpoint
const HTTP_PROVIDERS: [&str; 2] = ["openai", "anthropic"];

#[derive(Parser)]
#[command(name = "routewise")]
#[command(author, version, about = "Model routing and cost optimization for LLM workloads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which model a task would be routed to
    Route {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Route and execute a prompt
    Run {
        #[command(flatten)]
        task: TaskArgs,
        /// Prompt text
        prompt: String,
        /// System prompt
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Organization budgets and usage
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },

    /// Response cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List models per tier with pricing
    Models,

    /// Probe every catalog model
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct TaskArgs {
    /// Task type (general, faq, content_generation, ...)
    #[arg(short = 't', long = "type", default_value = "general")]
    task_type: TaskType,
    /// Organization whose budget applies
    #[arg(short, long)]
    org: Option<String>,
    /// Prompt size in characters
    #[arg(long, default_value_t = 1000)]
    context_length: u32,
    #[arg(long, default_value_t = 1000)]
    max_tokens: u32,
    #[arg(long)]
    reasoning: bool,
    #[arg(long)]
    generation: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    low_latency: bool,
    #[arg(long)]
    high_stakes: bool,
    #[arg(long, default_value_t = 2)]
    max_retries: u32,
    /// Tier to use when the classified tier has no models
    #[arg(long)]
    fallback_tier: Option<ModelTier>,
}

impl TaskArgs {
    fn to_task(&self) -> Task {
        let mut task = Task::new(self.task_type)
            .with_context_length(self.context_length)
            .with_max_tokens(self.max_tokens)
            .with_reasoning(self.reasoning)
            .with_generation(self.generation)
            .with_json(self.json)
            .with_low_latency(self.low_latency)
            .with_high_stakes(self.high_stakes)
            .with_max_retries(self.max_retries);
        if let Some(org) = &self.org {
            task = task.with_org(org);
        }
        if let Some(tier) = self.fallback_tier {
            task = task.with_fallback_tier(tier);
        }
        task
    }
}

#[derive(Subcommand)]
enum BudgetAction {
    /// Show today's budget position
    Status {
        #[arg(short, long)]
        org: String,
    },
    /// Show usage over a trailing window
    Usage {
        #[arg(short, long)]
        org: String,
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Set an organization's daily budget
    Set {
        #[arg(short, long)]
        org: String,
        /// Daily budget in USD
        amount: f64,
        /// Fraction of the budget at which alerts fire
        #[arg(long)]
        alert_threshold: Option<f64>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Drop expired entries
    Purge,
    /// Remove every cached response
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Persistent engine state shared by the commands
struct State {
    config: Config,
    store: SqliteStore,
    tracker: Arc<CostTracker>,
    cache: Arc<ResponseCache>,
}

impl State {
    async fn open(config: Config) -> anyhow::Result<Self> {
        let path = Config::state_path()?;
        let (store, tracker, cache) = match load_state(&path, &config).await {
            Ok(state) => state,
            Err(e) if e.is_corrupt_database() => {
                let moved_to = quarantine_state(&path)?;
                warn!(
                    path = %path.display(),
                    moved_to = %moved_to.display(),
                    error = %e,
                    "State database is corrupt, starting with empty state"
                );
                load_state(&path, &config)
                    .await
                    .with_context(|| format!("Failed to open state database: {}", path.display()))?
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open state database: {}", path.display()));
            }
        };

        debug!(path = %path.display(), "Opened state database");
        Ok(Self {
            config,
            store,
            tracker: Arc::new(tracker),
            cache: Arc::new(cache),
        })
    }

    async fn save(&self) -> anyhow::Result<()> {
        self.tracker.save(&self.store).await?;
        self.cache.save(&self.store).await?;
        Ok(())
    }

    fn catalog(&self) -> ModelCatalog {
        ModelCatalog::with_defaults().with_health_ttl(self.config.routing.health_cache_secs)
    }

    fn router(&self, catalog: ModelCatalog) -> Arc<RoutingEngine> {
        Arc::new(
            RoutingEngine::builder()
                .catalog(Arc::new(catalog))
                .cost_tracker(self.tracker.clone())
                .default_fallback_tier(self.config.routing.default_fallback_tier)
                .build(),
        )
    }
}

async fn load_state(
    path: &Path,
    config: &Config,
) -> routewise_core::Result<(SqliteStore, CostTracker, ResponseCache)> {
    let store = SqliteStore::connect(path).await?;

    let tracker = CostTracker::from_config(&config.cost);
    tracker.load(&store).await?;

    let cache = ResponseCache::from_config(&config.cache);
    cache.load(&store).await?;

    Ok((store, tracker, cache))
}

/// Move a damaged state database aside, dropping its WAL sidecars
fn quarantine_state(path: &Path) -> anyhow::Result<PathBuf> {
    let sibling = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };

    let target = sibling(".corrupt");
    std::fs::rename(path, &target)
        .with_context(|| format!("Failed to move corrupt state database: {}", path.display()))?;

    for sidecar in [sibling("-wal"), sibling("-shm")] {
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)
                .with_context(|| format!("Failed to remove {}", sidecar.display()))?;
        }
    }
    Ok(target)
}

/// Registry that builds HTTP adapters on demand for every hosted provider
fn adapter_registry(config: &Config) -> anyhow::Result<Arc<AdapterRegistry>> {
    let api_key = config.providers.resolved_api_key()?.ok_or_else(|| {
        anyhow!("No API key set. Export ROUTEWISE_API_KEY or OPENROUTER_API_KEY.")
    })?;

    let registry = Arc::new(AdapterRegistry::new());
    for provider in HTTP_PROVIDERS {
        let api_key = api_key.clone();
        let base_url = config.providers.base_url.clone();
        let timeout = config.execution.call_timeout_secs;
        registry.register_provider(provider, move |model_id| {
            let adapter = OpenAiCompatibleAdapter::builder(model_id)
                .api_key(api_key.clone())
                .base_url(base_url.clone())
                .timeout_secs(timeout)
                .build()?;
            Ok(Arc::new(adapter) as Arc<dyn ModelAdapter>)
        });
    }
    Ok(registry)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("routewise=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Route { task } => cmd_route(&task.to_task(), cli.format).await,

        Commands::Run {
            task,
            prompt,
            system,
        } => cmd_run(&task.to_task(), &prompt, system.as_deref(), cli.format).await,

        Commands::Budget { action } => cmd_budget(action, cli.format, cli.quiet).await,

        Commands::Cache { action } => cmd_cache(action, cli.format, cli.quiet).await,

        Commands::Models => cmd_models(cli.format),

        Commands::Health => cmd_health(cli.format).await,

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_route(task: &Task, format: OutputFormat) -> anyhow::Result<()> {
    let state = State::open(Config::load()?).await?;
    let router = state.router(state.catalog());
    let decision = router.route(task).await?;

    if format == OutputFormat::Json {
        return print_json(&decision);
    }

    println!("Routing decision:");
    println!("  Task type: {}", task.task_type);
    println!("  Tier: {}", decision.tier);
    println!("  Model: {}", decision.model_id);
    println!("  Provider: {}", decision.provider);
    println!("  Reason: {}", decision.reason);
    println!("  Estimated cost: ${:.6}", decision.estimated_cost);
    println!("  Expected latency: {} ms", decision.estimated_latency_ms);
    if let Some(original) = &decision.original_model {
        println!("  Replaced: {}", original);
    }
    if decision.over_budget {
        println!();
        println!("  [WARNING] Estimate exceeds the organization's daily budget");
    }
    Ok(())
}

async fn cmd_run(
    task: &Task,
    prompt: &str,
    system: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let adapters = adapter_registry(&config)?;
    let state = State::open(config).await?;

    let mut builder = ExecutionCoordinator::builder()
        .config(&state.config)
        .router(state.router(state.catalog()))
        .adapters(adapters)
        .cost_tracker(state.tracker.clone());
    if state.config.cache.enabled {
        builder = builder.cache(state.cache.clone());
    }
    let coordinator = builder.build();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let result = coordinator
        .execute_with_cancel(task, prompt, system, &cancel)
        .await;
    state.save().await?;

    if format == OutputFormat::Json {
        print_json(&result)?;
    } else {
        print_result(&result);
    }

    if result.success {
        info!(
            request_id = %task.request_id,
            cost = result.actual_cost,
            cache_hit = result.cache_hit,
            "Run complete"
        );
        Ok(())
    } else {
        Err(anyhow!(
            "{}: {}",
            result.error_code.as_deref().unwrap_or("error"),
            result.error.as_deref().unwrap_or("execution failed")
        ))
    }
}

fn print_result(result: &ExecutionResult) {
    if let Some(content) = result.content() {
        println!("{}", content);
        println!();
    }
    if let Some(decision) = &result.decision {
        println!("  Model: {} ({})", decision.model_id, decision.tier);
    }
    println!("  Cost: ${:.6}", result.actual_cost);
    if result.cache_hit {
        println!("  Cache hit, saved ${:.6}", result.cost_saved);
    }
    if result.retries > 0 {
        println!("  Retries: {}", result.retries);
        for reason in &result.retry_reasons {
            println!("    {}", reason);
        }
    }
    if result.fallback_used {
        println!("  Fallback model used");
    }
    println!("  Latency: {} ms", result.latency_ms);
}

async fn cmd_budget(action: BudgetAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let state = State::open(Config::load()?).await?;
    let tracker = &state.tracker;

    match action {
        BudgetAction::Status { org } => {
            let status = tracker.budget_status(&org);
            if format == OutputFormat::Json {
                return print_json(&status);
            }
            println!("Budget for {}:", status.org_id);
            println!("  Daily budget: ${:.2}", status.daily_budget);
            println!("  Spent today: ${:.4}", status.spent_today);
            println!("  Remaining: ${:.4}", status.remaining);
            println!("  Used: {:.1}%", status.percentage_used);
            println!("  Alert threshold: {:.0}%", status.alert_threshold * 100.0);
            if status.alert_triggered {
                println!();
                println!("  [WARNING] Approaching daily budget");
            }
        }
        BudgetAction::Usage { org, days } => {
            let stats = tracker.usage_stats(&org, days);
            if format == OutputFormat::Json {
                return print_json(&stats);
            }
            println!("Usage for {} (last {} days):", stats.org_id, stats.days);
            println!("  Requests: {}", stats.request_count);
            println!("  Tokens: {}", stats.total_tokens);
            println!("  Total cost: ${:.4}", stats.total_cost);
            if !stats.cost_by_model.is_empty() {
                println!("  By model:");
                for (model, cost) in &stats.cost_by_model {
                    println!("    {}: ${:.4}", model, cost);
                }
            }
            if !stats.cost_by_day.is_empty() {
                println!("  By day:");
                for (day, usage) in &stats.cost_by_day {
                    println!("    {}: ${:.4} ({} requests)", day, usage.cost, usage.requests);
                }
            }
        }
        BudgetAction::Set {
            org,
            amount,
            alert_threshold,
        } => {
            if amount < 0.0 {
                return Err(anyhow!("Daily budget must be non-negative"));
            }
            tracker.set_daily_budget(&org, amount);
            if let Some(threshold) = alert_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!("Alert threshold must be between 0.0 and 1.0"));
                }
                tracker.set_alert_threshold(&org, threshold);
            }
            state.save().await?;
            if !quiet {
                println!("Daily budget for {} set to ${:.2}", org, amount);
            }
        }
    }
    Ok(())
}

async fn cmd_cache(action: CacheAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let state = State::open(Config::load()?).await?;

    match action {
        CacheAction::Stats => {
            let stats = state.cache.stats();
            if format == OutputFormat::Json {
                return print_json(&stats);
            }
            println!("Response cache:");
            println!("  Entries: {}", stats.entries);
            println!("  Total hits: {}", stats.total_hits);
            println!("  Cost saved: ${:.4}", stats.cost_saved);
        }
        CacheAction::Purge => {
            let removed = state.cache.purge_expired();
            state.save().await?;
            if !quiet {
                println!("Removed {} expired entries.", removed);
            }
        }
        CacheAction::Clear => {
            state.cache.clear();
            state.save().await?;
            if !quiet {
                println!("Response cache cleared.");
            }
        }
    }
    Ok(())
}

fn cmd_models(format: OutputFormat) -> anyhow::Result<()> {
    let catalog = ModelCatalog::with_defaults();
    let pricing = routewise_core::cost::PricingTable::default();

    if format == OutputFormat::Json {
        let tiers: Vec<serde_json::Value> = catalog
            .tiers()
            .into_iter()
            .map(|(tier, models)| serde_json::json!({ "tier": tier, "models": models }))
            .collect();
        return print_json(&tiers);
    }

    for (tier, models) in catalog.tiers() {
        println!("{} (tier {}):", tier, tier.index());
        for model in models {
            let price = pricing.pricing_for(&model);
            println!(
                "  {}  ${:.2} / ${:.2} per 1M tokens",
                model, price.input_per_million, price.output_per_million
            );
        }
    }
    Ok(())
}

async fn cmd_health(format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let adapters = adapter_registry(&config)?;
    let catalog = ModelCatalog::with_defaults().with_prober(adapters);

    let report = catalog.refresh_health().await;

    if format == OutputFormat::Json {
        let report: Vec<serde_json::Value> = report
            .iter()
            .map(|(model, healthy)| serde_json::json!({ "model": model, "healthy": healthy }))
            .collect();
        return print_json(&report);
    }

    println!("Model health:");
    for (model, healthy) in &report {
        let status = if *healthy { "ok" } else { "unreachable" };
        println!("  {}: {}", model, status);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
