//! Per-organization spend ledger
//!
//! Every organization gets its own mutex-guarded ledger, so concurrent
//! `record` calls for one org serialize while other orgs proceed untouched.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::PricingTable;
use crate::clock::{SharedClock, system_clock};
use crate::config::CostConfig;
use crate::error::Result;
use crate::storage::KeyValueStore;

/// Daily budget given to organizations that have none configured
pub const DEFAULT_DAILY_BUDGET_USD: f64 = 10.0;

/// Fraction of the daily budget at which alerts fire
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

/// Most recent usage records kept per organization
pub const MAX_USAGE_LOG_ENTRIES: usize = 10_000;

const BUDGET_NAMESPACE: &str = "budgets";

/// Daily spend ceiling and counters for one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgBudget {
    pub org_id: String,
    pub daily_budget: f64,
    pub spent_today: f64,
    /// Instant the daily counter was last zeroed
    pub last_reset: DateTime<Utc>,
    pub alert_threshold: f64,
    pub lifetime_spend: f64,
}

impl OrgBudget {
    fn new(org_id: &str, daily_budget: f64, alert_threshold: f64, now: DateTime<Utc>) -> Self {
        Self {
            org_id: org_id.to_string(),
            daily_budget,
            spent_today: 0.0,
            last_reset: now,
            alert_threshold,
            lifetime_spend: 0.0,
        }
    }

    /// Zero today's spend if the UTC date has moved past the last reset
    fn reset_if_needed(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() > self.last_reset.date_naive() {
            self.spent_today = 0.0;
            self.last_reset = now;
            true
        } else {
            false
        }
    }
}

/// One billable call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub org_id: String,
    pub model: String,
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// Spend and volume for one day of a usage window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayUsage {
    pub cost: f64,
    pub requests: u64,
}

/// Aggregated usage over a trailing window
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub org_id: String,
    pub days: u32,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub request_count: u64,
    pub cost_by_model: BTreeMap<String, f64>,
    /// Keyed by `YYYY-MM-DD`
    pub cost_by_day: BTreeMap<String, DayUsage>,
}

/// Snapshot of an organization's budget position
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub org_id: String,
    pub daily_budget: f64,
    pub spent_today: f64,
    pub remaining: f64,
    pub percentage_used: f64,
    pub alert_threshold: f64,
    pub alert_triggered: bool,
}

#[derive(Debug)]
struct OrgLedger {
    budget: OrgBudget,
    usage: VecDeque<UsageRecord>,
}

#[derive(Serialize, Deserialize)]
struct PersistedLedger {
    budget: OrgBudget,
    #[serde(default)]
    usage: Vec<UsageRecord>,
}

fn lock(ledger: &Mutex<OrgLedger>) -> MutexGuard<'_, OrgLedger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks spend against per-organization daily budgets
#[derive(Debug)]
pub struct CostTracker {
    pricing: PricingTable,
    ledgers: RwLock<HashMap<String, Arc<Mutex<OrgLedger>>>>,
    default_daily_budget: f64,
    alert_threshold: f64,
    max_log_entries: usize,
    clock: SharedClock,
}

impl CostTracker {
    /// Create a tracker with default pricing
    pub fn new(default_daily_budget: f64, alert_threshold: f64) -> Self {
        Self {
            pricing: PricingTable::default(),
            ledgers: RwLock::new(HashMap::new()),
            default_daily_budget,
            alert_threshold,
            max_log_entries: MAX_USAGE_LOG_ENTRIES,
            clock: system_clock(),
        }
    }

    /// Create a cost tracker from config
    pub fn from_config(config: &CostConfig) -> Self {
        Self::new(config.default_daily_budget_usd, config.alert_threshold)
            .with_max_log_entries(config.max_usage_log_entries)
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max.max(1);
        self
    }

    /// Pricing used for estimates and actual costs
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// USD cost of a call to `model`
    pub fn price(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.pricing.cost(model, prompt_tokens, completion_tokens)
    }

    fn ledger(&self, org_id: &str) -> Arc<Mutex<OrgLedger>> {
        if let Ok(ledgers) = self.ledgers.read()
            && let Some(ledger) = ledgers.get(org_id)
        {
            return ledger.clone();
        }

        let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
        ledgers
            .entry(org_id.to_string())
            .or_insert_with(|| {
                debug!(org = %org_id, "Creating budget with defaults");
                Arc::new(Mutex::new(OrgLedger {
                    budget: OrgBudget::new(
                        org_id,
                        self.default_daily_budget,
                        self.alert_threshold,
                        self.clock.now(),
                    ),
                    usage: VecDeque::new(),
                }))
            })
            .clone()
    }

    /// Run `f` against an org's ledger after applying the daily rollover
    fn with_ledger<T>(&self, org_id: &str, f: impl FnOnce(&mut OrgLedger) -> T) -> T {
        let ledger = self.ledger(org_id);
        let mut guard = lock(&ledger);
        if guard.budget.reset_if_needed(self.clock.now()) {
            info!(org = %org_id, "Daily spend reset");
        }
        f(&mut guard)
    }

    /// Budget for an organization, created with defaults on first use
    pub fn budget(&self, org_id: &str) -> OrgBudget {
        self.with_ledger(org_id, |l| l.budget.clone())
    }

    /// Zero today's spend if the date has rolled over. Returns whether it did.
    pub fn reset_if_needed(&self, org_id: &str) -> bool {
        let ledger = self.ledger(org_id);
        let mut guard = lock(&ledger);
        guard.budget.reset_if_needed(self.clock.now())
    }

    pub fn spent_today(&self, org_id: &str) -> f64 {
        self.with_ledger(org_id, |l| l.budget.spent_today)
    }

    pub fn daily_budget(&self, org_id: &str) -> f64 {
        self.with_ledger(org_id, |l| l.budget.daily_budget)
    }

    /// Whether `estimated_cost` fits in what is left of today's budget
    pub fn check_budget(&self, org_id: &str, estimated_cost: f64) -> bool {
        self.with_ledger(org_id, |l| {
            l.budget.spent_today + estimated_cost <= l.budget.daily_budget
        })
    }

    /// Record a billable call against an organization
    pub fn record(
        &self,
        org_id: &str,
        model: &str,
        cost: f64,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> UsageRecord {
        let record = UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            model: model.to_string(),
            cost,
            prompt_tokens,
            completion_tokens,
            timestamp: self.clock.now(),
        };

        let max = self.max_log_entries;
        self.with_ledger(org_id, |l| {
            l.budget.spent_today += cost;
            l.budget.lifetime_spend += cost;
            l.usage.push_back(record.clone());
            while l.usage.len() > max {
                l.usage.pop_front();
            }

            debug!(
                org = %org_id,
                model = %model,
                cost = cost,
                spent_today = l.budget.spent_today,
                "Recorded usage"
            );

            if l.budget.daily_budget > 0.0
                && l.budget.spent_today >= l.budget.daily_budget * l.budget.alert_threshold
            {
                warn!(
                    org = %org_id,
                    spent_today = l.budget.spent_today,
                    daily_budget = l.budget.daily_budget,
                    "Organization approaching daily budget"
                );
            }
        });

        record
    }

    /// Aggregate usage over the trailing `days` days
    pub fn usage_stats(&self, org_id: &str, days: u32) -> UsageStats {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.with_ledger(org_id, |l| {
            let mut stats = UsageStats {
                org_id: org_id.to_string(),
                days,
                ..Default::default()
            };

            for record in l.usage.iter().filter(|r| r.timestamp >= cutoff) {
                stats.total_cost += record.cost;
                stats.total_tokens += record.prompt_tokens + record.completion_tokens;
                stats.request_count += 1;
                *stats.cost_by_model.entry(record.model.clone()).or_default() += record.cost;

                let day = stats
                    .cost_by_day
                    .entry(record.timestamp.format("%Y-%m-%d").to_string())
                    .or_default();
                day.cost += record.cost;
                day.requests += 1;
            }

            stats
        })
    }

    /// Remaining budget, usage percentage and alert state
    pub fn budget_status(&self, org_id: &str) -> BudgetStatus {
        self.with_ledger(org_id, |l| {
            let b = &l.budget;
            let percentage_used = if b.daily_budget > 0.0 {
                b.spent_today / b.daily_budget * 100.0
            } else if b.spent_today > 0.0 {
                100.0
            } else {
                0.0
            };

            BudgetStatus {
                org_id: org_id.to_string(),
                daily_budget: b.daily_budget,
                spent_today: b.spent_today,
                remaining: (b.daily_budget - b.spent_today).max(0.0),
                percentage_used,
                alert_threshold: b.alert_threshold,
                alert_triggered: percentage_used >= b.alert_threshold * 100.0,
            }
        })
    }

    pub fn set_daily_budget(&self, org_id: &str, daily_budget: f64) {
        self.with_ledger(org_id, |l| l.budget.daily_budget = daily_budget.max(0.0));
    }

    pub fn set_alert_threshold(&self, org_id: &str, threshold: f64) {
        self.with_ledger(org_id, |l| l.budget.alert_threshold = threshold.clamp(0.0, 1.0));
    }

    /// Organizations with a ledger, sorted
    pub fn organizations(&self) -> Vec<String> {
        let mut orgs: Vec<String> = self
            .ledgers
            .read()
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default();
        orgs.sort();
        orgs
    }

    /// Usage records for an organization, oldest first
    pub fn usage_log(&self, org_id: &str) -> Vec<UsageRecord> {
        self.with_ledger(org_id, |l| l.usage.iter().cloned().collect())
    }

    /// Load persisted budgets, replacing in-memory ledgers for the same orgs.
    ///
    /// Entries that fail to parse are skipped; the org starts fresh.
    pub async fn load(&self, store: &dyn KeyValueStore) -> Result<usize> {
        let entries = store.list(BUDGET_NAMESPACE).await?;
        let mut loaded = 0;

        for (org_id, raw) in entries {
            let persisted: PersistedLedger = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(org = %org_id, error = %e, "Discarding corrupt budget state");
                    continue;
                }
            };

            let mut usage: VecDeque<UsageRecord> = persisted.usage.into();
            while usage.len() > self.max_log_entries {
                usage.pop_front();
            }

            let ledger = Arc::new(Mutex::new(OrgLedger {
                budget: persisted.budget,
                usage,
            }));
            self.ledgers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(org_id, ledger);
            loaded += 1;
        }

        info!(count = loaded, "Loaded organization budgets");
        Ok(loaded)
    }

    /// Persist every ledger, keeping the most recent usage records
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let ledgers: Vec<(String, Arc<Mutex<OrgLedger>>)> = self
            .ledgers
            .read()
            .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(ledgers.len());
        for (org_id, ledger) in ledgers {
            let json = {
                let guard = lock(&ledger);
                let skip = guard.usage.len().saturating_sub(self.max_log_entries);
                serde_json::to_string(&PersistedLedger {
                    budget: guard.budget.clone(),
                    usage: guard.usage.iter().skip(skip).cloned().collect(),
                })?
            };
            entries.push((org_id, json));
        }

        let count = entries.len();
        store.replace_all(BUDGET_NAMESPACE, entries).await?;
        info!(count = count, "Saved organization budgets");
        Ok(())
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_BUDGET_USD, DEFAULT_ALERT_THRESHOLD)
    }
}
