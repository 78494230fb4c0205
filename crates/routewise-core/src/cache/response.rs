//! Response cache with TTL and least-recently-accessed eviction
//!
//! Lookups are exact (SHA-256 of the prompt) or near-duplicate (token-set
//! Jaccard over a short prompt preview). Entries are scoped by the system
//! prompt they were answered under; near-duplicate matching never crosses
//! scopes. Expired entries are removed only when a lookup touches them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::storage::KeyValueStore;

pub const DEFAULT_TTL_HOURS: i64 = 24;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Characters of the prompt kept for similarity matching
pub const PREVIEW_CHARS: usize = 200;

/// Storage namespace for persisted entries
pub const CACHE_NAMESPACE: &str = "response_cache";

/// SHA-256 hex digest of a prompt
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

/// First [`PREVIEW_CHARS`] characters of a prompt
pub fn prompt_preview(prompt: &str) -> String {
    prompt.chars().take(PREVIEW_CHARS).collect()
}

/// Scope of a system prompt: empty when there is none, else its hash
pub fn context_hash(system_prompt: Option<&str>) -> String {
    match system_prompt {
        Some(system) if !system.is_empty() => prompt_hash(system),
        _ => String::new(),
    }
}

fn entry_key(prompt: &str, context: &str) -> String {
    if context.is_empty() {
        prompt_hash(prompt)
    } else {
        prompt_hash(&format!("{}\n{}", context, prompt))
    }
}

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of two token sets; two empty sets are identical
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// A cached model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Storage key; covers the prompt and its system-prompt scope
    pub prompt_hash: String,
    /// Hash of the system prompt, empty when there was none
    #[serde(default)]
    pub context_hash: String,
    pub prompt_preview: String,
    pub response: String,
    pub model: String,
    /// What the call cost when it was made
    pub original_cost: f64,
    pub created_at: DateTime<Utc>,
    pub hits: u64,
    pub last_accessed: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_hits: u64,
    /// Sum of original cost times hits across entries
    pub cost_saved: f64,
}

/// Exact and near-duplicate response cache
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    clock: SharedClock,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            clock: system_clock(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let ttl = i64::try_from(config.ttl_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        Self::new(ttl, config.max_entries)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.ttl
    }

    /// Exact lookup. Expired entries are removed and reported as absent.
    pub fn get(&self, prompt: &str) -> Option<CacheEntry> {
        self.get_in(prompt, None)
    }

    /// Exact lookup within a system-prompt scope
    pub fn get_in(&self, prompt: &str, system_prompt: Option<&str>) -> Option<CacheEntry> {
        let hash = entry_key(prompt, &context_hash(system_prompt));
        let now = self.clock.now();
        let mut entries = self.entries();
        Self::touch(&mut entries, &hash, now, |e| self.is_expired(e, now))
    }

    fn touch(
        entries: &mut HashMap<String, CacheEntry>,
        hash: &str,
        now: DateTime<Utc>,
        expired: impl Fn(&CacheEntry) -> bool,
    ) -> Option<CacheEntry> {
        let entry = entries.get_mut(hash)?;
        if expired(entry) {
            debug!(hash = %hash, "Dropping expired cache entry");
            entries.remove(hash);
            return None;
        }
        entry.hits += 1;
        entry.last_accessed = now;
        Some(entry.clone())
    }

    /// Exact match first, then the most similar live entry at or above `threshold`
    pub fn find_similar(&self, prompt: &str, threshold: f64) -> Option<CacheEntry> {
        self.find_similar_in(prompt, None, threshold)
    }

    /// [`ResponseCache::find_similar`] restricted to entries answered under
    /// the same system prompt
    pub fn find_similar_in(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        threshold: f64,
    ) -> Option<CacheEntry> {
        let context = context_hash(system_prompt);
        let hash = entry_key(prompt, &context);
        let now = self.clock.now();
        let mut entries = self.entries();

        if let Some(hit) = Self::touch(&mut entries, &hash, now, |e| self.is_expired(e, now)) {
            return Some(hit);
        }

        let query = token_set(&prompt_preview(prompt));
        let mut expired = Vec::new();
        let mut best: Option<(f64, &CacheEntry)> = None;

        for (key, entry) in entries.iter() {
            if self.is_expired(entry, now) {
                expired.push(key.clone());
                continue;
            }
            if entry.context_hash != context {
                continue;
            }
            let score = jaccard_similarity(&query, &token_set(&entry.prompt_preview));
            if score < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, best_entry)) => {
                    score > best_score
                        || (score == best_score && entry.prompt_hash < best_entry.prompt_hash)
                }
            };
            if better {
                best = Some((score, entry));
            }
        }

        let best = best.map(|(score, entry)| (score, entry.prompt_hash.clone()));
        for key in &expired {
            entries.remove(key);
        }

        let (score, key) = best?;
        debug!(similarity = score, "Near-duplicate cache hit");
        Self::touch(&mut entries, &key, now, |_| false)
    }

    /// Store a response, evicting least-recently-accessed entries at capacity
    pub fn put(&self, prompt: &str, response: &str, model: &str, cost: f64) {
        self.put_in(prompt, None, response, model, cost);
    }

    /// Store a response under a system-prompt scope
    pub fn put_in(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        response: &str,
        model: &str,
        cost: f64,
    ) {
        let context = context_hash(system_prompt);
        let hash = entry_key(prompt, &context);
        let now = self.clock.now();
        let mut entries = self.entries();

        if !entries.contains_key(&hash) && entries.len() >= self.max_entries {
            let batch = (self.max_entries / 10).max(1);
            let needed = entries.len() + 1 - self.max_entries;
            Self::evict_lru(&mut entries, batch.max(needed));
        }

        entries.insert(
            hash.clone(),
            CacheEntry {
                prompt_hash: hash,
                context_hash: context,
                prompt_preview: prompt_preview(prompt),
                response: response.to_string(),
                model: model.to_string(),
                original_cost: cost,
                created_at: now,
                hits: 0,
                last_accessed: now,
            },
        );
    }

    fn evict_lru(entries: &mut HashMap<String, CacheEntry>, count: usize) {
        let mut by_access: Vec<(DateTime<Utc>, String)> = entries
            .values()
            .map(|e| (e.last_accessed, e.prompt_hash.clone()))
            .collect();
        by_access.sort();

        for (_, key) in by_access.into_iter().take(count) {
            entries.remove(&key);
        }
        debug!(evicted = count, "Evicted least-recently-accessed cache entries");
    }

    /// Drop the entry stored for exactly this prompt
    pub fn remove(&self, prompt: &str) -> bool {
        self.remove_in(prompt, None)
    }

    pub fn remove_in(&self, prompt: &str, system_prompt: Option<&str>) -> bool {
        let hash = entry_key(prompt, &context_hash(system_prompt));
        self.entries().remove(&hash).is_some()
    }

    /// Entry count, total hits and cost saved
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            entries: entries.len(),
            total_hits: entries.values().map(|e| e.hits).sum(),
            cost_saved: entries
                .values()
                .map(|e| e.original_cost * e.hits as f64)
                .sum(),
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| now - e.created_at <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Replace in-memory entries with the persisted ones.
    ///
    /// Unparseable entries are dropped. If more entries are stored than the
    /// cache holds, the most recently accessed are kept.
    pub async fn load(&self, store: &dyn KeyValueStore) -> Result<usize> {
        let raw = store.list(CACHE_NAMESPACE).await?;

        let mut loaded: Vec<CacheEntry> = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match serde_json::from_str::<CacheEntry>(&value) {
                Ok(entry) => loaded.push(entry),
                Err(e) => warn!(key = %key, error = %e, "Discarding corrupt cache entry"),
            }
        }

        loaded.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        loaded.truncate(self.max_entries);

        let count = loaded.len();
        let mut entries = self.entries();
        entries.clear();
        entries.extend(loaded.into_iter().map(|e| (e.prompt_hash.clone(), e)));

        info!(count = count, "Loaded response cache");
        Ok(count)
    }

    /// Persist a snapshot of every entry
    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let snapshot: Vec<CacheEntry> = self.entries().values().cloned().collect();

        let mut values = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            values.push((entry.prompt_hash.clone(), serde_json::to_string(entry)?));
        }

        store.replace_all(CACHE_NAMESPACE, values).await?;
        info!(count = snapshot.len(), "Saved response cache");
        Ok(())
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_TTL_HOURS), DEFAULT_MAX_ENTRIES)
    }
}
