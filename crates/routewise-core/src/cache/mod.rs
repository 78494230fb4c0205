//! Caching
//!
//! - `expiring`: generic TTL map, used for health probes
//! - `response`: exact and near-duplicate response cache with LRU eviction

mod expiring;
mod response;

pub use expiring::ExpiringCache;
pub use response::{
    CacheEntry, CacheStats, ResponseCache, jaccard_similarity, prompt_hash, prompt_preview,
    CACHE_NAMESPACE, DEFAULT_MAX_ENTRIES, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TTL_HOURS,
    PREVIEW_CHARS,
};
