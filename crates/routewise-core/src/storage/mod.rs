//! Storage layer - key-value durability port
//!
//! Engine components persist their state (budgets, cached responses) through
//! [`KeyValueStore`] and never touch a storage format directly.
//!
//! # Architecture
//!
//! - `memory`: Process-local store for tests and ephemeral runs
//! - `sqlite`: SQLite-backed store for the CLI and long-lived services
//!
//! # Usage
//!
//! ```ignore
//! use routewise_core::storage::{KeyValueStore, SqliteStore};
//!
//! let store = SqliteStore::connect(&path).await?;
//! store.put("budgets", "org-1", json).await?;
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, CREATE_KV_STORE_TABLE_SQL};

use async_trait::async_trait;

use crate::error::Result;

/// Namespaced string key-value storage
///
/// Values are opaque strings (JSON in practice). `replace_all` swaps the full
/// contents of a namespace in one step, so readers never observe a
/// half-written snapshot.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    async fn put(&self, namespace: &str, key: &str, value: String) -> Result<()>;

    /// Returns whether a value was removed
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// All entries of a namespace, ordered by key
    async fn list(&self, namespace: &str) -> Result<Vec<(String, String)>>;

    /// Replace every entry of a namespace atomically
    async fn replace_all(&self, namespace: &str, entries: Vec<(String, String)>) -> Result<()>;

    /// Remove every entry of a namespace, returning how many were removed
    async fn clear(&self, namespace: &str) -> Result<u64>;
}
