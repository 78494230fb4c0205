//! In-memory key-value store

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::KeyValueStore;
use crate::error::{Error, Result};

type Namespaces = HashMap<String, BTreeMap<String, String>>;

/// Key-value store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Namespaces>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut Namespaces) -> T) -> Result<T> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))?;
        Ok(f(&mut data))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.with_data(|d| d.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: String) -> Result<()> {
        self.with_data(|d| {
            d.entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.with_data(|d| {
            d.get_mut(namespace)
                .map(|ns| ns.remove(key).is_some())
                .unwrap_or(false)
        })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        self.with_data(|d| {
            d.get(namespace)
                .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        })
    }

    async fn replace_all(&self, namespace: &str, entries: Vec<(String, String)>) -> Result<()> {
        self.with_data(|d| {
            d.insert(namespace.to_string(), entries.into_iter().collect());
        })
    }

    async fn clear(&self, namespace: &str) -> Result<u64> {
        self.with_data(|d| d.remove(namespace).map(|ns| ns.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.put("a", "k", "1".to_string()).await.unwrap();
        store.put("b", "k", "2".to_string()).await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b", "k").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("c", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_all_drops_stale_keys() {
        let store = MemoryStore::new();
        store.put("ns", "old", "x".to_string()).await.unwrap();
        store
            .replace_all("ns", vec![("new".to_string(), "y".to_string())])
            .await
            .unwrap();

        let entries = store.list("ns").await.unwrap();
        assert_eq!(entries, vec![("new".to_string(), "y".to_string())]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = MemoryStore::new();
        store.put("ns", "a", "1".to_string()).await.unwrap();
        store.put("ns", "b", "2".to_string()).await.unwrap();

        assert!(store.delete("ns", "a").await.unwrap());
        assert!(!store.delete("ns", "a").await.unwrap());
        assert_eq!(store.clear("ns").await.unwrap(), 1);
        assert!(store.list("ns").await.unwrap().is_empty());
    }
}
