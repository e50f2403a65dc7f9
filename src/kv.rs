//! In-memory key-value store standing in for the external KV collaborator named
//! in the external interfaces section: vector records, job records and semantic
//! cache entries are all addressed through string keys with optional TTL, the
//! same shape the real deployment's Redis-like store would expose.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Serialize, Deserialize)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<i64>,
}

/// A sharded, TTL-aware key-value store. Writes are per-key and atomic, matching
/// the shared-resources contract in the concurrency model.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<DashMap<String, Entry>>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::with_capacity_and_shard_amount(
                1024,
                crate::config::DASHMAP_SHARD_COUNT,
            )),
        }
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl_secs: Option<i64>) {
        let expires_at = ttl_secs.map(|ttl| crate::util::now_unix() + ttl);
        let value = serde_json::to_value(value).expect("value must serialize");
        self.inner.insert(key.into(), Entry { value, expires_at });
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.inner.get(key)?;
        if let Some(exp) = entry.expires_at {
            if exp < crate::util::now_unix() {
                drop(entry);
                self.inner.remove(key);
                return None;
            }
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    pub fn delete(&self, key: &str) {
        self.inner.remove(key);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get::<serde_json::Value>(key).is_some()
    }

    /// Enumerates keys matching a prefix, honoring TTL expiry as a side effect.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let now = crate::util::now_unix();
        let mut expired = Vec::new();
        let mut keys = Vec::new();
        for item in self.inner.iter() {
            if !item.key().starts_with(prefix) {
                continue;
            }
            if item.value().expires_at.is_some_and(|exp| exp < now) {
                expired.push(item.key().clone());
                continue;
            }
            keys.push(item.key().clone());
        }
        for key in expired {
            self.inner.remove(&key);
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Flattens all entries (including already-expired ones, harmlessly) for
    /// disk persistence.
    pub fn snapshot(&self) -> Vec<(String, serde_json::Value, Option<i64>)> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().value.clone(), r.value().expires_at))
            .collect()
    }

    /// Replaces this store's contents with a previously saved snapshot.
    pub fn restore(&self, entries: Vec<(String, serde_json::Value, Option<i64>)>) {
        self.inner.clear();
        for (key, value, expires_at) in entries {
            self.inner.insert(key, Entry { value, expires_at });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let kv = KvStore::new();
        kv.set("foo", &42i32, None);
        assert_eq!(kv.get::<i32>("foo"), Some(42));
    }

    #[test]
    fn ttl_expiry() {
        let kv = KvStore::new();
        kv.set("foo", &42i32, Some(-1));
        assert_eq!(kv.get::<i32>("foo"), None);
    }

    #[test]
    fn scan_prefix_filters() {
        let kv = KvStore::new();
        kv.set("vector:kb1:a", &1i32, None);
        kv.set("vector:kb1:product:b", &2i32, None);
        kv.set("vector:kb2:a", &3i32, None);
        let mut keys = kv.scan_prefix("vector:kb1:");
        keys.sort();
        assert_eq!(keys, vec!["vector:kb1:a", "vector:kb1:product:b"]);
    }
}
