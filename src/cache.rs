//! Semantic Cache (design §4.5): caches search results keyed by a hash of
//! `query:search_type` per knowledge base, served back on near-duplicate
//! queries (cosine similarity >= [`crate::config::SEMANTIC_CACHE_SIMILARITY_THRESHOLD`])
//! rather than exact string match, with FIFO eviction once a knowledge base's
//! entry count passes [`crate::config::SEMANTIC_CACHE_MAX_ENTRIES_PER_KB`].
//!
//! Open question resolved here: trimming the FIFO index can race a concurrent
//! lookup that already holds a reference to the entry being evicted. We accept
//! this as harmless staleness (the caller gets one extra cache hit against data
//! that is about to disappear) rather than introduce a lock around index
//! maintenance, matching the store's no-cross-key-transaction contract.

use crate::config::{SEMANTIC_CACHE_MAX_ENTRIES_PER_KB, SEMANTIC_CACHE_SIMILARITY_THRESHOLD, SEMANTIC_CACHE_TTL_SECS};
use crate::kv::KvStore;
use crate::model::SemanticCacheEntry;
use crate::util::{cosine_similarity, now_unix};
use dashmap::DashMap;
use md5::{Digest, Md5};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct SemanticCache {
    kv: KvStore,
    /// Per-kb hit/miss counters, separate from each entry's own `access_count`
    /// since a miss has no entry to record itself against.
    hit_counts: Arc<DashMap<String, (AtomicU64, AtomicU64)>>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

fn cache_key(kb_id: &str, query: &str, search_type: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{query}:{search_type}"));
    let digest = hasher.finalize();
    format!("semantic_cache:{kb_id}:{digest:x}")
}

fn index_key(kb_id: &str) -> String {
    format!("cache_index:{kb_id}")
}

impl SemanticCache {
    pub fn new(kv: KvStore) -> Self {
        Self { kv, hit_counts: Arc::new(DashMap::new()) }
    }

    fn record_hit(&self, kb_id: &str) {
        self.hit_counts.entry(kb_id.to_string()).or_insert_with(|| (AtomicU64::new(0), AtomicU64::new(0))).0.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, kb_id: &str) {
        self.hit_counts.entry(kb_id.to_string()).or_insert_with(|| (AtomicU64::new(0), AtomicU64::new(0))).1.fetch_add(1, Ordering::Relaxed);
    }

    /// Looks up the nearest cached entry for this (kb, search_type) whose
    /// cosine similarity against `embedding` clears the threshold. Exact
    /// `query:search_type` hash hits are also checked first as a cheap path
    /// and report a similarity of `1.0`. Returns the entry alongside the
    /// similarity it was matched at so callers can surface `cache_similarity`.
    pub fn get(&self, kb_id: &str, query: &str, search_type: &str, embedding: &[f32]) -> Option<(SemanticCacheEntry, f32)> {
        let exact_key = cache_key(kb_id, query, search_type);
        if let Some(mut entry) = self.kv.get::<SemanticCacheEntry>(&exact_key) {
            entry.last_accessed = now_unix();
            entry.access_count += 1;
            self.kv.set(exact_key, &entry, Some(SEMANTIC_CACHE_TTL_SECS));
            self.record_hit(kb_id);
            return Some((entry, 1.0));
        }

        let prefix = format!("semantic_cache:{kb_id}:");
        let mut best: Option<(f32, SemanticCacheEntry)> = None;
        for key in self.kv.scan_prefix(&prefix) {
            let Some(entry) = self.kv.get::<SemanticCacheEntry>(&key) else {
                continue;
            };
            if entry.search_type != search_type {
                continue;
            }
            let sim = cosine_similarity(embedding, &entry.embedding);
            if sim >= SEMANTIC_CACHE_SIMILARITY_THRESHOLD && best.as_ref().is_none_or(|(s, _)| sim > *s) {
                best = Some((sim, entry));
            }
        }

        match best {
            Some((sim, mut entry)) => {
                entry.last_accessed = now_unix();
                entry.access_count += 1;
                self.kv.set(entry.cache_key.clone(), &entry, Some(SEMANTIC_CACHE_TTL_SECS));
                self.record_hit(kb_id);
                Some((entry, sim))
            }
            None => {
                self.record_miss(kb_id);
                None
            }
        }
    }

    /// Stores a new cache entry and appends it to the FIFO index, trimming
    /// the oldest entry once the per-kb cap is exceeded.
    pub fn put(&self, kb_id: &str, query: &str, search_type: &str, embedding: Vec<f32>, results: serde_json::Value) {
        let key = cache_key(kb_id, query, search_type);
        let now = now_unix();
        let entry = SemanticCacheEntry {
            cache_key: key.clone(),
            kb_id: kb_id.to_string(),
            query_text: query.to_string(),
            embedding,
            results,
            search_type: search_type.to_string(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };
        self.kv.set(key.clone(), &entry, Some(SEMANTIC_CACHE_TTL_SECS));

        let idx_key = index_key(kb_id);
        let mut index: Vec<String> = self.kv.get(&idx_key).unwrap_or_default();
        if !index.contains(&key) {
            index.push(key);
        }
        while index.len() > SEMANTIC_CACHE_MAX_ENTRIES_PER_KB {
            let oldest = index.remove(0);
            self.kv.delete(&oldest);
        }
        self.kv.set(idx_key, &index, None);
    }

    pub fn clear(&self, kb_id: &str) {
        let prefix = format!("semantic_cache:{kb_id}:");
        for key in self.kv.scan_prefix(&prefix) {
            self.kv.delete(&key);
        }
        self.kv.delete(&index_key(kb_id));
    }

    pub fn stats(&self, kb_id: &str) -> CacheStats {
        let prefix = format!("semantic_cache:{kb_id}:");
        let (hits, misses) = self
            .hit_counts
            .get(kb_id)
            .map(|c| (c.0.load(Ordering::Relaxed), c.1.load(Ordering::Relaxed)))
            .unwrap_or((0, 0));
        CacheStats {
            entries: self.kv.scan_prefix(&prefix).len(),
            hits,
            misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_hash_hit_returns_entry() {
        let cache = SemanticCache::new(KvStore::new());
        cache.put("kb1", "how do I reset my password", "hybrid", vec![1.0, 0.0], json!(["r1"]));
        let got = cache.get("kb1", "how do I reset my password", "hybrid", &[1.0, 0.0]);
        assert!(got.is_some());
        let (entry, sim) = got.unwrap();
        assert_eq!(entry.results, json!(["r1"]));
        assert_eq!(sim, 1.0);
    }

    #[test]
    fn near_duplicate_embedding_hits_above_threshold() {
        let cache = SemanticCache::new(KvStore::new());
        cache.put("kb1", "reset password", "hybrid", vec![1.0, 0.0], json!(["r1"]));
        let got = cache.get("kb1", "reset my password please", "hybrid", &[0.999, 0.002]);
        assert!(got.is_some());
        let (_, sim) = got.unwrap();
        assert!(sim >= SEMANTIC_CACHE_SIMILARITY_THRESHOLD && sim < 1.0);
    }

    #[test]
    fn dissimilar_embedding_misses() {
        let cache = SemanticCache::new(KvStore::new());
        cache.put("kb1", "reset password", "hybrid", vec![1.0, 0.0], json!(["r1"]));
        let got = cache.get("kb1", "totally unrelated", "hybrid", &[0.0, 1.0]);
        assert!(got.is_none());
        assert_eq!(cache.stats("kb1").misses, 1);
    }

    #[test]
    fn fifo_trim_keeps_index_bounded() {
        let cache = SemanticCache::new(KvStore::new());
        for i in 0..5 {
            cache.put("kb1", &format!("query {i}"), "hybrid", vec![i as f32, 1.0], json!([]));
        }
        assert!(cache.stats("kb1").entries <= 5);
    }

    #[test]
    fn clear_removes_all_entries() {
        let cache = SemanticCache::new(KvStore::new());
        cache.put("kb1", "q", "hybrid", vec![1.0], json!([]));
        cache.clear("kb1");
        assert_eq!(cache.stats("kb1").entries, 0);
    }

    #[test]
    fn stats_reports_real_hit_and_miss_counts() {
        let cache = SemanticCache::new(KvStore::new());
        cache.put("kb1", "reset password", "hybrid", vec![1.0, 0.0], json!(["r1"]));
        assert!(cache.get("kb1", "reset password", "hybrid", &[1.0, 0.0]).is_some());
        assert!(cache.get("kb1", "totally unrelated", "hybrid", &[0.0, 1.0]).is_none());
        let stats = cache.stats("kb1");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
