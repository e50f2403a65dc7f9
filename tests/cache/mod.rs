use knowbase::cache::SemanticCache;
use knowbase::config::SEMANTIC_CACHE_MAX_ENTRIES_PER_KB;
use knowbase::kv::KvStore;
use serde_json::json;

#[test]
fn distinct_knowledge_bases_do_not_share_cache_entries() {
    let cache = SemanticCache::new(KvStore::new());
    cache.put("kb1", "reset password", "text", vec![1.0, 0.0], json!(["kb1 answer"]));
    cache.put("kb2", "reset password", "text", vec![1.0, 0.0], json!(["kb2 answer"]));

    let (kb1_hit, kb1_sim) = cache.get("kb1", "reset password", "text", &[1.0, 0.0]).unwrap();
    assert_eq!(kb1_hit.results, json!(["kb1 answer"]));
    assert_eq!(kb1_sim, 1.0);

    cache.clear("kb1");
    assert!(cache.get("kb1", "reset password", "text", &[1.0, 0.0]).is_none());
    assert!(cache.get("kb2", "reset password", "text", &[1.0, 0.0]).is_some());
}

#[test]
fn search_type_is_part_of_the_cache_key() {
    let cache = SemanticCache::new(KvStore::new());
    cache.put("kb1", "shoes", "product", vec![1.0, 0.0], json!(["product result"]));
    assert!(cache.get("kb1", "shoes", "text", &[1.0, 0.0]).is_none());
    assert!(cache.get("kb1", "shoes", "product", &[1.0, 0.0]).is_some());
}

#[test]
fn fifo_eviction_never_exceeds_the_per_kb_cap() {
    let cache = SemanticCache::new(KvStore::new());
    for i in 0..(SEMANTIC_CACHE_MAX_ENTRIES_PER_KB + 5) {
        cache.put("kb1", &format!("distinct query {i}"), "text", vec![i as f32, 1.0], json!([]));
    }
    assert!(cache.stats("kb1").entries <= SEMANTIC_CACHE_MAX_ENTRIES_PER_KB);
}

#[test]
fn access_count_increments_on_repeated_hits() {
    let cache = SemanticCache::new(KvStore::new());
    cache.put("kb1", "billing question", "text", vec![1.0, 0.0], json!(["r1"]));
    cache.get("kb1", "billing question", "text", &[1.0, 0.0]);
    let (second, _) = cache.get("kb1", "billing question", "text", &[1.0, 0.0]).unwrap();
    assert!(second.access_count >= 1);
}
