//! Vector Store (design §4.4): a flat cosine-scan index over the key-value
//! store, keyed per [`crate::model::VectorRecord::storage_key`]. At the
//! scale this service targets a brute-force scan is the right tradeoff;
//! an HNSW-backed index is an explicit non-goal until corpus size changes
//! that tradeoff.

use crate::kv::KvStore;
use crate::model::{Chunk, ChunkType, EntityKind, Product, VectorRecord};
use crate::util::cosine_similarity;
use std::collections::HashMap;

#[derive(Clone)]
pub struct VectorStore {
    kv: KvStore,
}

#[derive(Clone, Debug)]
pub struct ScoredMatch {
    pub entity_id: String,
    pub score: f32,
    pub content_preview: String,
    pub chunk_type: Option<ChunkType>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ProductSearchFilter {
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub in_stock_only: bool,
    pub max_price: Option<f64>,
}

impl VectorStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn store_chunk_vector(&self, kb_id: &str, chunk: &Chunk, embedding: Vec<f32>) {
        let record = VectorRecord {
            kb_id: kb_id.to_string(),
            entity_kind: EntityKind::Chunk,
            entity_id: chunk.chunk_id.clone(),
            embedding,
            content_preview: preview(&chunk.content),
            chunk_type: Some(chunk.chunk_type),
            metadata: HashMap::new(),
        };
        let key = VectorRecord::storage_key(kb_id, EntityKind::Chunk, &chunk.chunk_id);
        self.kv.set(key, &record, None);
    }

    pub fn store_product_vector(&self, kb_id: &str, product: &Product, embedding: Vec<f32>) {
        let record = VectorRecord {
            kb_id: kb_id.to_string(),
            entity_kind: EntityKind::Product,
            entity_id: product.product_id.clone(),
            embedding,
            content_preview: preview(&product.searchable_text()),
            chunk_type: None,
            metadata: HashMap::new(),
        };
        let key = VectorRecord::storage_key(kb_id, EntityKind::Product, &product.product_id);
        self.kv.set(key, &record, None);
    }

    pub fn store_image_vector(&self, kb_id: &str, image_id: &str, description: &str, embedding: Vec<f32>) {
        let record = VectorRecord {
            kb_id: kb_id.to_string(),
            entity_kind: EntityKind::Image,
            entity_id: image_id.to_string(),
            embedding,
            content_preview: preview(description),
            chunk_type: Some(ChunkType::Image),
            metadata: HashMap::new(),
        };
        let key = VectorRecord::storage_key(kb_id, EntityKind::Image, image_id);
        self.kv.set(key, &record, None);
    }

    pub fn delete_document_vectors(&self, kb_id: &str, chunk_ids: &[String]) {
        for chunk_id in chunk_ids {
            let key = VectorRecord::storage_key(kb_id, EntityKind::Chunk, chunk_id);
            self.kv.delete(&key);
        }
    }

    fn load_record(&self, key: &str) -> Option<VectorRecord> {
        self.kv.get(key)
    }

    /// Cosine-scans all chunk vectors for a knowledge base, excluding product
    /// and image vectors which live under their own search entry points.
    pub fn search_chunks(&self, kb_id: &str, query: &[f32], limit: usize) -> Vec<ScoredMatch> {
        let prefix = format!("vector:{kb_id}:");
        let product_prefix = format!("vector:{kb_id}:product:");
        let image_prefix = format!("vector:{kb_id}:image:");
        let mut scored: Vec<ScoredMatch> = self
            .kv
            .scan_prefix(&prefix)
            .into_iter()
            .filter(|k| !k.starts_with(&product_prefix) && !k.starts_with(&image_prefix))
            .filter_map(|k| self.load_record(&k))
            .map(|r| ScoredMatch {
                score: cosine_similarity(query, &r.embedding),
                entity_id: r.entity_id,
                content_preview: r.content_preview,
                chunk_type: r.chunk_type,
                metadata: r.metadata,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn search_products(
        &self,
        kb_id: &str,
        query: &[f32],
        limit: usize,
        filter: &ProductSearchFilter,
        lookup: impl Fn(&str) -> Option<Product>,
    ) -> Vec<(ScoredMatch, Option<Product>)> {
        let prefix = format!("vector:{kb_id}:product:");
        let mut scored: Vec<(ScoredMatch, Option<Product>)> = self
            .kv
            .scan_prefix(&prefix)
            .into_iter()
            .filter_map(|k| self.load_record(&k))
            .filter_map(|r| {
                let product = lookup(&r.entity_id);
                if let Some(p) = &product {
                    if let Some(vendor) = &filter.vendor {
                        if p.vendor.as_deref() != Some(vendor.as_str()) {
                            return None;
                        }
                    }
                    if let Some(pt) = &filter.product_type {
                        if p.product_type.as_deref() != Some(pt.as_str()) {
                            return None;
                        }
                    }
                    if filter.in_stock_only && p.inventory <= 0 {
                        return None;
                    }
                    if let Some(max_price) = filter.max_price {
                        if p.price > max_price {
                            return None;
                        }
                    }
                }
                let score = cosine_similarity(query, &r.embedding);
                Some((
                    ScoredMatch {
                        entity_id: r.entity_id,
                        score,
                        content_preview: r.content_preview,
                        chunk_type: r.chunk_type,
                        metadata: r.metadata,
                    },
                    product,
                ))
            })
            .collect();
        scored.sort_by(|a, b| b.0.score.partial_cmp(&a.0.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn search_images(&self, kb_id: &str, query: &[f32], limit: usize) -> Vec<ScoredMatch> {
        let prefix = format!("vector:{kb_id}:image:");
        let mut scored: Vec<ScoredMatch> = self
            .kv
            .scan_prefix(&prefix)
            .into_iter()
            .filter_map(|k| self.load_record(&k))
            .map(|r| ScoredMatch {
                score: cosine_similarity(query, &r.embedding),
                entity_id: r.entity_id,
                content_preview: r.content_preview,
                chunk_type: r.chunk_type,
                metadata: r.metadata,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn vector_count(&self, kb_id: &str) -> usize {
        self.kv.scan_prefix(&format!("vector:{kb_id}:")).len()
    }
}

fn preview(text: &str) -> String {
    let truncated: String = text.chars().take(200).collect();
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkMetadata, ContentType};

    fn sample_chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "doc1".to_string(),
            kb_id: "kb1".to_string(),
            chunk_index: 0,
            content: "hello world".to_string(),
            chunk_type: ChunkType::Text,
            content_type: ContentType::General,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn search_chunks_excludes_products_and_images() {
        let store = VectorStore::new(KvStore::new());
        store.store_chunk_vector("kb1", &sample_chunk("c1"), vec![1.0, 0.0]);
        let product = Product {
            product_id: "p1".to_string(),
            kb_id: "kb1".to_string(),
            shopify_product_id: None,
            title: "Shirt".to_string(),
            description: "blue".to_string(),
            price: 10.0,
            inventory: 5,
            variants: vec![],
            handle: "shirt".to_string(),
            shop_domain: "shop.example.com".to_string(),
            vendor: None,
            product_type: None,
        };
        store.store_product_vector("kb1", &product, vec![0.0, 1.0]);
        let results = store.search_chunks("kb1", &[1.0, 0.0], 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "c1");
    }

    #[test]
    fn search_ranks_by_cosine_descending() {
        let store = VectorStore::new(KvStore::new());
        store.store_chunk_vector("kb1", &sample_chunk("near"), vec![1.0, 0.0]);
        store.store_chunk_vector("kb1", &sample_chunk("far"), vec![0.0, 1.0]);
        let results = store.search_chunks("kb1", &[1.0, 0.0], 10);
        assert_eq!(results[0].entity_id, "near");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn delete_document_vectors_removes_all_listed() {
        let store = VectorStore::new(KvStore::new());
        store.store_chunk_vector("kb1", &sample_chunk("c1"), vec![1.0, 0.0]);
        store.delete_document_vectors("kb1", &["c1".to_string()]);
        assert_eq!(store.search_chunks("kb1", &[1.0, 0.0], 10).len(), 0);
    }
}
