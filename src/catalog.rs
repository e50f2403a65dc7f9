//! In-process stand-in for the relational catalog collaborator: KnowledgeBase,
//! Document, Chunk, Product, Image and ScrapeSource records. Deletion cascades
//! (Document -> Chunks) are enforced here so no orphan chunk can outlive its
//! document, matching the invariant in the testable properties section.

use crate::error::{AppError, AppResult};
use crate::model::*;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Flat, serializable view of a [`Catalog`]'s contents, used by the snapshot
/// persistence layer.
#[derive(Serialize, Deserialize)]
pub struct CatalogSnapshot {
    kbs: Vec<KnowledgeBase>,
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
    chunk_order: Vec<(String, Vec<String>)>,
    products: Vec<Product>,
    images: Vec<Image>,
    scrape_sources: Vec<ScrapeSource>,
    documents_by_source: Vec<(String, Vec<String>)>,
}

#[derive(Clone)]
pub struct Catalog {
    kbs: Arc<DashMap<KbId, KnowledgeBase>>,
    documents: Arc<DashMap<String, Document>>,
    chunks: Arc<DashMap<String, Chunk>>,
    chunk_order: Arc<DashMap<String, Vec<String>>>,
    products: Arc<DashMap<String, Product>>,
    images: Arc<DashMap<String, Image>>,
    scrape_sources: Arc<DashMap<String, ScrapeSource>>,
    documents_by_source: Arc<DashMap<String, Vec<String>>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            kbs: Arc::new(DashMap::new()),
            documents: Arc::new(DashMap::new()),
            chunks: Arc::new(DashMap::new()),
            chunk_order: Arc::new(DashMap::new()),
            products: Arc::new(DashMap::new()),
            images: Arc::new(DashMap::new()),
            scrape_sources: Arc::new(DashMap::new()),
            documents_by_source: Arc::new(DashMap::new()),
        }
    }

    pub fn get_or_create_kb(&self, kb_id: &str, tenant_id: &str) -> KnowledgeBase {
        self.kbs
            .entry(kb_id.to_string())
            .or_insert_with(|| KnowledgeBase::new(kb_id, tenant_id))
            .clone()
    }

    pub fn get_kb(&self, kb_id: &str) -> Option<KnowledgeBase> {
        self.kbs.get(kb_id).map(|r| r.clone())
    }

    pub fn list_kbs(&self) -> Vec<KnowledgeBase> {
        self.kbs.iter().map(|r| r.clone()).collect()
    }

    pub fn upsert_document(&self, doc: Document) {
        self.documents.insert(doc.document_id.clone(), doc);
    }

    pub fn get_document(&self, document_id: &str) -> AppResult<Document> {
        self.documents
            .get(document_id)
            .map(|r| r.clone())
            .ok_or_else(|| AppError::NotFound(format!("document {document_id} not found")))
    }

    pub fn mutate_document<F: FnOnce(&mut Document)>(&self, document_id: &str, f: F) -> AppResult<()> {
        let mut doc = self
            .documents
            .get_mut(document_id)
            .ok_or_else(|| AppError::NotFound(format!("document {document_id} not found")))?;
        f(&mut doc);
        Ok(())
    }

    pub fn insert_chunks(&self, document_id: &str, chunks: Vec<Chunk>) {
        let mut order = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            order.push(chunk.chunk_id.clone());
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        self.chunk_order.insert(document_id.to_string(), order);
    }

    pub fn chunks_for_document(&self, document_id: &str) -> Vec<Chunk> {
        self.chunk_order
            .get(document_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.chunks.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.get(chunk_id).map(|c| c.clone())
    }

    pub fn chunks_for_kb(&self, kb_id: &str) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|r| r.kb_id == kb_id)
            .map(|r| r.clone())
            .collect()
    }

    pub fn chunk_count(&self, kb_id: &str) -> u64 {
        self.chunks.iter().filter(|r| r.kb_id == kb_id).count() as u64
    }

    /// Deletes a document and cascades to its chunks; idempotent on repeat calls.
    pub fn delete_document(&self, document_id: &str) {
        if let Some((_, ids)) = self.chunk_order.remove(document_id) {
            for id in ids {
                self.chunks.remove(&id);
            }
        }
        self.documents.remove(document_id);
    }

    pub fn upsert_product(&self, product: Product) {
        self.products.insert(product.product_id.clone(), product);
    }

    pub fn get_product(&self, product_id: &str) -> Option<Product> {
        self.products.get(product_id).map(|p| p.clone())
    }

    pub fn products_for_kb(&self, kb_id: &str) -> Vec<Product> {
        self.products
            .iter()
            .filter(|r| r.kb_id == kb_id)
            .map(|r| r.clone())
            .collect()
    }

    pub fn upsert_image(&self, image: Image) {
        self.images.insert(image.image_id.clone(), image);
    }

    pub fn images_for_kb(&self, kb_id: &str) -> Vec<Image> {
        self.images
            .iter()
            .filter(|r| r.kb_id == kb_id)
            .map(|r| r.clone())
            .collect()
    }

    pub fn upsert_scrape_source(&self, source: ScrapeSource) {
        self.scrape_sources.insert(source.source_id.clone(), source);
    }

    pub fn get_scrape_source(&self, source_id: &str) -> Option<ScrapeSource> {
        self.scrape_sources.get(source_id).map(|s| s.clone())
    }

    pub fn mutate_scrape_source<F: FnOnce(&mut ScrapeSource)>(&self, source_id: &str, f: F) {
        if let Some(mut s) = self.scrape_sources.get_mut(source_id) {
            f(&mut s);
        }
    }

    pub fn due_scrape_sources(&self, now: i64) -> Vec<ScrapeSource> {
        let mut due: Vec<ScrapeSource> = self
            .scrape_sources
            .iter()
            .filter(|r| {
                r.auto_sync_enabled
                    && r.sync_status != SyncStatus::Syncing
                    && r.next_sync_at.is_none_or(|t| t <= now)
            })
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|s| s.next_sync_at.unwrap_or(0));
        due.truncate(crate::config::SYNC_SOURCES_PER_CYCLE);
        due
    }

    pub fn list_scrape_sources(&self) -> Vec<ScrapeSource> {
        self.scrape_sources.iter().map(|r| r.clone()).collect()
    }

    pub fn documents_for_source(&self, source_id: &str) -> Vec<Document> {
        self.documents_by_source
            .get(source_id)
            .map(|ids| ids.iter().filter_map(|id| self.get_document(id).ok()).collect())
            .unwrap_or_default()
    }

    pub fn link_document_to_source(&self, source_id: &str, document_id: &str) {
        let mut entry = self.documents_by_source.entry(source_id.to_string()).or_default();
        if !entry.contains(&document_id.to_string()) {
            entry.push(document_id.to_string());
        }
    }

    pub fn unlink_document_from_source(&self, source_id: &str, document_id: &str) {
        if let Some(mut ids) = self.documents_by_source.get_mut(source_id) {
            ids.retain(|id| id != document_id);
        }
    }

    /// Recomputes denormalized KB stats from the catalog's current contents.
    pub fn recompute_kb_stats(&self, kb_id: &str) {
        let document_count = self.documents.iter().filter(|r| r.kb_id == kb_id).count() as u64;
        let chunk_count = self.chunk_count(kb_id);
        let product_count = self.products.iter().filter(|r| r.kb_id == kb_id).count() as u64;
        let image_count = self.images.iter().filter(|r| r.kb_id == kb_id).count() as u64;
        if let Some(mut kb) = self.kbs.get_mut(kb_id) {
            kb.stats = KnowledgeBaseStats {
                document_count,
                chunk_count,
                product_count,
                image_count,
            };
        }
    }

    /// Flattens the catalog's contents for disk persistence.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            kbs: self.kbs.iter().map(|r| r.clone()).collect(),
            documents: self.documents.iter().map(|r| r.clone()).collect(),
            chunks: self.chunks.iter().map(|r| r.clone()).collect(),
            chunk_order: self.chunk_order.iter().map(|r| (r.key().clone(), r.value().clone())).collect(),
            products: self.products.iter().map(|r| r.clone()).collect(),
            images: self.images.iter().map(|r| r.clone()).collect(),
            scrape_sources: self.scrape_sources.iter().map(|r| r.clone()).collect(),
            documents_by_source: self.documents_by_source.iter().map(|r| (r.key().clone(), r.value().clone())).collect(),
        }
    }

    /// Replaces the catalog's contents with a previously saved snapshot.
    pub fn restore(&self, snapshot: CatalogSnapshot) {
        self.kbs.clear();
        for kb in snapshot.kbs {
            self.kbs.insert(kb.kb_id.clone(), kb);
        }
        self.documents.clear();
        for doc in snapshot.documents {
            self.documents.insert(doc.document_id.clone(), doc);
        }
        self.chunks.clear();
        for chunk in snapshot.chunks {
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        self.chunk_order.clear();
        for (id, order) in snapshot.chunk_order {
            self.chunk_order.insert(id, order);
        }
        self.products.clear();
        for product in snapshot.products {
            self.products.insert(product.product_id.clone(), product);
        }
        self.images.clear();
        for image in snapshot.images {
            self.images.insert(image.image_id.clone(), image);
        }
        self.scrape_sources.clear();
        for source in snapshot.scrape_sources {
            self.scrape_sources.insert(source.source_id.clone(), source);
        }
        self.documents_by_source.clear();
        for (id, docs) in snapshot.documents_by_source {
            self.documents_by_source.insert(id, docs);
        }
    }
}
