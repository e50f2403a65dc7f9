//! Core data model: KnowledgeBase, Document, Chunk, Vector, Product, Image, Job,
//! ScrapeSource and SemanticCacheEntry, per the data model section of the design.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type KbId = String;
pub type TenantId = String;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct KnowledgeBaseStats {
    pub document_count: u64,
    pub chunk_count: u64,
    pub product_count: u64,
    pub image_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub kb_id: KbId,
    pub tenant_id: TenantId,
    pub stats: KnowledgeBaseStats,
    pub created_at: i64,
}

impl KnowledgeBase {
    pub fn new(kb_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            tenant_id: tenant_id.into(),
            stats: KnowledgeBaseStats::default(),
            created_at: crate::util::now_unix(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Status advances monotonically except the terminal transition to `Failed`,
    /// which is reachable from any non-terminal state.
    pub fn can_advance_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        if next == Failed {
            return !matches!(self, Completed | Failed);
        }
        let order = [Queued, Processing, Chunking, Embedding, Storing, Completed];
        let cur = order.iter().position(|s| *s == self);
        let nxt = order.iter().position(|s| *s == next);
        matches!((cur, nxt), (Some(c), Some(n)) if n >= c)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProcessingStats {
    pub total_pages: u32,
    pub total_chunks: u32,
    pub total_images: u32,
    pub total_tables: u32,
    pub table_chunks_added: u32,
    pub table_processing_cost: f64,
    pub tokens_used: u64,
    pub processing_ms: u64,
    pub chunks_by_type: HashMap<String, u32>,
    pub languages: Vec<String>,
    pub embedding_model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub kb_id: KbId,
    pub tenant_id: TenantId,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub status: DocumentStatus,
    pub processing_stats: ProcessingStats,
    pub content_hash: String,
    pub scrape_source_id: Option<String>,
    pub storage_path: String,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn set_status(&mut self, next: DocumentStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = crate::util::now_unix();
        true
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Heading,
    Faq,
    Table,
    Code,
    Image,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Documentation,
    Code,
    Narrative,
    Tabular,
    Faq,
    General,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub char_count: usize,
    pub word_count: usize,
    pub has_code: bool,
    pub has_list: bool,
    pub has_table: bool,
    pub has_heading: bool,
    pub has_steps: bool,
    pub original_chunk_type: String,
    pub parent_index: Option<usize>,
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub kb_id: KbId,
    pub chunk_index: u32,
    pub content: String,
    pub chunk_type: ChunkType,
    pub content_type: ContentType,
    pub metadata: ChunkMetadata,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Chunk,
    Product,
    Image,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub kb_id: KbId,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub embedding: Vec<f32>,
    pub content_preview: String,
    pub chunk_type: Option<ChunkType>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl VectorRecord {
    pub fn storage_key(kb_id: &str, entity_kind: EntityKind, entity_id: &str) -> String {
        match entity_kind {
            EntityKind::Chunk => format!("vector:{kb_id}:{entity_id}"),
            EntityKind::Product => format!("vector:{kb_id}:product:{entity_id}"),
            EntityKind::Image => format!("vector:{kb_id}:image:{entity_id}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProductVariant {
    pub variant_id: String,
    pub size: Option<String>,
    pub available: bool,
    pub price: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub kb_id: KbId,
    pub shopify_product_id: Option<String>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub inventory: i64,
    pub variants: Vec<ProductVariant>,
    pub handle: String,
    pub shop_domain: String,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
}

impl Product {
    pub fn purchase_url(&self) -> String {
        let handle = if self.handle.is_empty() {
            slugify(&self.title)
        } else {
            self.handle.clone()
        };
        format!("https://{}/products/{}", self.shop_domain, handle)
    }

    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub image_id: String,
    pub kb_id: KbId,
    pub document_id: Option<String>,
    pub storage_path: String,
    pub width: u32,
    pub height: u32,
    pub page_number: Option<u32>,
    pub description: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub document_id: String,
    pub kb_id: KbId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub total_chunks: u32,
    pub processed_chunks: u32,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Progress is monotonically non-decreasing; terminal states never regress.
    pub fn advance(&mut self, status: JobStatus, progress: u8, step: impl Into<String>) {
        if matches!(self.status, JobStatus::Completed | JobStatus::Failed) {
            return;
        }
        self.status = status;
        self.progress = self.progress.max(progress);
        self.current_step = step.into();
        self.updated_at = crate::util::now_unix();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if matches!(self.status, JobStatus::Completed | JobStatus::Failed) {
            return;
        }
        let mut msg: String = error.into();
        msg.truncate(1000);
        self.status = JobStatus::Failed;
        self.error_message = Some(msg);
        self.updated_at = crate::util::now_unix();
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeType {
    SingleUrl,
    Sitemap,
    Crawl,
}

impl Default for ScrapeType {
    fn default() -> Self {
        ScrapeType::SingleUrl
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeSource {
    pub source_id: String,
    pub kb_id: KbId,
    pub url: String,
    pub scrape_type: ScrapeType,
    pub max_depth: u32,
    pub max_pages: u32,
    pub auto_sync_enabled: bool,
    pub sync_interval_hours: u32,
    pub last_sync_at: Option<i64>,
    pub next_sync_at: Option<i64>,
    pub sync_status: SyncStatus,
    pub documents_count: u32,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticCacheEntry {
    pub cache_key: String,
    pub kb_id: KbId,
    pub query_text: String,
    pub embedding: Vec<f32>,
    pub results: serde_json::Value,
    pub search_type: String,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
}
