//! Tuning knobs and runtime configuration, in the style of the bare `pub const`
//! module this codebase has always kept its defaults in, now generalized to the
//! knobs the retrieval pipeline and crawler need.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DASHMAP_SHARD_COUNT: usize = 128;

// Chunking
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const MAX_CHUNK_SIZE: usize = 2000;

// Embedding gateway
pub const EMBEDDING_MAX_TOKENS: usize = 8191;
pub const EMBEDDING_BATCH_SIZE: usize = 100;
pub const EMBEDDING_DIM_TEXT: usize = 1536;
pub const EMBEDDING_DIM_IMAGE: usize = 512;
pub const IMAGE_PROCESSING_CONCURRENCY: usize = 1;

// Semantic cache
pub const SEMANTIC_CACHE_TTL_SECS: i64 = 3600;
pub const SEMANTIC_CACHE_SIMILARITY_THRESHOLD: f32 = 0.95;
pub const SEMANTIC_CACHE_MAX_ENTRIES_PER_KB: usize = 1000;

// Hybrid retriever
pub const BM25_K1: f32 = 1.5;
pub const BM25_B: f32 = 0.75;
pub const BM25_WEIGHT: f32 = 0.3;
pub const MMR_LAMBDA: f32 = 0.7;
pub const MIN_RELEVANCE_SCORE: f32 = 0.5;
pub const FETCH_MULTIPLIER_WITH_POSTPROCESS: usize = 3;
pub const FETCH_MULTIPLIER_PLAIN: usize = 1;
pub const MAX_TOP_K: usize = 20;
pub const MIN_TOP_K: usize = 1;
pub const RELEVANCE_FLOOR_RESULTS: usize = 3;

// Job processor
pub const JOB_TTL_SECS: i64 = 24 * 3600;

// Crawl & sync
pub const CRAWL_DELAY_FLOOR_SECS: f64 = 3.0;
pub const CRAWL_JITTER_SECS: f64 = 2.5;
pub const CRAWL_MAX_ATTEMPTS: u32 = 4;
pub const CRAWL_FETCH_TIMEOUT_SECS: u64 = 60;
pub const SYNC_SCAN_INTERVAL_MINS: u64 = 5;
pub const SYNC_SOURCES_PER_CYCLE: usize = 10;
pub const SITEMAP_FANOUT_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    #[default]
    Simple,
    Llm,
    Hybrid,
}

/// Per-call feature toggles for the hybrid retriever, each defaulting from
/// [`FeatureFlags`] and overridable per request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub expansion: bool,
    pub rewriting: bool,
    pub bm25: bool,
    pub intent_filter: bool,
    pub mmr: bool,
    pub threshold: bool,
    pub reranking: bool,
    pub content_aware_chunking: bool,
    pub table_processing: bool,
    pub vision: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            expansion: true,
            rewriting: true,
            bm25: true,
            intent_filter: true,
            mmr: true,
            threshold: true,
            reranking: true,
            content_aware_chunking: true,
            table_processing: true,
            vision: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub max_file_mb: u64,
    pub max_pages: u32,
    pub reranker: RerankerKind,
    pub features: FeatureFlags,
    pub snapshot_interval_secs: u64,
    pub disable_bg_jobs: bool,
    pub disable_snapshots: bool,
    pub disable_sync_scheduler: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: "./data".to_string(),
            max_file_mb: 50,
            max_pages: 500,
            reranker: RerankerKind::default(),
            features: FeatureFlags::default(),
            snapshot_interval_secs: 60,
            disable_bg_jobs: false,
            disable_snapshots: false,
            disable_sync_scheduler: false,
        }
    }
}
