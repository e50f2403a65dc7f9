//! HTTP surface (design §6): upload/search/admin routes over the hybrid
//! retriever, document job processor and crawl & sync subsystem, wired the
//! same way this codebase has always assembled its router — a cloneable
//! `AppState`, one handler per route, `auth_middleware` layered over
//! everything except `/health`.

use crate::cache::{CacheStats, SemanticCache};
use crate::catalog::Catalog;
use crate::config::{Config, FeatureFlags};
use crate::crawl::CrawlClient;
use crate::embeddings::EmbeddingGateway;
use crate::error::{AppError, AppResult};
use crate::jobs::{self, IngestJob, JobContext, JobQueue};
use crate::kv::KvStore;
use crate::metrics::MetricsCollector;
use crate::model::{Document, DocumentStatus, Job, ProcessingStats, ScrapeSource, ScrapeType, SyncStatus};
use crate::retriever::{HybridRetriever, SearchFilters, SearchRequest, SearchResponse, SearchType};
use crate::vector_store::VectorStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::Multipart;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub kv: KvStore,
    pub vector_store: VectorStore,
    pub cache: SemanticCache,
    pub retriever: Arc<HybridRetriever>,
    pub job_queue: Arc<JobQueue>,
    pub job_ctx: JobContext,
    pub crawl_client: Arc<CrawlClient>,
    pub embedding_gateway: Arc<EmbeddingGateway>,
    pub metrics: Arc<MetricsCollector>,
    pub config: Arc<Config>,
}

pub fn routes(state: AppState, auth_config: Arc<crate::auth::AuthConfig>) -> Router {
    let protected = Router::new()
        .route("/api/v1/documents/upload", post(upload_document))
        .route("/api/v1/documents/upload-sync", post(upload_document_sync))
        .route("/api/v1/documents/:id/status", get(document_status))
        .route("/api/v1/documents/:id", delete(delete_document))
        .route("/api/v1/documents/:id/reprocess", post(reprocess_document))
        .route("/api/v1/documents/scrape-url", post(scrape_url_sync))
        .route("/api/v1/documents/scrape-url-async", post(scrape_url_async))
        .route("/api/v1/documents/scrape-job/:id/status", get(scrape_job_status))
        .route("/api/v1/scrape-sources", post(create_scrape_source).get(list_scrape_sources))
        .route("/api/v1/search", post(search))
        .route("/api/v1/embeddings", post(embed_passthrough))
        .route("/api/v1/cache/stats", get(cache_stats))
        .route("/api/v1/cache/clear", delete(cache_clear))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(auth_config, crate::auth::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let kv_ok = {
        state.kv.set("health:probe", &true, Some(5));
        state.kv.get::<bool>("health:probe").unwrap_or(false)
    };
    let catalog_ok = true; // in-process DashMap collaborator, can't meaningfully fail to respond
    let embedder_ok = !state.embedding_gateway.model().is_empty();
    let healthy = kv_ok && catalog_ok && embedder_ok;
    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "services": {
            "kv": kv_ok,
            "catalog": catalog_ok,
            "embedder": embedder_ok,
        },
    });
    (if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }, Json(body))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

// ---- document upload / status / deletion ----

struct ParsedUpload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
    kb_id: String,
    tenant_id: String,
    document_id: Option<String>,
}

async fn parse_upload(mut multipart: Multipart) -> AppResult<ParsedUpload> {
    let mut filename = String::new();
    let mut content_type = String::new();
    let mut bytes = Vec::new();
    let mut kb_id = String::new();
    let mut tenant_id = String::new();
    let mut document_id = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().unwrap_or("upload.bin").to_string();
                content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                bytes = field.bytes().await.map_err(|e| AppError::Validation(format!("bad file field: {e}")))?.to_vec();
            }
            "kb_id" => kb_id = field.text().await.unwrap_or_default(),
            "tenant_id" => tenant_id = field.text().await.unwrap_or_default(),
            "document_id" => document_id = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    if bytes.is_empty() {
        return Err(AppError::Validation("no file data received".to_string()));
    }
    if kb_id.is_empty() {
        return Err(AppError::Validation("kb_id is required".to_string()));
    }
    Ok(ParsedUpload {
        filename,
        content_type,
        bytes,
        kb_id,
        tenant_id,
        document_id,
    })
}

fn check_file_size(config: &Config, size: usize) -> AppResult<()> {
    let max_bytes = config.max_file_mb as usize * 1024 * 1024;
    if size > max_bytes {
        return Err(AppError::Validation(format!("file exceeds max size of {} MB", config.max_file_mb)));
    }
    Ok(())
}

#[derive(Serialize)]
struct UploadResponse {
    document_id: String,
    status: &'static str,
    estimated_time_seconds: u64,
}

/// `POST /api/v1/documents/upload` — spills the upload to disk and hands it
/// to the background job queue; returns immediately with an estimate.
async fn upload_document(State(state): State<AppState>, multipart: Multipart) -> AppResult<impl IntoResponse> {
    let upload = parse_upload(multipart).await?;
    check_file_size(&state.config, upload.bytes.len())?;

    let document_id = upload.document_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state.catalog.get_or_create_kb(&upload.kb_id, &upload.tenant_id);
    let storage_path =
        jobs::spill_to_temp_file(&state.job_ctx.data_dir, &document_id, &upload.filename, &upload.bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to spill upload: {e}")))?;

    state.catalog.upsert_document(Document {
        document_id: document_id.clone(),
        kb_id: upload.kb_id.clone(),
        tenant_id: upload.tenant_id.clone(),
        filename: upload.filename.clone(),
        content_type: upload.content_type.clone(),
        size: upload.bytes.len() as u64,
        status: DocumentStatus::Queued,
        processing_stats: ProcessingStats::default(),
        content_hash: String::new(),
        scrape_source_id: None,
        storage_path: storage_path.to_string_lossy().to_string(),
        error_message: None,
        created_at: crate::util::now_unix(),
        updated_at: crate::util::now_unix(),
    });

    let job = IngestJob {
        document_id: document_id.clone(),
        kb_id: upload.kb_id.clone(),
        filename: upload.filename,
        content_type: upload.content_type,
        storage_path,
    };
    let estimated_time_seconds = state
        .job_queue
        .enqueue(&state.kv, &document_id, &upload.kb_id, upload.bytes.len() as u64, job)
        .await;
    state.metrics.record_ingestion();

    Ok(Json(UploadResponse {
        document_id,
        status: "queued",
        estimated_time_seconds,
    }))
}

/// `POST /api/v1/documents/upload-sync` — runs the full ingestion pipeline
/// inline and returns the finished `processing_stats`. Intended for small
/// files where the caller would rather block than poll.
async fn upload_document_sync(State(state): State<AppState>, multipart: Multipart) -> AppResult<impl IntoResponse> {
    let upload = parse_upload(multipart).await?;
    check_file_size(&state.config, upload.bytes.len())?;

    let document_id = upload.document_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state.catalog.get_or_create_kb(&upload.kb_id, &upload.tenant_id);
    let storage_path =
        jobs::spill_to_temp_file(&state.job_ctx.data_dir, &document_id, &upload.filename, &upload.bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to spill upload: {e}")))?;

    state.catalog.upsert_document(Document {
        document_id: document_id.clone(),
        kb_id: upload.kb_id.clone(),
        tenant_id: upload.tenant_id.clone(),
        filename: upload.filename.clone(),
        content_type: upload.content_type.clone(),
        size: upload.bytes.len() as u64,
        status: DocumentStatus::Queued,
        processing_stats: ProcessingStats::default(),
        content_hash: String::new(),
        scrape_source_id: None,
        storage_path: storage_path.to_string_lossy().to_string(),
        error_message: None,
        created_at: crate::util::now_unix(),
        updated_at: crate::util::now_unix(),
    });
    jobs::seed_job_record(&state.kv, &document_id, &upload.kb_id);

    let job = IngestJob {
        document_id: document_id.clone(),
        kb_id: upload.kb_id.clone(),
        filename: upload.filename,
        content_type: upload.content_type,
        storage_path: storage_path.clone(),
    };
    let result = jobs::run_pipeline(&job, &state.job_ctx).await;
    jobs::cleanup_temp_file(&storage_path);
    state.metrics.record_ingestion();

    if let Err(e) = result {
        let message = e.to_string();
        jobs::fail_job(&state.kv, &document_id, &message);
        let _ = state.catalog.mutate_document(&document_id, |doc| {
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(message);
        });
        return Err(e);
    }

    let document = state.catalog.get_document(&document_id)?;
    Ok(Json(document))
}

#[derive(Serialize)]
struct DocumentStatusResponse {
    status: DocumentStatus,
    progress: u8,
    current_step: String,
    total_chunks: u32,
    processed_chunks: u32,
    error_message: Option<String>,
}

async fn document_status(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    // touches the catalog first so an unknown document id reports 404 even
    // if a stale job record happens to exist under the same key
    let document = state.catalog.get_document(&id)?;
    let job: Option<Job> = state.kv.get(&jobs::job_key(&id));
    let response = match job {
        Some(job) => DocumentStatusResponse {
            status: document.status,
            progress: job.progress,
            current_step: job.current_step,
            total_chunks: job.total_chunks,
            processed_chunks: job.processed_chunks,
            error_message: job.error_message,
        },
        None => DocumentStatusResponse {
            status: document.status,
            progress: if document.status == DocumentStatus::Completed { 100 } else { 0 },
            current_step: String::new(),
            total_chunks: 0,
            processed_chunks: 0,
            error_message: document.error_message,
        },
    };
    Ok(Json(response))
}

async fn delete_document(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let document = state.catalog.get_document(&id)?;
    let chunk_ids: Vec<String> = state.catalog.chunks_for_document(&id).into_iter().map(|c| c.chunk_id).collect();
    state.vector_store.delete_document_vectors(&document.kb_id, &chunk_ids);
    if let Some(source_id) = &document.scrape_source_id {
        state.catalog.unlink_document_from_source(source_id, &id);
    }
    state.catalog.delete_document(&id);
    state.kv.delete(&jobs::job_key(&id));
    if let Some(parent) = std::path::Path::new(&document.storage_path).parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
    state.catalog.recompute_kb_stats(&document.kb_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn reprocess_document(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let estimated_time_seconds = state.job_queue.reprocess(&state.job_ctx, &id).await?;
    Ok(Json(serde_json::json!({
        "document_id": id,
        "status": "queued",
        "estimated_time_seconds": estimated_time_seconds,
    })))
}

// ---- scrape / crawl ----

#[derive(Deserialize)]
struct ScrapeUrlRequest {
    url: String,
    kb_id: String,
    #[serde(default)]
    tenant_id: String,
    #[serde(default = "default_max_depth")]
    max_depth: u32,
    #[serde(default = "default_max_pages")]
    max_pages: u32,
}

fn default_max_depth() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    1
}

fn ephemeral_scrape_source(req: &ScrapeUrlRequest) -> ScrapeSource {
    ScrapeSource {
        source_id: uuid::Uuid::new_v4().to_string(),
        kb_id: req.kb_id.clone(),
        url: req.url.clone(),
        scrape_type: if req.max_pages <= 1 { ScrapeType::SingleUrl } else { ScrapeType::Crawl },
        max_depth: req.max_depth,
        max_pages: req.max_pages,
        auto_sync_enabled: false,
        sync_interval_hours: 0,
        last_sync_at: None,
        next_sync_at: None,
        sync_status: SyncStatus::Idle,
        documents_count: 0,
        last_error: None,
    }
}

/// `POST /api/v1/documents/scrape-url` — crawls (bounded by `max_depth`/
/// `max_pages`) and ingests every discovered page before responding. Not
/// registered as a durable [`ScrapeSource`]; use `/api/v1/scrape-sources` for
/// pages that should be re-synced automatically.
async fn scrape_url_sync(State(state): State<AppState>, Json(req): Json<ScrapeUrlRequest>) -> AppResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err(AppError::Validation("url is required".to_string()));
    }
    state.catalog.get_or_create_kb(&req.kb_id, &req.tenant_id);
    let source = ephemeral_scrape_source(&req);
    let outcome =
        crate::crawl::sync_source(&state.catalog, &state.job_ctx, &state.job_queue, &state.crawl_client, &source).await?;
    Ok(Json(serde_json::json!({
        "url": req.url,
        "new": outcome.new,
        "changed": outcome.changed,
        "unchanged": outcome.unchanged,
    })))
}

fn scrape_job_key(id: &str) -> String {
    format!("scrape_job:{id}")
}

/// `POST /api/v1/documents/scrape-url-async` — same crawl, but runs in the
/// background and returns a job id immediately; progress is polled through
/// `scrape-job/{id}/status`, tracked under its own `scrape_job:{id}` key
/// (the same `Job`-shaped record the document pipeline uses, repurposing
/// `total_chunks`/`processed_chunks` as `total_pages`/`pages_processed`).
async fn scrape_url_async(State(state): State<AppState>, Json(req): Json<ScrapeUrlRequest>) -> AppResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err(AppError::Validation("url is required".to_string()));
    }
    state.catalog.get_or_create_kb(&req.kb_id, &req.tenant_id);
    let source = ephemeral_scrape_source(&req);
    let job_id = source.source_id.clone();

    let record = Job {
        document_id: job_id.clone(),
        kb_id: req.kb_id.clone(),
        status: crate::model::JobStatus::Processing,
        progress: 0,
        current_step: "crawling".to_string(),
        total_chunks: 0,
        processed_chunks: 0,
        error_message: None,
        created_at: crate::util::now_unix(),
        updated_at: crate::util::now_unix(),
    };
    state.kv.set(scrape_job_key(&job_id), &record, Some(crate::config::JOB_TTL_SECS));

    let catalog = state.catalog.clone();
    let job_ctx = state.job_ctx.clone();
    let job_queue = state.job_queue.clone();
    let crawl_client = state.crawl_client.clone();
    let kv = state.kv.clone();
    let job_id_task = job_id.clone();
    tokio::spawn(async move {
        let key = scrape_job_key(&job_id_task);
        let result = crate::crawl::sync_source(&catalog, &job_ctx, &job_queue, &crawl_client, &source).await;
        if let Some(mut record) = kv.get::<Job>(&key) {
            match result {
                Ok(outcome) => {
                    record.status = crate::model::JobStatus::Completed;
                    record.progress = 100;
                    record.current_step = "completed".to_string();
                    record.total_chunks = outcome.new + outcome.changed + outcome.unchanged;
                    record.processed_chunks = record.total_chunks;
                }
                Err(e) => record.fail(e.to_string()),
            }
            kv.set(key, &record, Some(crate::config::JOB_TTL_SECS));
        }
    });

    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

async fn scrape_job_status(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let job: Job = state
        .kv
        .get(&scrape_job_key(&id))
        .ok_or_else(|| AppError::NotFound(format!("scrape job {id} not found")))?;
    Ok(Json(serde_json::json!({
        "status": job.status,
        "pages_scraped": job.total_chunks,
        "pages_processed": job.processed_chunks,
        "total_pages": job.total_chunks,
        "error_message": job.error_message,
    })))
}

#[derive(Deserialize)]
struct CreateScrapeSourceRequest {
    kb_id: String,
    #[serde(default)]
    tenant_id: String,
    url: String,
    #[serde(default)]
    scrape_type: ScrapeType,
    #[serde(default = "default_max_depth")]
    max_depth: u32,
    #[serde(default = "default_max_pages")]
    max_pages: u32,
    #[serde(default = "default_sync_interval_hours")]
    sync_interval_hours: u32,
}

fn default_sync_interval_hours() -> u32 {
    24
}

/// `POST /api/v1/scrape-sources` — registers a durable, auto-syncing source;
/// the background scheduler (see `main.rs`) picks it up on its next due
/// cycle. Not in `spec.md`'s core HTTP table (which is explicitly a subset),
/// but without it the Crawl & Sync scheduler has nothing to iterate over.
async fn create_scrape_source(State(state): State<AppState>, Json(req): Json<CreateScrapeSourceRequest>) -> AppResult<impl IntoResponse> {
    if req.url.trim().is_empty() {
        return Err(AppError::Validation("url is required".to_string()));
    }
    state.catalog.get_or_create_kb(&req.kb_id, &req.tenant_id);
    let source = ScrapeSource {
        source_id: uuid::Uuid::new_v4().to_string(),
        kb_id: req.kb_id,
        url: req.url,
        scrape_type: req.scrape_type,
        max_depth: req.max_depth,
        max_pages: req.max_pages,
        auto_sync_enabled: true,
        sync_interval_hours: req.sync_interval_hours,
        last_sync_at: None,
        next_sync_at: Some(crate::util::now_unix()),
        sync_status: SyncStatus::Idle,
        documents_count: 0,
        last_error: None,
    };
    state.catalog.upsert_scrape_source(source.clone());
    Ok(Json(source))
}

async fn list_scrape_sources(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.list_scrape_sources())
}

// ---- search / embeddings / cache ----

#[derive(Deserialize)]
struct SearchRequestBody {
    kb_id: String,
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    search_type: SearchType,
    #[serde(default)]
    conversation_history: Vec<String>,
    #[serde(default)]
    feature_overrides: Option<FeatureFlags>,
}

fn default_top_k() -> usize {
    5
}

async fn search(State(state): State<AppState>, Json(req): Json<SearchRequestBody>) -> AppResult<Json<SearchResponse>> {
    if req.query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".to_string()));
    }
    let request = SearchRequest {
        kb_id: &req.kb_id,
        query: &req.query,
        top_k: req.top_k,
        search_type: req.search_type,
        filters: SearchFilters::default(),
        conversation_history: req.conversation_history,
        feature_overrides: req.feature_overrides,
    };
    let response = state.retriever.search(request, None).await?;
    state.metrics.record_search(response.search_time_ms as f64, response.cached);
    Ok(Json(response))
}

#[derive(Deserialize)]
struct EmbedRequest {
    text: String,
}

async fn embed_passthrough(State(state): State<AppState>, Json(req): Json<EmbedRequest>) -> AppResult<impl IntoResponse> {
    if req.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    let (embedding, tokens, model) = state.embedding_gateway.embed(&req.text).await?;
    Ok(Json(serde_json::json!({
        "embedding": embedding,
        "tokens": tokens,
        "model": model,
    })))
}

#[derive(Deserialize)]
struct CacheQuery {
    kb_id: String,
}

async fn cache_stats(State(state): State<AppState>, axum::extract::Query(q): axum::extract::Query<CacheQuery>) -> impl IntoResponse {
    Json::<CacheStats>(state.cache.stats(&q.kb_id))
}

async fn cache_clear(State(state): State<AppState>, axum::extract::Query(q): axum::extract::Query<CacheQuery>) -> impl IntoResponse {
    state.cache.clear(&q.kb_id);
    StatusCode::NO_CONTENT
}
