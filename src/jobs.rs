//! Document Job Processor (design §4.9): a background queue, structurally
//! the same mpsc-channel-plus-detached-consumer-task shape this codebase has
//! always used for background work, now driving the ingestion state machine
//! instead of cue propagation.

use crate::catalog::Catalog;
use crate::chunker::{self, TypedChunk};
use crate::config::JOB_TTL_SECS;
use crate::embeddings::EmbeddingGateway;
use crate::extract;
use crate::kv::KvStore;
use crate::model::{Chunk, ChunkType, Document, DocumentStatus, Job, JobStatus, ProcessingStats};
use crate::table::{self, ExtractionMethod};
use crate::vector_store::VectorStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct IngestJob {
    pub document_id: String,
    pub kb_id: String,
    pub filename: String,
    pub content_type: String,
    pub storage_path: PathBuf,
}

pub struct JobQueue {
    sender: mpsc::Sender<IngestJob>,
}

/// Shared state the background worker needs, handed to every job it processes.
#[derive(Clone)]
pub struct JobContext {
    pub catalog: Catalog,
    pub kv: KvStore,
    pub vector_store: VectorStore,
    pub gateway: Arc<EmbeddingGateway>,
    pub data_dir: PathBuf,
}

/// Spills `bytes` to `{data_dir}/temp_documents/{document_id}/{filename}` so
/// the background worker can process large uploads without holding them in
/// memory between the HTTP handler returning and the job actually running.
pub async fn spill_to_temp_file(data_dir: &std::path::Path, document_id: &str, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let dir = data_dir.join("temp_documents").join(document_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(filename);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

pub(crate) fn job_key(document_id: &str) -> String {
    format!("doc_job:{document_id}")
}

impl JobQueue {
    pub fn new(context: JobContext, disable_bg_jobs: bool) -> Self {
        let (tx, mut rx) = mpsc::channel(1000);

        if !disable_bg_jobs {
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    process_job(job, &context).await;
                }
            });
        }

        Self { sender: tx }
    }

    /// Estimates seconds until completion from payload size, per the
    /// `max(10, size/10_000 + size/3_000)` formula, persists the queued job
    /// record, and enqueues it for the background worker.
    pub async fn enqueue(&self, kv: &KvStore, document_id: &str, kb_id: &str, size: u64, job: IngestJob) -> u64 {
        let estimate = ((size / 10_000) + (size / 3_000)).max(10);
        seed_job_record(kv, document_id, kb_id);

        if let Err(e) = self.sender.send(job).await {
            warn!(error = %e, "failed to enqueue ingestion job");
        }
        estimate
    }

    /// Deletes existing chunks/vectors for a document and re-enqueues it
    /// under the same id.
    pub async fn reprocess(&self, context: &JobContext, document_id: &str) -> crate::error::AppResult<u64> {
        let document = context.catalog.get_document(document_id)?;
        let chunk_ids: Vec<String> = context
            .catalog
            .chunks_for_document(document_id)
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        context.vector_store.delete_document_vectors(&document.kb_id, &chunk_ids);
        context.catalog.delete_document(document_id);
        context.catalog.upsert_document(Document {
            status: DocumentStatus::Queued,
            error_message: None,
            ..document.clone()
        });

        let job = IngestJob {
            document_id: document.document_id.clone(),
            kb_id: document.kb_id.clone(),
            filename: document.filename.clone(),
            content_type: document.content_type.clone(),
            storage_path: PathBuf::from(&document.storage_path),
        };
        Ok(self.enqueue(&context.kv, &document.document_id, &document.kb_id, document.size, job).await)
    }
}

/// Writes the initial `queued` job record, shared by the async and
/// synchronous ingestion entry points so both expose the same status
/// endpoint contract.
pub(crate) fn seed_job_record(kv: &KvStore, document_id: &str, kb_id: &str) {
    let record = Job {
        document_id: document_id.to_string(),
        kb_id: kb_id.to_string(),
        status: JobStatus::Queued,
        progress: 0,
        current_step: "queued".to_string(),
        total_chunks: 0,
        processed_chunks: 0,
        error_message: None,
        created_at: crate::util::now_unix(),
        updated_at: crate::util::now_unix(),
    };
    kv.set(job_key(document_id), &record, Some(JOB_TTL_SECS));
}

fn set_job_progress(kv: &KvStore, document_id: &str, status: JobStatus, progress: u8, step: &str) {
    let key = job_key(document_id);
    if let Some(mut job) = kv.get::<Job>(&key) {
        job.advance(status, progress, step);
        kv.set(key, &job, Some(JOB_TTL_SECS));
    }
}

fn set_job_chunk_counts(kv: &KvStore, document_id: &str, total_chunks: u32, processed_chunks: u32) {
    let key = job_key(document_id);
    if let Some(mut job) = kv.get::<Job>(&key) {
        job.total_chunks = total_chunks;
        job.processed_chunks = processed_chunks;
        kv.set(key, &job, Some(JOB_TTL_SECS));
    }
}

pub(crate) fn fail_job(kv: &KvStore, document_id: &str, error: &str) {
    let key = job_key(document_id);
    if let Some(mut job) = kv.get::<Job>(&key) {
        job.fail(error);
        kv.set(key, &job, Some(JOB_TTL_SECS));
    }
}

async fn process_job(job: IngestJob, ctx: &JobContext) {
    let document_id = job.document_id.clone();
    if let Err(e) = run_pipeline(&job, ctx).await {
        error!(document_id = %document_id, error = %e, "ingestion job failed");
        let mut message = e.to_string();
        message.truncate(1000);
        fail_job(&ctx.kv, &document_id, &message);
        let _ = ctx.catalog.mutate_document(&document_id, |doc| {
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(message);
        });
    }
    cleanup_temp_file(&job.storage_path);
}

pub(crate) async fn run_pipeline(job: &IngestJob, ctx: &JobContext) -> crate::error::AppResult<()> {
    let started = std::time::Instant::now();
    let document_id = &job.document_id;

    // 1. Extract
    set_job_progress(&ctx.kv, document_id, JobStatus::Processing, 5, "extracting");
    ctx.catalog.mutate_document(document_id, |doc| {
        doc.set_status(DocumentStatus::Processing);
    })?;
    let bytes = tokio::fs::read(&job.storage_path)
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("failed to read temp file: {e}")))?;
    let extracted = extract::extract(&bytes, &job.filename, &job.content_type)?;
    set_job_progress(&ctx.kv, document_id, JobStatus::Processing, 10, "extracted");

    // 2. Chunk
    set_job_progress(&ctx.kv, document_id, JobStatus::Chunking, 20, "chunking");
    ctx.catalog.mutate_document(document_id, |doc| {
        doc.set_status(DocumentStatus::Chunking);
    })?;
    let mut typed_chunks = chunker::chunk(&extracted.text, Some(&job.filename), true);
    let mut table_stats_total = table::TableStats::default();
    for extracted_table in &extracted.tables {
        let (cell_texts, stats) = table::decompose_table(extracted_table, &job.filename, ExtractionMethod::Text);
        table_stats_total.tables_processed += stats.tables_processed;
        table_stats_total.descriptions_generated += stats.descriptions_generated;
        table_stats_total.row_chunks_created += stats.row_chunks_created;
        for (idx, text) in cell_texts.into_iter().enumerate() {
            let (chunk_type, content_type, metadata) = table::table_chunk_metadata(&text);
            typed_chunks.push(TypedChunk {
                index: typed_chunks.len() + idx,
                content: text,
                chunk_type,
                content_type,
                metadata,
            });
        }
    }
    set_job_progress(&ctx.kv, document_id, JobStatus::Chunking, 25, "chunked");

    // 3. Embed
    set_job_progress(&ctx.kv, document_id, JobStatus::Embedding, 40, "embedding");
    ctx.catalog.mutate_document(document_id, |doc| {
        doc.set_status(DocumentStatus::Embedding);
    })?;
    set_job_chunk_counts(&ctx.kv, document_id, typed_chunks.len() as u32, 0);
    let texts: Vec<String> = typed_chunks.iter().map(|c| c.content.clone()).collect();
    let embedded = ctx.gateway.embed_batch(&texts).await;
    set_job_progress(&ctx.kv, document_id, JobStatus::Embedding, 80, "embedded");

    let mut chunks = Vec::with_capacity(typed_chunks.len());
    let mut chunks_by_type: HashMap<String, u32> = HashMap::new();
    let mut tokens_used: u64 = 0;
    for (idx, (typed, embedding)) in typed_chunks.into_iter().zip(embedded.into_iter()).enumerate() {
        let Some(embedded_item) = embedding else {
            warn!(document_id = %document_id, chunk_index = idx, "dropping chunk whose embedding could not be produced");
            continue;
        };
        tokens_used += embedded_item.tokens as u64;
        let chunk = Chunk {
            chunk_id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.clone(),
            kb_id: job.kb_id.clone(),
            chunk_index: idx as u32,
            content: typed.content,
            chunk_type: typed.chunk_type,
            content_type: typed.content_type,
            metadata: typed.metadata,
        };
        *chunks_by_type.entry(chunk_type_label(chunk.chunk_type).to_string()).or_insert(0) += 1;
        chunks.push((chunk, embedded_item.vector));
    }

    // 4. Store
    set_job_progress(&ctx.kv, document_id, JobStatus::Storing, 85, "storing");
    ctx.catalog.mutate_document(document_id, |doc| {
        doc.set_status(DocumentStatus::Storing);
    })?;
    let stored_chunks: Vec<Chunk> = chunks
        .iter()
        .map(|(chunk, vector)| {
            ctx.vector_store.store_chunk_vector(&job.kb_id, chunk, vector.clone());
            chunk.clone()
        })
        .collect();
    let total_chunks = stored_chunks.len() as u32;
    ctx.catalog.insert_chunks(document_id, stored_chunks);
    ctx.catalog.recompute_kb_stats(&job.kb_id);
    set_job_chunk_counts(&ctx.kv, document_id, total_chunks, total_chunks);

    // 5. Finish
    let processing_stats = ProcessingStats {
        total_pages: extracted.pages,
        total_chunks,
        total_images: 0,
        total_tables: table_stats_total.tables_processed,
        table_chunks_added: table_stats_total.row_chunks_created,
        table_processing_cost: table_stats_total.cost_estimate,
        tokens_used,
        processing_ms: started.elapsed().as_millis() as u64,
        chunks_by_type,
        languages: Vec::new(),
        embedding_model: ctx.gateway.model().to_string(),
    };
    ctx.catalog.mutate_document(document_id, |doc| {
        doc.processing_stats = processing_stats;
        doc.set_status(DocumentStatus::Completed);
    })?;
    set_job_progress(&ctx.kv, document_id, JobStatus::Completed, 100, "completed");
    info!(document_id = %document_id, kb_id = %job.kb_id, "ingestion completed");
    Ok(())
}

fn chunk_type_label(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::Text => "text",
        ChunkType::Heading => "heading",
        ChunkType::Faq => "faq",
        ChunkType::Table => "table",
        ChunkType::Code => "code",
        ChunkType::Image => "image",
    }
}

pub(crate) fn cleanup_temp_file(path: &std::path::Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbeddingProvider;

    fn context() -> JobContext {
        let kv = KvStore::new();
        JobContext {
            catalog: Catalog::new(),
            vector_store: VectorStore::new(kv.clone()),
            kv,
            gateway: Arc::new(EmbeddingGateway::new(Arc::new(HashingEmbeddingProvider::new()))),
            data_dir: std::env::temp_dir(),
        }
    }

    fn seed_document(ctx: &JobContext, document_id: &str, filename: &str, storage_path: &std::path::Path) {
        ctx.catalog.get_or_create_kb("kb1", "tenant1");
        ctx.catalog.upsert_document(Document {
            document_id: document_id.to_string(),
            kb_id: "kb1".to_string(),
            tenant_id: "tenant1".to_string(),
            filename: filename.to_string(),
            content_type: "text/plain".to_string(),
            size: 11,
            status: DocumentStatus::Queued,
            processing_stats: ProcessingStats::default(),
            content_hash: "x".to_string(),
            scrape_source_id: None,
            storage_path: storage_path.to_string_lossy().to_string(),
            error_message: None,
            created_at: 0,
            updated_at: 0,
        });
    }

    #[tokio::test]
    async fn pipeline_produces_completed_document_with_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context();
        let path = tmp.path().join("notes.txt");
        seed_document(&ctx, "doc1", "notes.txt", &path);
        tokio::fs::write(&path, b"hello world, this is a test document about refunds.")
            .await
            .unwrap();

        let job = IngestJob {
            document_id: "doc1".to_string(),
            kb_id: "kb1".to_string(),
            filename: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            storage_path: path,
        };
        run_pipeline(&job, &ctx).await.unwrap();

        let doc = ctx.catalog.get_document("doc1").unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(!ctx.catalog.chunks_for_document("doc1").is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_marks_document_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context();
        let path = tmp.path().join("broken.xlsx");
        seed_document(&ctx, "doc2", "broken.xlsx", &path);
        tokio::fs::write(&path, b"not a spreadsheet").await.unwrap();

        let job = IngestJob {
            document_id: "doc2".to_string(),
            kb_id: "kb1".to_string(),
            filename: "broken.xlsx".to_string(),
            content_type: "application/vnd.ms-excel".to_string(),
            storage_path: path,
        };
        process_job(job, &ctx).await;

        let doc = ctx.catalog.get_document("doc2").unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error_message.is_some());
    }
}
