//! Sync scheduler and change detection (design §4.10): walks due
//! [`ScrapeSource`] records, re-crawls each, and reconciles the result
//! against previously-ingested documents by content hash.

use super::content;
use super::fetch::{CrawlClient, FetchStrategy};
use super::links;
use crate::catalog::Catalog;
use crate::jobs::{spill_to_temp_file, IngestJob, JobContext, JobQueue};
use crate::model::{Document, DocumentStatus, ProcessingStats, ScrapeSource, ScrapeType, SyncStatus};
use std::collections::{HashSet, VecDeque};
use url::Url;

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOutcome {
    pub new: u32,
    pub changed: u32,
    pub removed: u32,
    pub unchanged: u32,
}

/// Runs one pass over every due scrape source, sequentially (politeness is
/// per-client, not per-source, so concurrent sources would just contend on
/// the same delay). Sources that error are marked `sync_status = error` with
/// `last_error` set, and are retried on their normal schedule next cycle.
pub async fn run_sync_cycle(
    catalog: &Catalog,
    job_ctx: &JobContext,
    job_queue: &JobQueue,
    crawl_client: &CrawlClient,
) -> Vec<(String, SyncOutcome)> {
    let due = catalog.due_scrape_sources(crate::util::now_unix());
    let mut results = Vec::with_capacity(due.len());
    for source in due {
        catalog.mutate_scrape_source(&source.source_id, |s| s.sync_status = SyncStatus::Syncing);
        match sync_source(catalog, job_ctx, job_queue, crawl_client, &source).await {
            Ok(outcome) => {
                catalog.mutate_scrape_source(&source.source_id, |s| {
                    s.sync_status = SyncStatus::Idle;
                    s.last_error = None;
                    s.last_sync_at = Some(crate::util::now_unix());
                    s.next_sync_at = Some(crate::util::now_unix() + s.sync_interval_hours as i64 * 3600);
                    s.documents_count = catalog.documents_for_source(&source.source_id).len() as u32;
                });
                results.push((source.source_id.clone(), outcome));
            }
            Err(e) => {
                tracing::warn!(source_id = %source.source_id, error = %e, "scrape source sync failed");
                catalog.mutate_scrape_source(&source.source_id, |s| {
                    s.sync_status = SyncStatus::Error;
                    s.last_error = Some(e.to_string());
                    s.next_sync_at = Some(crate::util::now_unix() + s.sync_interval_hours as i64 * 3600);
                });
            }
        }
    }
    results
}

async fn discover_urls(crawl_client: &CrawlClient, source: &ScrapeSource) -> crate::error::AppResult<Vec<String>> {
    match source.scrape_type {
        ScrapeType::SingleUrl => Ok(vec![source.url.clone()]),
        ScrapeType::Sitemap => Ok(crawl_client.fetch_sitemap(&source.url).await),
        ScrapeType::Crawl => {
            if let Some(posts) = crawl_client.try_wordpress_feed(&source.url).await {
                return Ok(posts);
            }
            Ok(bfs_crawl(crawl_client, source).await)
        }
    }
}

async fn bfs_crawl(crawl_client: &CrawlClient, source: &ScrapeSource) -> Vec<String> {
    let Ok(base) = Url::parse(&source.url) else {
        return Vec::new();
    };
    let mut allowed_hosts = HashSet::new();
    if let Some(host) = base.host_str() {
        allowed_hosts.insert(host.to_string());
    }

    let mut visited = HashSet::new();
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((source.url.clone(), 0));
    visited.insert(source.url.clone());
    let mut collected = Vec::new();

    while let Some((url, depth)) = queue.pop_front() {
        if collected.len() as u32 >= source.max_pages {
            break;
        }
        let Ok(page) = crawl_client.fetch(&url).await else {
            continue;
        };
        if page.strategy == FetchStrategy::SitemapFallback {
            continue;
        }
        collected.push(url.clone());

        if depth >= source.max_depth {
            continue;
        }
        let Ok(page_url) = Url::parse(&url) else { continue };
        for link in links::extract_links(&page.body, &page_url, &allowed_hosts) {
            if visited.insert(link.clone()) {
                queue.push_back((link, depth + 1));
            }
        }
    }
    collected
}

/// Crawls every URL discovered for `source` and reconciles the result against
/// previously-ingested documents. Exposed at `pub(crate)` so ad hoc one-off
/// scrapes (triggered directly from the API, not from the due-sources
/// schedule) can drive the same logic through a throwaway [`ScrapeSource`].
pub(crate) async fn sync_source(
    catalog: &Catalog,
    job_ctx: &JobContext,
    job_queue: &JobQueue,
    crawl_client: &CrawlClient,
    source: &ScrapeSource,
) -> crate::error::AppResult<SyncOutcome> {
    let urls = discover_urls(crawl_client, source).await?;
    let existing_docs: Vec<Document> = catalog.documents_for_source(&source.source_id);

    let mut outcome = SyncOutcome::default();
    let mut seen_urls = HashSet::new();

    for url in &urls {
        seen_urls.insert(url.clone());
        let page = match crawl_client.fetch(url).await {
            Ok(p) if p.strategy != FetchStrategy::SitemapFallback => p,
            _ => continue,
        };
        let extracted = content::extract(&page.body);
        if extracted.text.trim().is_empty() {
            continue;
        }
        let hash = content::content_hash(&extracted.text);

        match existing_docs.iter().find(|d| &d.filename == url) {
            None => {
                ingest_page(catalog, job_ctx, job_queue, source, url, &extracted.text, &hash).await?;
                outcome.new += 1;
            }
            Some(existing) if existing.content_hash == hash => {
                outcome.unchanged += 1;
            }
            Some(existing) => {
                reingest_page(catalog, job_ctx, job_queue, existing, &extracted.text, &hash).await?;
                outcome.changed += 1;
            }
        }
    }

    for stale in existing_docs.iter().filter(|d| !seen_urls.contains(&d.filename)) {
        let chunk_ids: Vec<String> = catalog.chunks_for_document(&stale.document_id).into_iter().map(|c| c.chunk_id).collect();
        job_ctx.vector_store.delete_document_vectors(&stale.kb_id, &chunk_ids);
        catalog.unlink_document_from_source(&source.source_id, &stale.document_id);
        catalog.delete_document(&stale.document_id);
        outcome.removed += 1;
    }

    Ok(outcome)
}

async fn ingest_page(
    catalog: &Catalog,
    job_ctx: &JobContext,
    job_queue: &JobQueue,
    source: &ScrapeSource,
    url: &str,
    text: &str,
    content_hash: &str,
) -> crate::error::AppResult<()> {
    let document_id = uuid::Uuid::new_v4().to_string();
    let path = spill_to_temp_file(&job_ctx.data_dir, &document_id, "page.txt", text.as_bytes())
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("failed to spill scraped page: {e}")))?;

    let tenant_id = catalog.get_kb(&source.kb_id).map(|kb| kb.tenant_id).unwrap_or_default();
    catalog.upsert_document(Document {
        document_id: document_id.clone(),
        kb_id: source.kb_id.clone(),
        tenant_id,
        filename: url.to_string(),
        content_type: "text/plain".to_string(),
        size: text.len() as u64,
        status: DocumentStatus::Queued,
        processing_stats: ProcessingStats::default(),
        content_hash: content_hash.to_string(),
        scrape_source_id: Some(source.source_id.clone()),
        storage_path: path.to_string_lossy().to_string(),
        error_message: None,
        created_at: crate::util::now_unix(),
        updated_at: crate::util::now_unix(),
    });
    catalog.link_document_to_source(&source.source_id, &document_id);

    let job = IngestJob {
        document_id: document_id.clone(),
        kb_id: source.kb_id.clone(),
        filename: "page.txt".to_string(),
        content_type: "text/plain".to_string(),
        storage_path: path,
    };
    job_queue.enqueue(&job_ctx.kv, &document_id, &source.kb_id, text.len() as u64, job).await;
    Ok(())
}

async fn reingest_page(
    catalog: &Catalog,
    job_ctx: &JobContext,
    job_queue: &JobQueue,
    existing: &Document,
    text: &str,
    content_hash: &str,
) -> crate::error::AppResult<()> {
    let chunk_ids: Vec<String> = catalog.chunks_for_document(&existing.document_id).into_iter().map(|c| c.chunk_id).collect();
    job_ctx.vector_store.delete_document_vectors(&existing.kb_id, &chunk_ids);
    catalog.delete_document(&existing.document_id);

    let path = spill_to_temp_file(&job_ctx.data_dir, &existing.document_id, "page.txt", text.as_bytes())
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("failed to spill scraped page: {e}")))?;

    catalog.upsert_document(Document {
        status: DocumentStatus::Queued,
        content_hash: content_hash.to_string(),
        storage_path: path.to_string_lossy().to_string(),
        size: text.len() as u64,
        error_message: None,
        updated_at: crate::util::now_unix(),
        ..existing.clone()
    });
    if let Some(source_id) = &existing.scrape_source_id {
        catalog.link_document_to_source(source_id, &existing.document_id);
    }

    let job = IngestJob {
        document_id: existing.document_id.clone(),
        kb_id: existing.kb_id.clone(),
        filename: "page.txt".to_string(),
        content_type: "text/plain".to_string(),
        storage_path: path,
    };
    job_queue
        .enqueue(&job_ctx.kv, &existing.document_id, &existing.kb_id, text.len() as u64, job)
        .await;
    Ok(())
}
