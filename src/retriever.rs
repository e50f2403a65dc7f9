//! Hybrid Retriever (design §4.8): the orchestration point for every search
//! request. Exactly one dense (embedding) search is made per query; BM25,
//! intent scoring, MMR and reranking all operate on that single candidate
//! set rather than issuing further vector searches.

use crate::bm25::{self, Bm25Candidate};
use crate::cache::SemanticCache;
use crate::catalog::Catalog;
use crate::config::{
    FeatureFlags, FETCH_MULTIPLIER_PLAIN, FETCH_MULTIPLIER_WITH_POSTPROCESS, MAX_TOP_K, MIN_RELEVANCE_SCORE, MIN_TOP_K,
    RELEVANCE_FLOOR_RESULTS,
};
use crate::embeddings::EmbeddingGateway;
use crate::intent::{self, Intent};
use crate::mmr::{self, MmrCandidate};
use crate::model::Product;
use crate::query::{self, QueryRewriteClient};
use crate::reranker::{RerankCandidate, Reranker};
use crate::vector_store::{ProductSearchFilter, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Text,
    Image,
    Product,
}

impl Default for SearchType {
    fn default() -> Self {
        SearchType::Text
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScoringDetails {
    pub cosine: f32,
    pub bm25: Option<f32>,
    pub combined: f32,
    pub rerank: Option<f32>,
    pub intent_modifier: Option<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    Chunk { document_id: String, chunk_id: String, chunk_index: u32 },
    Product { product_id: String, purchase_url: String },
    Image { image_id: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub result_id: String,
    pub content: String,
    pub source: SourceRef,
    pub score: f32,
    pub scoring_details: ScoringDetails,
    pub metadata: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnhancedSearchInfo {
    pub original: String,
    pub rewritten: Option<String>,
    pub search_terms: Option<Vec<String>>,
    pub detected_intent: Option<String>,
    pub features_applied: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub text_results: Vec<SearchResultItem>,
    pub image_results: Vec<SearchResultItem>,
    pub product_results: Vec<SearchResultItem>,
    pub total_found: usize,
    pub returned: usize,
    pub chunks_searched: usize,
    pub query_tokens: usize,
    pub embedding_model: String,
    pub search_time_ms: u64,
    pub cached: bool,
    pub cache_similarity: f32,
    pub enhanced_search: EnhancedSearchInfo,
}

#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    pub product: ProductSearchFilter,
}

pub struct SearchRequest<'a> {
    pub kb_id: &'a str,
    pub query: &'a str,
    pub top_k: usize,
    pub search_type: SearchType,
    pub filters: SearchFilters,
    pub conversation_history: Vec<String>,
    pub feature_overrides: Option<FeatureFlags>,
}

pub struct HybridRetriever {
    catalog: Catalog,
    vector_store: VectorStore,
    cache: SemanticCache,
    gateway: Arc<EmbeddingGateway>,
    reranker: Reranker,
    default_features: FeatureFlags,
}

impl HybridRetriever {
    pub fn new(
        catalog: Catalog,
        vector_store: VectorStore,
        cache: SemanticCache,
        gateway: Arc<EmbeddingGateway>,
        reranker: Reranker,
        default_features: FeatureFlags,
    ) -> Self {
        Self {
            catalog,
            vector_store,
            cache,
            gateway,
            reranker,
            default_features,
        }
    }

    pub async fn search(
        &self,
        request: SearchRequest<'_>,
        rewriter: Option<&dyn QueryRewriteClient>,
    ) -> crate::error::AppResult<SearchResponse> {
        let start = std::time::Instant::now();
        let features = request.feature_overrides.unwrap_or(self.default_features);
        let top_k = request.top_k.clamp(MIN_TOP_K, MAX_TOP_K);
        let mut features_applied = Vec::new();

        // 1. Intent
        let detected_intent = if features.intent_filter {
            features_applied.push("intent_filter".to_string());
            Some(intent::classify(request.query))
        } else {
            None
        };

        // 2. Rewrite
        let mut effective_query = request.query.to_string();
        let mut rewritten = None;
        if features.rewriting && !request.conversation_history.is_empty() {
            if let Some(client) = rewriter {
                match query::rewrite_with_history(request.query, &request.conversation_history, client).await {
                    Ok(Some(r)) => {
                        features_applied.push("rewriting".to_string());
                        effective_query = r.clone();
                        rewritten = Some(r);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "query rewrite failed, using original query"),
                }
            }
        }

        // 3. Expand (BM25 terms only, never vector fan-out)
        let search_terms = if features.bm25 {
            features_applied.push("bm25".to_string());
            Some(query::get_search_terms(&effective_query))
        } else {
            None
        };

        // 4. Semantic cache probe (text search only)
        let (embedding, _tokens, model) = self.gateway.embed(&effective_query).await?;
        if request.search_type == SearchType::Text {
            if let Some((entry, cache_similarity)) = self.cache.get(request.kb_id, &effective_query, "text", &embedding) {
                if let Ok(cached_results) = serde_json::from_value::<Vec<SearchResultItem>>(entry.results.clone()) {
                    let elapsed = start.elapsed().as_millis() as u64;
                    return Ok(SearchResponse {
                        returned: cached_results.len(),
                        total_found: cached_results.len(),
                        text_results: cached_results,
                        image_results: Vec::new(),
                        product_results: Vec::new(),
                        chunks_searched: 0,
                        query_tokens: bm25::tokenize(&effective_query).len(),
                        embedding_model: model,
                        search_time_ms: elapsed,
                        cached: true,
                        cache_similarity,
                        enhanced_search: EnhancedSearchInfo {
                            original: request.query.to_string(),
                            rewritten,
                            search_terms,
                            detected_intent: detected_intent.map(|i| i.as_str().to_string()),
                            features_applied,
                        },
                    });
                }
            }
        }

        // 5. Dense search
        let post_process = features.mmr || features.reranking || features.intent_filter;
        let fetch_multiplier = if post_process {
            FETCH_MULTIPLIER_WITH_POSTPROCESS
        } else {
            FETCH_MULTIPLIER_PLAIN
        };
        let fetch_count = top_k * fetch_multiplier;
        let matches = self.vector_store.search_chunks(request.kb_id, &embedding, fetch_count);
        let chunks_searched = self.vector_store.vector_count(request.kb_id);

        let mut scored: Vec<(SearchResultItem, ScoringDetails)> = matches
            .into_iter()
            .filter_map(|m| {
                let chunk = self.catalog.get_chunk(&m.entity_id)?;
                let scoring = ScoringDetails {
                    cosine: m.score,
                    combined: m.score,
                    ..Default::default()
                };
                let item = SearchResultItem {
                    result_id: chunk.chunk_id.clone(),
                    content: chunk.content.clone(),
                    source: SourceRef::Chunk {
                        document_id: chunk.document_id.clone(),
                        chunk_id: chunk.chunk_id.clone(),
                        chunk_index: chunk.chunk_index,
                    },
                    score: m.score,
                    scoring_details: scoring.clone(),
                    metadata: serde_json::to_value(&chunk.metadata).unwrap_or_default(),
                };
                Some((item, scoring))
            })
            .collect();

        // 6. BM25 boost
        if let Some(terms) = &search_terms {
            let candidates: Vec<Bm25Candidate> = scored
                .iter()
                .map(|(item, _)| Bm25Candidate {
                    id: item.result_id.as_str(),
                    tokens: bm25::tokenize(&item.content),
                })
                .collect();
            let joined_terms = terms.join(" ");
            let raw_scores = bm25::score_candidates(&joined_terms, &candidates);
            let normalized = bm25::normalize_scores(&raw_scores);
            for (item, scoring) in scored.iter_mut() {
                let bm25_score = normalized.get(&item.result_id).copied().unwrap_or(0.0);
                scoring.bm25 = Some(bm25_score);
                let combined = (1.0 - crate::config::BM25_WEIGHT) * scoring.cosine + crate::config::BM25_WEIGHT * bm25_score;
                scoring.combined = combined;
                item.score = combined;
                item.scoring_details = scoring.clone();
            }
            scored.sort_by(rank_cmp);
        }

        // 7. Intent modifier
        if let Some(intent_value) = detected_intent {
            for (item, scoring) in scored.iter_mut() {
                let modifier = intent::context_score_modifier(intent_value, &item.content);
                scoring.intent_modifier = Some(modifier);
                let combined = (scoring.combined + modifier).clamp(0.0, 1.0);
                scoring.combined = combined;
                item.score = combined;
                item.scoring_details = scoring.clone();
            }
            scored.sort_by(rank_cmp);
        }

        // 8. Threshold gate, retaining at least min(top_k, 3)
        if features.threshold {
            let floor = top_k.min(RELEVANCE_FLOOR_RESULTS);
            let above_threshold = scored.iter().filter(|(item, _)| item.score >= MIN_RELEVANCE_SCORE).count();
            scored.truncate(above_threshold.max(floor).min(scored.len()));
        }

        // 9. MMR diversification
        if features.mmr && scored.len() > top_k {
            features_applied.push("mmr".to_string());
            let candidates: Vec<MmrCandidate> = scored
                .iter()
                .map(|(item, _)| MmrCandidate {
                    id: item.result_id.clone(),
                    relevance: item.score,
                    text: item.content.clone(),
                })
                .collect();
            let diversified = mmr::diversify_default(candidates, top_k);
            let by_id: std::collections::HashMap<String, (SearchResultItem, ScoringDetails)> =
                scored.into_iter().map(|(item, scoring)| (item.result_id.clone(), (item, scoring))).collect();
            scored = diversified.into_iter().filter_map(|c| by_id.get(&c.id).cloned()).collect();
        }

        // 10. Rerank
        if features.reranking {
            features_applied.push("reranking".to_string());
            let candidates: Vec<RerankCandidate> = scored
                .iter()
                .map(|(item, _)| RerankCandidate {
                    id: item.result_id.clone(),
                    text: item.content.clone(),
                    original_score: item.score,
                    score: item.score,
                })
                .collect();
            let reranked = self.reranker.rerank(&effective_query, candidates).await;
            let mut by_id: std::collections::HashMap<String, (SearchResultItem, ScoringDetails)> =
                scored.into_iter().map(|(item, scoring)| (item.result_id.clone(), (item, scoring))).collect();
            scored = reranked
                .into_iter()
                .filter_map(|rc| {
                    let (mut item, mut scoring) = by_id.remove(&rc.id)?;
                    scoring.rerank = Some(rc.score);
                    item.score = rc.score;
                    item.scoring_details = scoring.clone();
                    Some((item, scoring))
                })
                .collect();
        }

        // 11. Truncate
        let total_found = scored.len();
        scored.truncate(top_k);
        let text_results: Vec<SearchResultItem> = scored.into_iter().map(|(item, _)| item).collect();

        let image_results = if matches!(request.search_type, SearchType::Image) {
            self.search_images(request.kb_id, &embedding, top_k)
        } else {
            Vec::new()
        };
        let product_results = if matches!(request.search_type, SearchType::Product) {
            self.search_products(request.kb_id, &embedding, top_k, &request.filters.product)
        } else {
            Vec::new()
        };

        // 12. Cache write
        if request.search_type == SearchType::Text && !text_results.is_empty() {
            if let Ok(serialized) = serde_json::to_value(&text_results) {
                self.cache.put(request.kb_id, &effective_query, "text", embedding.clone(), serialized);
            }
        }

        let elapsed = start.elapsed().as_millis() as u64;
        let returned = text_results.len() + image_results.len() + product_results.len();
        Ok(SearchResponse {
            total_found,
            returned,
            chunks_searched,
            query_tokens: bm25::tokenize(&effective_query).len(),
            embedding_model: model,
            search_time_ms: elapsed,
            cached: false,
            cache_similarity: 0.0,
            text_results,
            image_results,
            product_results,
            enhanced_search: EnhancedSearchInfo {
                original: request.query.to_string(),
                rewritten,
                search_terms,
                detected_intent: detected_intent.map(|i| i.as_str().to_string()),
                features_applied,
            },
        })
    }

    fn search_images(&self, kb_id: &str, embedding: &[f32], limit: usize) -> Vec<SearchResultItem> {
        self.vector_store
            .search_images(kb_id, embedding, limit)
            .into_iter()
            .map(|m| SearchResultItem {
                result_id: m.entity_id.clone(),
                content: m.content_preview.clone(),
                source: SourceRef::Image { image_id: m.entity_id },
                score: m.score,
                scoring_details: ScoringDetails {
                    cosine: m.score,
                    combined: m.score,
                    ..Default::default()
                },
                metadata: serde_json::Value::Object(
                    m.metadata.into_iter().collect::<serde_json::Map<_, _>>(),
                ),
            })
            .collect()
    }

    fn search_products(
        &self,
        kb_id: &str,
        embedding: &[f32],
        limit: usize,
        filter: &ProductSearchFilter,
    ) -> Vec<SearchResultItem> {
        let catalog = self.catalog.clone();
        let mut results: Vec<SearchResultItem> = self
            .vector_store
            .search_products(kb_id, embedding, limit, filter, |id| catalog.get_product(id))
            .into_iter()
            .filter_map(|(m, product)| {
                let product = product?;
                Some(SearchResultItem {
                    result_id: product.product_id.clone(),
                    content: product.searchable_text(),
                    source: SourceRef::Product {
                        product_id: product.product_id.clone(),
                        purchase_url: product.purchase_url(),
                    },
                    score: m.score,
                    scoring_details: ScoringDetails {
                        cosine: m.score,
                        combined: m.score,
                        ..Default::default()
                    },
                    metadata: product_metadata(&product),
                })
            })
            .collect();
        results.sort_by(|a, b| {
            b.scoring_details
                .cosine
                .partial_cmp(&a.scoring_details.cosine)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_bm25 = a.scoring_details.bm25.unwrap_or(0.0);
                    let b_bm25 = b.scoring_details.bm25.unwrap_or(0.0);
                    b_bm25.partial_cmp(&a_bm25).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.result_id.cmp(&b.result_id))
        });
        results.truncate(limit);
        results
    }
}

/// Open question resolved here: ties in final ranking break on higher cosine,
/// then higher bm25, then smaller chunk_index (non-chunk results have no
/// chunk_index, so they fall back to `result_id` for a deterministic order).
fn rank_cmp(a: &(SearchResultItem, ScoringDetails), b: &(SearchResultItem, ScoringDetails)) -> std::cmp::Ordering {
    b.1.cosine
        .partial_cmp(&a.1.cosine)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            let a_bm25 = a.1.bm25.unwrap_or(0.0);
            let b_bm25 = b.1.bm25.unwrap_or(0.0);
            b_bm25.partial_cmp(&a_bm25).unwrap_or(std::cmp::Ordering::Equal)
        })
        .then_with(|| chunk_index_of(&a.0).cmp(&chunk_index_of(&b.0)))
        .then_with(|| a.0.result_id.cmp(&b.0.result_id))
}

fn chunk_index_of(item: &SearchResultItem) -> u32 {
    match &item.source {
        SourceRef::Chunk { chunk_index, .. } => *chunk_index,
        _ => u32::MAX,
    }
}

fn product_metadata(product: &Product) -> serde_json::Value {
    serde_json::json!({
        "price": product.price,
        "inventory": product.inventory,
        "vendor": product.vendor,
        "product_type": product.product_type,
    })
}
