//! Reranker (design §4.8 / §9 design note): modeled as a capability-set enum
//! rather than a trait object behind a global singleton, so the hybrid
//! retriever owns a concrete, cheaply-cloneable value wired once at startup
//! from [`crate::config::RerankerKind`].

use crate::config::RerankerKind;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
    /// The score carried in from the hybrid retriever pipeline (post
    /// BM25/intent blend), preserved so the LLM stage can blend against it.
    pub original_score: f32,
    pub score: f32,
}

#[async_trait]
pub trait LlmRerankClient: Send + Sync {
    /// Returns a 0-10 relevance score, as parsed from the LLM's text response.
    async fn score(&self, query: &str, passage: &str) -> crate::error::AppResult<f32>;
}

#[derive(Clone)]
pub enum Reranker {
    /// Lexical keyword-overlap + exact-phrase + early-position scoring; no
    /// external dependency, the always-available fallback.
    Simple,
    /// Delegates scoring to an LLM collaborator; falls back to `Simple` on
    /// any upstream error so a flaky reranker degrades search quality rather
    /// than failing the request outright.
    Llm(Arc<dyn LlmRerankClient>),
    /// Runs the lexical reranker over the full set, then asks the LLM to
    /// rescore only the top slice and blends 0.7*llm + 0.3*original.
    Hybrid(Arc<dyn LlmRerankClient>),
}

const HYBRID_LLM_WINDOW: usize = 10;
const HYBRID_LLM_WEIGHT: f32 = 0.7;

impl Reranker {
    pub fn from_kind(kind: RerankerKind, llm_client: Option<Arc<dyn LlmRerankClient>>) -> Self {
        match (kind, llm_client) {
            (RerankerKind::Simple, _) => Reranker::Simple,
            (RerankerKind::Llm, Some(client)) => Reranker::Llm(client),
            (RerankerKind::Hybrid, Some(client)) => Reranker::Hybrid(client),
            (RerankerKind::Llm | RerankerKind::Hybrid, None) => {
                tracing::warn!("reranker kind requires an LLM client, falling back to simple");
                Reranker::Simple
            }
        }
    }

    pub async fn rerank(&self, query: &str, mut candidates: Vec<RerankCandidate>) -> Vec<RerankCandidate> {
        match self {
            Reranker::Simple => {
                rescore_lexically(query, &mut candidates);
                candidates
            }
            Reranker::Llm(client) => match rescore_with_llm(client.as_ref(), query, candidates.clone()).await {
                Ok(scored) => scored,
                Err(e) => {
                    tracing::warn!(error = %e, "llm rerank failed, falling back to lexical rescoring");
                    rescore_lexically(query, &mut candidates);
                    candidates
                }
            },
            Reranker::Hybrid(client) => {
                rescore_lexically(query, &mut candidates);
                let window = candidates.len().min(HYBRID_LLM_WINDOW);
                let tail = candidates.split_off(window);
                let head = candidates;
                match rescore_with_llm(client.as_ref(), query, head.clone()).await {
                    Ok(mut reranked_head) => {
                        reranked_head.extend(tail);
                        reranked_head
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "llm rerank window failed, keeping lexical order");
                        let mut all = head;
                        all.extend(tail);
                        all
                    }
                }
            }
        }
    }
}

fn lexical_score(query: &str, text: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let text_lower = text.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms: std::collections::HashSet<&str> = text_lower.split_whitespace().collect();
    let overlap = query_terms.iter().filter(|t| text_terms.contains(*t)).count() as f32 / query_terms.len() as f32;

    let phrase_bonus = if text_lower.contains(query_lower.as_str()) { 0.2 } else { 0.0 };

    let position_bonus = query_terms
        .iter()
        .find_map(|t| text_lower.find(t))
        .map(|pos| {
            let frac = pos as f32 / text_lower.len().max(1) as f32;
            (1.0 - frac).max(0.0) * 0.1
        })
        .unwrap_or(0.0);

    (overlap + phrase_bonus + position_bonus).min(1.0)
}

fn rescore_lexically(query: &str, candidates: &mut [RerankCandidate]) {
    for candidate in candidates.iter_mut() {
        candidate.score = lexical_score(query, &candidate.text);
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

async fn rescore_with_llm(
    client: &dyn LlmRerankClient,
    query: &str,
    candidates: Vec<RerankCandidate>,
) -> crate::error::AppResult<Vec<RerankCandidate>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let llm_score = client.score(query, &candidate.text).await? / 10.0;
        let blended = HYBRID_LLM_WEIGHT * llm_score + (1.0 - HYBRID_LLM_WEIGHT) * candidate.original_score;
        scored.push(RerankCandidate {
            score: blended,
            ..candidate
        });
    }
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str, original_score: f32) -> RerankCandidate {
        RerankCandidate {
            id: id.to_string(),
            text: text.to_string(),
            original_score,
            score: original_score,
        }
    }

    #[tokio::test]
    async fn simple_reranker_orders_by_lexical_overlap() {
        let reranker = Reranker::Simple;
        let candidates = vec![
            candidate("a", "shipping policy", 0.1),
            candidate("b", "password reset instructions", 0.9),
        ];
        let result = reranker.rerank("password reset", candidates).await;
        assert_eq!(result[0].id, "b");
    }

    struct FailingClient;

    #[async_trait]
    impl LlmRerankClient for FailingClient {
        async fn score(&self, _query: &str, _passage: &str) -> crate::error::AppResult<f32> {
            Err(crate::error::AppError::UpstreamTransient("down".into()))
        }
    }

    #[tokio::test]
    async fn llm_reranker_falls_back_to_lexical_on_error() {
        let reranker = Reranker::Llm(Arc::new(FailingClient));
        let candidates = vec![
            candidate("a", "shipping policy", 0.1),
            candidate("b", "password reset instructions", 0.2),
        ];
        let result = reranker.rerank("password reset", candidates).await;
        assert_eq!(result[0].id, "b");
    }

    struct FixedClient(f32);

    #[async_trait]
    impl LlmRerankClient for FixedClient {
        async fn score(&self, _query: &str, _passage: &str) -> crate::error::AppResult<f32> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn llm_reranker_blends_with_original_score() {
        let reranker = Reranker::Llm(Arc::new(FixedClient(10.0)));
        let candidates = vec![candidate("a", "anything", 0.0)];
        let result = reranker.rerank("q", candidates).await;
        assert!((result[0].score - 0.7).abs() < 1e-6);
    }
}
