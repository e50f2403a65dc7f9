//! Embedding Gateway (design §4.3). The actual embedding provider is an
//! external collaborator; this module owns tokenization/truncation/batching,
//! the batch-then-per-item fallback, and the image-embedding backpressure
//! semaphore, calling through an injected [`EmbeddingProvider`].

use crate::config::{EMBEDDING_BATCH_SIZE, EMBEDDING_DIM_IMAGE, EMBEDDING_DIM_TEXT, EMBEDDING_MAX_TOKENS, IMAGE_PROCESSING_CONCURRENCY};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A deterministic, provider-vocabulary-agnostic stand-in for a BPE tokenizer:
/// approximates token count the way the source service's cost accounting did
/// (~4 chars/token), which is enough to drive truncation and batching
/// decisions without depending on the real embedder's vocabulary.
pub fn count_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / 4.0).ceil() as usize
}

pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let tokens = count_tokens(text);
    if tokens <= max_tokens {
        return (text.to_string(), false);
    }
    let max_chars = max_tokens * 4;
    let truncated: String = text.chars().take(max_chars).collect();
    (truncated, true)
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_one(&self, text: &str) -> AppResult<Vec<f32>>;
    async fn embed_image(&self, image_bytes: &[u8], caption: Option<&str>) -> AppResult<Vec<f32>>;
    fn model_name(&self) -> &str;
}

/// A hash-based provider used when no real embedder is configured (tests,
/// offline dev). Deterministic so repeated calls on the same text are stable.
pub struct HashingEmbeddingProvider {
    model: String,
}

impl HashingEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            model: "hashing-stub-v1".to_string(),
        }
    }

    fn hash_vector(seed: &[u8], dim: usize) -> Vec<f32> {
        use sha2::{Digest, Sha256};
        let mut out = vec![0f32; dim];
        let mut counter: u32 = 0;
        let mut filled = 0;
        while filled < dim {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if filled >= dim {
                    break;
                }
                out[filled] = (*byte as f32 / 255.0) * 2.0 - 1.0;
                filled += 1;
            }
            counter += 1;
        }
        crate::util::l2_normalize(&mut out);
        out
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed_one(&self, text: &str) -> AppResult<Vec<f32>> {
        Ok(Self::hash_vector(text.as_bytes(), EMBEDDING_DIM_TEXT))
    }

    async fn embed_image(&self, image_bytes: &[u8], caption: Option<&str>) -> AppResult<Vec<f32>> {
        let mut seed = image_bytes.to_vec();
        if let Some(c) = caption {
            seed.extend_from_slice(c.as_bytes());
        }
        Ok(Self::hash_vector(&seed, EMBEDDING_DIM_IMAGE))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Default, Debug)]
pub struct GatewayStats {
    pub batches_succeeded: AtomicU64,
    pub batches_degraded: AtomicU64,
    pub items_embedded: AtomicU64,
    pub items_failed: AtomicU64,
    pub image_wait_events: AtomicU64,
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    image_semaphore: Arc<Semaphore>,
    pub stats: Arc<GatewayStats>,
}

pub struct EmbeddedItem {
    pub vector: Vec<f32>,
    pub tokens: usize,
    pub truncated: bool,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_concurrency(provider, IMAGE_PROCESSING_CONCURRENCY)
    }

    pub fn with_concurrency(provider: Arc<dyn EmbeddingProvider>, image_concurrency: usize) -> Self {
        Self {
            provider,
            image_semaphore: Arc::new(Semaphore::new(image_concurrency.max(1))),
            stats: Arc::new(GatewayStats::default()),
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn embed(&self, text: &str) -> AppResult<(Vec<f32>, usize, String)> {
        let (truncated_text, was_truncated) = truncate_to_tokens(text, EMBEDDING_MAX_TOKENS);
        if was_truncated {
            tracing::warn!(chars = text.len(), "embedding input truncated at token limit");
        }
        let vector = self.provider.embed_one(&truncated_text).await?;
        let tokens = count_tokens(&truncated_text);
        self.stats.items_embedded.fetch_add(1, Ordering::Relaxed);
        Ok((vector, tokens, self.model().to_string()))
    }

    /// Calls the provider in batches of up to 100; on batch failure, falls
    /// back to per-item calls within that batch, dropping only items whose
    /// individual embedding also fails.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<EmbeddedItem>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            match self.embed_batch_chunk(batch).await {
                Ok(items) => {
                    self.stats.batches_succeeded.fetch_add(1, Ordering::Relaxed);
                    results.extend(items.into_iter().map(Some));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch embedding failed, degrading to per-item calls");
                    self.stats.batches_degraded.fetch_add(1, Ordering::Relaxed);
                    for text in batch {
                        match self.embed(text).await {
                            Ok((vector, tokens, _)) => {
                                results.push(Some(EmbeddedItem { vector, tokens, truncated: false }));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping chunk whose embedding could not be produced");
                                self.stats.items_failed.fetch_add(1, Ordering::Relaxed);
                                results.push(None);
                            }
                        }
                    }
                }
            }
        }
        results
    }

    async fn embed_batch_chunk(&self, batch: &[String]) -> AppResult<Vec<EmbeddedItem>> {
        let mut out = Vec::with_capacity(batch.len());
        for text in batch {
            let (truncated_text, truncated) = truncate_to_tokens(text, EMBEDDING_MAX_TOKENS);
            let vector = self.provider.embed_one(&truncated_text).await?;
            out.push(EmbeddedItem {
                tokens: count_tokens(&truncated_text),
                vector,
                truncated,
            });
        }
        Ok(out)
    }

    /// Bounded-concurrency image embedding; each permit acquisition is a
    /// suspension point, never held across CPU-heavy cosine work elsewhere.
    pub async fn embed_image(&self, image_bytes: &[u8], caption: Option<&str>) -> AppResult<Vec<f32>> {
        let permit = self
            .image_semaphore
            .acquire()
            .await
            .map_err(|e| AppError::Internal(format!("image semaphore closed: {e}")))?;
        if self.image_semaphore.available_permits() == 0 {
            self.stats.image_wait_events.fetch_add(1, Ordering::Relaxed);
        }
        let result = self.provider.embed_image(image_bytes, caption).await;
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_truncation() {
        let long = "x".repeat(EMBEDDING_MAX_TOKENS * 8);
        let (truncated, was_truncated) = truncate_to_tokens(&long, EMBEDDING_MAX_TOKENS);
        assert!(was_truncated);
        assert!(count_tokens(&truncated) <= EMBEDDING_MAX_TOKENS);
    }

    #[tokio::test]
    async fn embed_is_deterministic() {
        let gateway = EmbeddingGateway::new(Arc::new(HashingEmbeddingProvider::new()));
        let (v1, _, _) = gateway.embed("hello world").await.unwrap();
        let (v2, _, _) = gateway.embed("hello world").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn embed_batch_returns_one_item_per_input() {
        let gateway = EmbeddingGateway::new(Arc::new(HashingEmbeddingProvider::new()));
        let texts: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();
        let results = gateway.embed_batch(&texts).await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_some()));
    }
}
