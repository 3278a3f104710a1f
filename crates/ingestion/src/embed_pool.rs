//! Rate-limited embedding pool
//!
//! Batches chunk texts through the embedding service with a token-bucket
//! gate between requests and exponential backoff with full jitter on the
//! retryable failure set (429, 503, deadline, timeout, internal). Failed
//! batches are reported, never fatal.

use biograph_common::embeddings::Embedder;
use biograph_common::errors::AppError;
use biograph_common::models::Chunk;
use futures::stream::{FuturesUnordered, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EmbedPoolConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub request_interval_ms: u64,
}

impl Default for EmbedPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 250,
            max_retries: 6,
            base_backoff_ms: 500,
            request_interval_ms: 100,
        }
    }
}

/// A chunk together with its embedding vector
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct EmbedReport {
    pub embedded: Vec<EmbeddedChunk>,
    pub failed: Vec<(Chunk, String)>,
    pub retries: u32,
    pub embedding_dim: usize,
}

fn is_retryable(error: &AppError) -> bool {
    let message = error.to_string().to_lowercase();
    ["429", "503", "rate", "quota", "unavailable", "deadline", "timeout", "internal"]
        .iter()
        .any(|token| message.contains(token))
}

pub struct EmbedPool {
    embedder: Arc<dyn Embedder>,
    limiter: Arc<DefaultDirectRateLimiter>,
    config: EmbedPoolConfig,
}

impl EmbedPool {
    pub fn new(embedder: Arc<dyn Embedder>, config: EmbedPoolConfig) -> Self {
        let interval = Duration::from_millis(config.request_interval_ms.max(1));
        let quota = Quota::with_period(interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(10).unwrap()));
        Self {
            embedder,
            limiter: Arc::new(RateLimiter::direct(quota)),
            config,
        }
    }

    /// Embed all chunks, batched and bounded by the worker count.
    pub async fn embed_all(&self, chunks: Vec<Chunk>) -> EmbedReport {
        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(self.config.batch_size.max(1))
            .map(|b| b.to_vec())
            .collect();

        let mut report = EmbedReport::default();
        let mut in_flight = FuturesUnordered::new();
        let mut batch_iter = batches.into_iter();

        loop {
            while in_flight.len() < self.config.workers.max(1) {
                let Some(batch) = batch_iter.next() else { break };
                in_flight.push(self.embed_batch(batch));
            }
            let Some((embedded, failed, retries)) = in_flight.next().await else {
                break;
            };
            report.embedded.extend(embedded);
            report.failed.extend(failed);
            report.retries += retries;
        }

        report.embedding_dim = report
            .embedded
            .first()
            .map(|e| e.embedding.len())
            .unwrap_or(0);
        report
    }

    async fn embed_batch(
        &self,
        batch: Vec<Chunk>,
    ) -> (Vec<EmbeddedChunk>, Vec<(Chunk, String)>, u32) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let mut retries = 0;
        let mut attempt = 0;

        let outcome = loop {
            // Token-bucket gate between requests
            self.limiter.until_ready().await;

            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => break Ok(vectors),
                Err(e) => {
                    if attempt >= self.config.max_retries || !is_retryable(&e) {
                        break Err(e);
                    }
                    retries += 1;
                    // Exponential backoff with full jitter
                    let jitter_ms = rand::thread_rng().gen_range(0..250u64);
                    let sleep_ms =
                        self.config.base_backoff_ms.saturating_mul(1 << attempt) + jitter_ms;
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    attempt += 1;
                }
            }
        };

        match outcome {
            Ok(vectors) => {
                let embedded = batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                    .collect();
                (embedded, Vec::new(), retries)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, batch = batch.len(), "Embedding batch failed");
                let failed = batch.into_iter().map(|c| (c, message.clone())).collect();
                (Vec::new(), failed, retries)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use biograph_common::embeddings::MockEmbedder;
    use biograph_common::errors::Result;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn chunk(i: usize) -> Chunk {
        Chunk {
            chunk_id: format!("PMID:{}#0", i),
            doc_id: format!("PMID:{}", i),
            doc_type: "paper".to_string(),
            chunk_index: 0,
            text: format!("text {}", i),
            start_offset: 0,
            end_offset: 6,
        }
    }

    /// Fails with a retryable error for the first `failures` calls
    struct FlakyEmbedder {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::EmbeddingError {
                    message: "API error 429: rate limited".to_string(),
                });
            }
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }

        fn model_name(&self) -> String {
            "flaky".to_string()
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    /// Always fails with a non-retryable error
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError { message: "bad request".to_string() })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError { message: "bad request".to_string() })
        }

        fn model_name(&self) -> String {
            "broken".to_string()
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn fast_config() -> EmbedPoolConfig {
        EmbedPoolConfig {
            workers: 2,
            batch_size: 2,
            max_retries: 3,
            base_backoff_ms: 1,
            request_interval_ms: 1,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&AppError::EmbeddingError { message: "HTTP 429".into() }));
        assert!(is_retryable(&AppError::EmbeddingError { message: "deadline exceeded".into() }));
        assert!(!is_retryable(&AppError::EmbeddingError { message: "bad request".into() }));
    }

    #[tokio::test]
    async fn test_embed_all_batches() {
        let pool = EmbedPool::new(Arc::new(MockEmbedder::new(4)), fast_config());
        let report = pool.embed_all((0..5).map(chunk).collect()).await;
        assert_eq!(report.embedded.len(), 5);
        assert!(report.failed.is_empty());
        assert_eq!(report.embedding_dim, 4);
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let embedder = FlakyEmbedder { failures: 2, calls: AtomicU32::new(0) };
        let pool = EmbedPool::new(Arc::new(embedder), fast_config());
        let report = pool.embed_all(vec![chunk(0), chunk(1)]).await;
        assert_eq!(report.embedded.len(), 2);
        assert_eq!(report.retries, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_batch() {
        let pool = EmbedPool::new(Arc::new(BrokenEmbedder), fast_config());
        let report = pool.embed_all(vec![chunk(0)]).await;
        assert!(report.embedded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.retries, 0);
    }
}
