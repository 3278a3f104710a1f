//! Embedding service abstraction
//!
//! Provides a unified interface over the remote embedding endpoint with a
//! primary model and a fallback model that takes over if the primary is
//! rejected on first use.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> String;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// HTTP embedding client against the remote embedding service
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    fallback_model: String,
    /// Set once the primary model has been rejected
    use_fallback: AtomicBool,
    dimension: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    task_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    values: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "embedding.api_base is not configured".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            fallback_model: config.fallback_model.clone(),
            use_fallback: AtomicBool::new(false),
            dimension: config.dimension,
            max_retries: config.max_retries,
        })
    }

    fn active_model(&self) -> &str {
        if self.use_fallback.load(Ordering::Relaxed) {
            &self.fallback_model
        } else {
            &self.model
        }
    }

    async fn request_with_retry(&self, texts: &[String], task_type: &str) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(self.active_model(), texts, task_type).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        model = self.active_model(),
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    // Switch to the fallback model after the primary's first failure
                    if !self.use_fallback.load(Ordering::Relaxed) {
                        self.use_fallback.store(true, Ordering::Relaxed);
                        tracing::warn!(
                            fallback = %self.fallback_model,
                            "Switching to fallback embedding model"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::EmbeddingError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(
        &self,
        model: &str,
        texts: &[String],
        task_type: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.api_base.trim_end_matches('/'));

        let request = EmbedRequest {
            model,
            input: texts,
            task_type,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: EmbedResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .request_with_retry(&[text.to_string()], "RETRIEVAL_QUERY")
            .await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk, "RETRIEVAL_DOCUMENT").await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> String {
        self.active_model().to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Ok((0..self.dimension).map(|_| rng.gen::<f32>()).collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for _ in texts {
            embeddings.push(self.embed("").await?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> String {
        "mock-embedding".to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that always fails; used to exercise degraded retrieval paths
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::EmbeddingError {
            message: "embedding service unavailable".to_string(),
        })
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(AppError::EmbeddingError {
            message: "embedding service unavailable".to_string(),
        })
    }

    fn model_name(&self) -> String {
        "unavailable".to_string()
    }

    fn dimension(&self) -> usize {
        0
    }
}

/// Create an embedder based on configuration; a missing API base yields the
/// mock so local development works without credentials.
pub fn create_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match HttpEmbedder::new(config) {
        Ok(embedder) => Arc::new(embedder),
        Err(_) => {
            tracing::warn!("Embedding service not configured, using mock embedder");
            Arc::new(MockEmbedder::new(config.dimension))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(768);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 768);
    }

    #[tokio::test]
    async fn test_unavailable_embedder_errors() {
        let embedder = UnavailableEmbedder;
        assert!(embedder.embed("x").await.is_err());
    }
}
