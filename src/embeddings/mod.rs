//! Remote dense-vector embedding client (C4).
//!
//! Grounded in the teacher's `embeddings::EmbeddingModel` trait shape and in
//! `llm::simple_external::SimpleExternalProvider`'s `reqwest::Client`
//! construction (connect/pool timeouts), now pointed at a remote embeddings
//! endpoint instead of a local ONNX model.

pub mod cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::EmbeddingError;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of texts, preserving input order. Raises
    /// `EmbeddingServiceUnavailable` on dimension mismatch, nulls, an empty
    /// response, or transport failure — never returns a synthetic fallback.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseEntry {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingResponseEntry>,
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize, batch_size: usize) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .expect("reqwest client configuration is static and always valid");

        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { model: &self.model, input: batch })
            .send()
            .await
            .map_err(|e| EmbeddingError::EmbeddingServiceUnavailable { reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(EmbeddingError::EmbeddingServiceUnavailable {
                reason: format!("embedding endpoint returned {}", response.status()),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::EmbeddingServiceUnavailable { reason: format!("invalid response body: {e}") })?;

        if parsed.data.is_empty() {
            return Err(EmbeddingError::EmbeddingServiceUnavailable {
                reason: "embedding response was empty".to_string(),
            });
        }
        if parsed.data.len() != batch.len() {
            return Err(EmbeddingError::EmbeddingServiceUnavailable {
                reason: format!("expected {} embeddings, got {}", batch.len(), parsed.data.len()),
            });
        }

        // Preserve per-response `index` when present, else positional.
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        for (positional, entry) in parsed.data.into_iter().enumerate() {
            let slot = entry.index.unwrap_or(positional);
            if slot >= ordered.len() || ordered[slot].is_some() {
                return Err(EmbeddingError::EmbeddingServiceUnavailable {
                    reason: "embedding response had a missing or duplicate index".to_string(),
                });
            }
            if entry.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: entry.embedding.len(),
                });
            }
            ordered[slot] = Some(entry.embedding);
        }

        ordered
            .into_iter()
            .map(|v| v.ok_or_else(|| EmbeddingError::EmbeddingServiceUnavailable { reason: "missing index in batch response".to_string() }))
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let embedded = self.embed_batch(chunk).await?;
            results.extend(embedded);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
