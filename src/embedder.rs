//! Embedding provider abstraction, batching, and the embedding cache.
//!
//! The batcher takes the full ordered list of chunk texts for a cycle,
//! partitions it into fixed-size sub-batches, and issues up to
//! `concurrency` sub-batches per wave. A failed sub-batch costs only its own
//! slots; the result array stays aligned index-for-index with the input.

use anyhow::{bail, Result};
use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::EngineError;

/// A batched embedding provider: one fixed-length vector per input, in order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Bounded process-wide embedding cache, injected into the batcher rather
/// than reached for globally so the pipeline stays testable in isolation.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.inner
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&Self::key(text)).cloned())
    }

    pub fn put(&self, text: &str, vector: Vec<f32>) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(Self::key(text), vector);
        }
    }
}

/// Embed every text in `texts`, returning a result array aligned with the
/// input: `None` marks a slot whose sub-batch failed.
///
/// Blank entries are replaced with a single-space placeholder rather than
/// dropped, preserving alignment with the chunk list. Cached vectors are
/// filled in before any provider call.
pub async fn embed_all(
    client: &dyn EmbeddingClient,
    cache: &EmbeddingCache,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Vec<Option<Vec<f32>>> {
    let sanitized: Vec<String> = texts.iter().map(|t| sanitize(t)).collect();
    let mut results: Vec<Option<Vec<f32>>> = vec![None; sanitized.len()];

    let mut pending: Vec<usize> = Vec::new();
    for (i, text) in sanitized.iter().enumerate() {
        match cache.get(text) {
            Some(vector) => results[i] = Some(vector),
            None => pending.push(i),
        }
    }

    let batches: Vec<Vec<usize>> = pending
        .chunks(config.batch_size.max(1))
        .map(|c| c.to_vec())
        .collect();

    let mut first_wave = true;
    for wave in batches.chunks(config.concurrency.max(1)) {
        if !first_wave && config.wave_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.wave_pause_ms)).await;
        }
        first_wave = false;

        let calls = wave.iter().map(|indices| {
            let batch_texts: Vec<String> =
                indices.iter().map(|&i| sanitized[i].clone()).collect();
            async move { client.embed(&batch_texts).await }
        });
        let outcomes = futures::future::join_all(calls).await;

        for (batch_no, (indices, outcome)) in wave.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(vectors) if vectors.len() == indices.len() => {
                    for (&i, vector) in indices.iter().zip(vectors) {
                        cache.put(&sanitized[i], vector.clone());
                        results[i] = Some(vector);
                    }
                }
                Ok(vectors) => {
                    let err = EngineError::EmbeddingBatch {
                        batch: batch_no,
                        reason: format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            indices.len()
                        ),
                    };
                    warn!(error = %err, "discarding misaligned sub-batch");
                }
                Err(e) => {
                    let err = EngineError::EmbeddingBatch {
                        batch: batch_no,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "sub-batch failed, slots left unembedded");
                }
            }
        }
    }

    results
}

/// Never drop an entry: an empty text would desynchronize the parallel
/// result array, so it becomes a single-space placeholder instead.
fn sanitize(text: &str) -> String {
    if text.trim().is_empty() {
        " ".to_string()
    } else {
        text.to_string()
    }
}

// ============ OpenAI-compatible HTTP provider ============

/// Calls an OpenAI-compatible `/v1/embeddings` endpoint with retry and
/// exponential backoff: 429 and 5xx retry, other 4xx fail immediately.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embeddings API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}
