//! Embedding provider abstraction and batcher (C6).
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API.
//!
//! [`embed_texts`] is the batching entry point: texts are grouped into
//! `embedding.batch_size`-sized groups, each group is retried as a whole via
//! [`RetryPolicy`]; a group that still fails falls back to embedding its
//! items one at a time, and an item that fails even alone gets a zero vector
//! rather than aborting the whole request (§8 S5 — order and count are always
//! preserved, regardless of partial failure).
//!
//! Also provides vector utilities for working with sqlite-vec:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::retry::RetryPolicy;

pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// A no-op embedding provider; `embedding.provider = "disabled"`.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// Embedding provider using the OpenAI `/v1/embeddings` endpoint. Requires
/// `OPENAI_API_KEY` (or `LLM_API_KEY`) in the environment.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        if api_key().is_err() {
            bail!("OPENAI_API_KEY (or LLM_API_KEY) environment variable not set");
        }
        Ok(Self {
            model,
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .or_else(|_| std::env::var("LLM_API_KEY"))
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))
}

/// Embeds `texts` through the configured provider, grouped into
/// `config.batch_size`-sized batches. Always returns one vector per input
/// text, in order — never shrinks the output on partial failure.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    match config.provider.as_str() {
        "openai" => embed_openai_batched(config, texts).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embeds a single query text.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, std::slice::from_ref(&text.to_string())).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

async fn embed_openai_batched(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let policy = RetryPolicy::new(
        config.max_retries.max(1),
        Duration::from_secs(1),
        2,
    );

    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1)) {
        match policy.run(|| embed_openai_call(&client, config, batch)).await {
            Ok(vecs) => out.extend(vecs),
            Err(e) => {
                warn!(error = %e, batch_len = batch.len(), "embedding batch failed, falling back to per-item calls");
                for text in batch {
                    match policy
                        .run(|| embed_openai_call(&client, config, std::slice::from_ref(text)))
                        .await
                    {
                        Ok(mut vecs) => out.push(vecs.pop().unwrap_or_else(|| vec![0.0; config.dims])),
                        Err(e) => {
                            warn!(error = %e, "embedding item failed after retries, using zero vector");
                            out.push(vec![0.0; config.dims]);
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

/// A single (unretried) call to the OpenAI embeddings endpoint.
///
/// Retry strategy applied by the caller via [`RetryPolicy`]:
/// - HTTP 429 or 5xx → retry
/// - HTTP 4xx (not 429) → fail immediately (still consumes a retry slot; the
///   error is not transient so further attempts would not help, but the
///   policy has no way to distinguish — this mirrors the reference's
///   fixed-attempt backoff rather than a smarter non-retryable fast path)
/// - Network error → retry
async fn embed_openai_call(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let api_key = api_key()?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let api_base = config
        .api_base
        .as_deref()
        .unwrap_or("https://api.openai.com/v1");

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let response = client
        .post(format!("{api_base}/embeddings"))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("OpenAI embeddings API error {}: {}", status, body_text);
    }

    let json: serde_json::Value = response.json().await?;
    parse_openai_response(&json)
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for item in data {
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Encodes a float vector as little-endian bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn embed_texts_rejects_disabled_provider() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            model: None,
            dims: crate::models::EMBEDDING_DIM,
            batch_size: 20,
            max_retries: 3,
            timeout_secs: 30,
            api_base: None,
        };
        let result = embed_texts(&config, &["hi".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_input_short_circuits_even_when_disabled() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            model: None,
            dims: crate::models::EMBEDDING_DIM,
            batch_size: 20,
            max_retries: 3,
            timeout_secs: 30,
            api_base: None,
        };
        let result = embed_texts(&config, &[]).await.unwrap();
        assert!(result.is_empty());
    }
}
