//! Embedding generation with a deterministic synthetic fallback.
//!
//! [`Embedder::embed`] never fails: with a configured credential it calls
//! the remote embeddings endpoint, and on any failure (missing key,
//! non-2xx status, malformed body, network error, timeout) it degrades to
//! a hash-based synthetic vector instead of propagating the error. The
//! synthetic vector keeps the retrieval path exercised but carries no
//! semantic signal — callers must not compare vectors of different
//! origins, which is why [`Embedding`](crate::models::Embedding) is
//! tagged with an [`EmbeddingOrigin`].

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::models::{Embedding, EmbeddingOrigin};

/// Dimensionality of the synthetic fallback vector.
pub const SYNTHETIC_DIMS: usize = 384;

pub struct Embedder {
    config: EmbeddingConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Embedder {
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    /// Embed one text. Infallible by contract: remote failures degrade to
    /// the synthetic vector with a warning.
    pub async fn embed(&self, text: &str) -> Embedding {
        if let Some(api_key) = &self.api_key {
            match self.embed_remote(api_key, text).await {
                Ok(values) => {
                    return Embedding {
                        values,
                        origin: EmbeddingOrigin::Remote,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote embedding failed, using synthetic fallback");
                }
            }
        }

        Embedding {
            values: synthetic_vector(text),
            origin: EmbeddingOrigin::Synthetic,
        }
    }

    async fn embed_remote(&self, api_key: &str, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embeddings API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding_response(&json)
    }
}

/// Extract `data[0].embedding` from the embeddings API response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Deterministic 384-dim vector derived from a 32-bit rolling hash of the
/// input. Element `i` is `sin((hash + i) * 0.1) * 0.1`. The hash runs over
/// UTF-16 code units with signed wrapping arithmetic, matching the pinned
/// fallback contract exactly.
pub fn synthetic_vector(text: &str) -> Vec<f32> {
    let hash = rolling_hash(text);
    (0..SYNTHETIC_DIMS)
        .map(|i| ((((hash as f64) + i as f64) * 0.1).sin() * 0.1) as f32)
        .collect()
}

/// `h = h * 31 + code`, wrapping in 32-bit signed arithmetic
/// (`h * 31` expressed as `(h << 5) - h`).
fn rolling_hash(text: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors, length mismatches (the observable
/// symptom of mixed-origin comparison), and zero-magnitude vectors — a
/// degenerate input never produces NaN.
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
