//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`HashingProvider`]** — deterministic feature-hashing embedder; no
//!   network, no model download, stable across platforms.
//! - **[`OpenAiEmbeddingProvider`]** — calls the OpenAI embeddings API with
//!   batching, retry, and backoff.
//! - **`LocalProvider`** — runs a sentence-embedding model locally via
//!   fastembed (behind the `local-embeddings-fastembed` feature).
//!
//! Every provider returns unit-normalized vectors, so similarity search is
//! a plain dot product.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Trait for embedding providers.
///
/// Maps text to a fixed-length unit vector, deterministically for a given
/// text and provider version. `dims()` is fixed per instance.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"hashing-384"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one unit vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the provider selected by the configuration.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<std::sync::Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(std::sync::Arc::new(HashingProvider::new(config.dims))),
        "openai" => Ok(std::sync::Arc::new(OpenAiEmbeddingProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(std::sync::Arc::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(EngineError::InvalidInput(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(EngineError::InvalidInput(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Dot product of two vectors. For unit vectors this equals cosine
/// similarity. Returns 0.0 on length mismatch.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize in place. An all-zero vector gets a fixed basis direction
/// so the unit-norm invariant holds for every input text.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

// ============ Hashing Provider ============

/// Deterministic feature-hashing embedder.
///
/// Lowercases the text, splits on non-alphanumeric boundaries, hashes each
/// token with SHA-256 into one of `dims` buckets, accumulates counts, and
/// L2-normalizes. SHA-256 (rather than the std hasher) keeps vectors
/// identical across platforms and Rust versions.
pub struct HashingProvider {
    model_name: String,
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            model_name: format!("hashing-{}", dims),
            dims,
        }
    }

    /// Embed one text synchronously. Exposed for the index's test paths.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(raw) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI embeddings API.
///
/// Calls `POST {base_url}/embeddings` with the configured model. Requires
/// the `OPENAI_API_KEY` environment variable. Received vectors are
/// re-normalized before use; the provider's normalization is not trusted.
pub struct OpenAiEmbeddingProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::InvalidInput("embedding.model required for OpenAI provider".to_string())
        })?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Upstream(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Upstream(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Upstream("OPENAI_API_KEY not set".to_string()))?;

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
                .post("https://api.openai.com/v1/embeddings")
                .timeout(Duration::from_secs(self.timeout_secs))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let json: serde_json::Value = r
                        .json()
                        .await
                        .map_err(|e| EngineError::Upstream(e.to_string()))?;
                    return parse_embedding_response(&json, texts.len());
                }
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    // 429 and 5xx are transient; other 4xx fail immediately.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("OpenAI API error {}: {}", status, text));
                        continue;
                    }
                    return Err(EngineError::Upstream(format!(
                        "OpenAI API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(format!("Request failed: {}", e));
                    continue;
                }
            }
        }

        Err(EngineError::Upstream(format!(
            "Embedding failed after {} retries: {}",
            self.max_retries,
            last_err.unwrap_or_else(|| "unknown".to_string())
        )))
    }
}

fn parse_embedding_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| EngineError::Upstream("Malformed embedding response".to_string()))?;

    if data.len() != expected {
        return Err(EngineError::Upstream(format!(
            "Expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(data.len());
    for item in data {
        let emb = item["embedding"]
            .as_array()
            .ok_or_else(|| EngineError::Upstream("Missing embedding in response".to_string()))?;
        let mut v: Vec<f32> = emb
            .iter()
            .map(|x| x.as_f64().unwrap_or(0.0) as f32)
            .collect();
        l2_normalize(&mut v);
        out.push(v);
    }
    Ok(out)
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;

    /// Embedding provider for local inference via fastembed.
    ///
    /// Models are downloaded on first use from Hugging Face and cached;
    /// after that, embeddings run entirely offline.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
        batch_size: usize,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            // Validate the name eagerly so config errors surface at startup.
            fastembed_model(&model_name)?;
            Ok(Self {
                model_name,
                dims: config.dims,
                batch_size: config.batch_size,
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                other
            ))),
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = fastembed_model(&self.model_name)?;
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            let mut vectors = tokio::task::spawn_blocking(move || {
                let mut m = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    EngineError::Upstream(format!("Failed to initialize local model: {}", e))
                })?;
                m.embed(texts, Some(batch_size))
                    .map_err(|e| EngineError::Upstream(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| EngineError::Upstream(format!("Embedding task panicked: {}", e)))??;

            for v in vectors.iter_mut() {
                l2_normalize(v);
            }
            Ok(vectors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_deterministic() {
        let provider = HashingProvider::new(64);
        let texts = vec!["machine learning is great".to_string()];
        let a = provider.embed(&texts).await.unwrap();
        let b = provider.embed(&texts).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_unit_norm() {
        let provider = HashingProvider::new(64);
        let texts = vec![
            "machine learning is great".to_string(),
            "a".to_string(),
            "".to_string(),
        ];
        for v in provider.embed(&texts).await.unwrap() {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {}", norm);
        }
    }

    #[tokio::test]
    async fn test_hashing_fixed_dims() {
        let provider = HashingProvider::new(384);
        assert_eq!(provider.dims(), 384);
        let v = provider
            .embed(&["hello world".to_string()])
            .await
            .unwrap();
        assert_eq!(v[0].len(), 384);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let provider = HashingProvider::new(128);
        let query = provider.embed_one("machine learning");
        let related = provider.embed_one("machine learning is great");
        let unrelated = provider.embed_one("paella recipe with saffron");
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn test_dot_identical_unit_vectors() {
        let provider = HashingProvider::new(64);
        let v = provider.embed_one("alpha beta");
        assert!((dot(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_dot_length_mismatch() {
        assert_eq!(dot(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_create_provider_unknown() {
        let mut config = EmbeddingConfig::default();
        config.provider = "quantum".to_string();
        assert!(create_provider(&config).is_err());
    }
}
