//! Text embeddings for similarity metrics.

use crate::config::EmbeddingConfig;
use crate::error::{ProviderError, UpstreamError};
use crate::llm::parse_retry_after;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// A backend that maps texts to vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier used in logs and reports.
    fn name(&self) -> &str;

    /// Embed each text, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError>;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
///
/// Works with OpenAI, vLLM and HuggingFace text-embeddings-inference.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    label: String,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpEmbedder {
    /// Create a client from configuration.
    pub fn new(config: EmbeddingConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        let label = format!("embeddings/{}", config.model);

        Ok(Self {
            client,
            config,
            label,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.label
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(url).json(&json!({
            "model": self.config.model,
            "input": texts,
        }));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body, retry_after));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(UpstreamError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched lengths, empty vectors or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::identical(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 1.0)]
    #[case::scaled(&[1.0, 2.0], &[2.0, 4.0], 1.0)]
    #[case::orthogonal(&[1.0, 0.0], &[0.0, 1.0], 0.0)]
    #[case::opposite(&[1.0, 0.0], &[-1.0, 0.0], -1.0)]
    #[case::mismatched(&[1.0], &[1.0, 2.0], 0.0)]
    #[case::empty(&[], &[], 0.0)]
    #[case::zero_norm(&[0.0, 0.0], &[1.0, 1.0], 0.0)]
    fn test_cosine_similarity(#[case] a: &[f32], #[case] b: &[f32], #[case] expected: f64) {
        assert!((cosine_similarity(a, b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_embedder_name() {
        let embedder =
            HttpEmbedder::new(EmbeddingConfig::new("http://localhost:1/v1", "bge-small")).unwrap();
        assert_eq!(embedder.name(), "embeddings/bge-small");
    }

    #[tokio::test]
    async fn test_embed_empty_input_skips_request() {
        let embedder =
            HttpEmbedder::new(EmbeddingConfig::new("http://localhost:1/v1", "bge-small")).unwrap();
        let vectors = embedder.embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn cosine_is_bounded(
                a in prop::collection::vec(-100.0f32..100.0, 1..16),
                b in prop::collection::vec(-100.0f32..100.0, 1..16),
            ) {
                let sim = cosine_similarity(&a, &b);
                prop_assert!((-1.0..=1.0).contains(&sim));
            }

            #[test]
            fn cosine_is_symmetric(
                a in prop::collection::vec(-100.0f32..100.0, 8),
                b in prop::collection::vec(-100.0f32..100.0, 8),
            ) {
                prop_assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-9);
            }
        }
    }
}
