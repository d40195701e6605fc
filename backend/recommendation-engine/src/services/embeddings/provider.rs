// ============================================
// Embedding Providers
// ============================================
//
// Text → vector capability used to build the content index.
// - HashingEmbeddingProvider: local feature-hashing encoder, no model server
// - RemoteEmbeddingProvider: sentence-encoder server over HTTP/JSON

use crate::error::{EngineError, Result};
use crate::utils::normalize;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encode texts into vectors of length `dimension()`, one per input, same order
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

// ============================================
// Feature hashing
// ============================================

/// Deterministic bag-of-words encoder: each lowercase token is hashed
/// (SHA-256) into a signed bucket, then the vector is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
    model_name: String,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::Configuration(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            model_name: format!("feature-hashing-{}", dimension),
        })
    }

    pub fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
            let bucket = hash as usize % self.dimension;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.encode_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ============================================
// Remote sentence encoder
// ============================================

#[derive(Serialize)]
struct EncodeRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EncodeResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an external encoder: `POST {endpoint}` with
/// `{"model", "texts"}`, answered by `{"embeddings": [[f32; D], ...]}`.
pub struct RemoteEmbeddingProvider {
    client: HttpClient,
    endpoint: String,
    model_name: String,
    dimension: usize,
}

impl RemoteEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::Configuration(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        let client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model_name: model_name.into(),
            dimension,
        })
    }

    /// Check the server's answer against the request and the declared dimension
    fn validate(&self, requested: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != requested {
            return Err(EngineError::EmbeddingProvider(format!(
                "requested {} embeddings, received {}",
                requested,
                embeddings.len()
            )));
        }
        for (position, vector) in embeddings.iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(EngineError::DimensionMismatch(format!(
                    "embedding {} has length {}, expected {}",
                    position,
                    vector.len(),
                    self.dimension
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::EmbeddingProvider(format!(
                    "embedding {} contains non-finite values",
                    position
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EncodeRequest {
            model: &self.model_name,
            texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::EmbeddingProvider(format!(
                "encoder returned {}: {}",
                status, error_text
            )));
        }

        let result: EncodeResponse = response.json().await?;
        self.validate(texts.len(), &result.embeddings)?;

        debug!(
            model = %self.model_name,
            count = texts.len(),
            "Encoded batch"
        );
        Ok(result.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{cosine_similarity, l2_norm};

    #[tokio::test]
    async fn test_hashing_provider_is_deterministic() {
        let provider = HashingEmbeddingProvider::new(64).unwrap();
        let texts = vec!["Machine Learning Basics".to_string()];

        let a = provider.encode(&texts).await.unwrap();
        let b = provider.encode(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        assert!((l2_norm(&a[0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hashing_provider_similarity() {
        let provider = HashingEmbeddingProvider::new(256).unwrap();
        let ml = provider.encode_one("Machine Learning Basics introduction to ML algorithms");
        let dl = provider.encode_one("Deep Learning Advanced neural networks and deep learning");
        let same = provider.encode_one("machine learning basics, introduction to ml algorithms!");

        assert!((cosine_similarity(&ml, &same) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&ml, &dl) < 0.99);
    }

    #[test]
    fn test_hashing_provider_empty_text() {
        let provider = HashingEmbeddingProvider::new(8).unwrap();
        assert_eq!(provider.encode_one("  ...  "), vec![0.0; 8]);
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }

    #[test]
    fn test_remote_provider_validates_response() {
        let provider = RemoteEmbeddingProvider::new(
            "http://127.0.0.1:9/encode",
            "all-MiniLM-L6-v2",
            3,
            Duration::from_millis(100),
        )
        .unwrap();

        assert!(provider.validate(1, &[vec![0.1, 0.2, 0.3]]).is_ok());
        assert!(matches!(
            provider.validate(2, &[vec![0.1, 0.2, 0.3]]),
            Err(EngineError::EmbeddingProvider(_))
        ));
        assert!(matches!(
            provider.validate(1, &[vec![0.1, 0.2]]),
            Err(EngineError::DimensionMismatch(_))
        ));
        assert!(provider.validate(1, &[vec![0.1, f32::NAN, 0.3]]).is_err());
    }

    #[tokio::test]
    async fn test_remote_provider_unreachable_is_error() {
        let provider = RemoteEmbeddingProvider::new(
            "http://127.0.0.1:9/encode",
            "all-MiniLM-L6-v2",
            3,
            Duration::from_millis(200),
        )
        .unwrap();

        let result = provider.encode(&["hello".to_string()]).await;
        assert!(matches!(result, Err(EngineError::EmbeddingProvider(_))));
        assert!(provider.encode(&[]).await.unwrap().is_empty());
    }
}
