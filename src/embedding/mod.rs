//! Embedding provider abstraction and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait, the fixed-dimension
//! [`Embedding`] vector type, and the concrete providers:
//! - **[`DisabledProvider`]**: always unavailable; semantic search degrades.
//! - **[`HashingProvider`]**: deterministic feature hashing, fully offline.
//! - **[`OpenAIProvider`]**: any OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed`.
//! - **`LocalProvider`**: all-MiniLM-L6-v2 in process via fastembed
//!   (`local-embeddings` feature).
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use recall_harness::config::EmbeddingConfig;
//! # use recall_harness::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! Every provider output passes through [`Embedding::from_vec`], so a
//! model with the wrong dimensionality fails at the provider boundary
//! instead of corrupting the vector table.

mod hashing;
#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, RecallError};

pub use hashing::HashingProvider;
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use remote::{OllamaProvider, OpenAIProvider};

/// Dimensionality of every stored vector (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// A single embedding vector.
#[derive(Clone, PartialEq)]
pub struct Embedding(Box<[f32; EMBEDDING_DIM]>);

impl Embedding {
    /// Build from provider output, checking length and finiteness.
    pub fn from_slice(values: &[f32]) -> Result<Self, EmbeddingError> {
        let array: [f32; EMBEDDING_DIM] =
            values.try_into().map_err(|_| EmbeddingError::Dimension {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            })?;
        if array.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::Malformed(
                "vector contains non-finite values".to_string(),
            ));
        }
        Ok(Self(Box::new(array)))
    }

    pub fn from_vec(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        Self::from_slice(&values)
    }

    /// Decode a stored BLOB. A size mismatch means the table is corrupt.
    pub fn from_blob(blob: &[u8]) -> Result<Self, RecallError> {
        if blob.len() != EMBEDDING_DIM * 4 {
            return Err(RecallError::IndexConsistency(format!(
                "stored vector is {} bytes, expected {}",
                blob.len(),
                EMBEDDING_DIM * 4
            )));
        }
        Self::from_vec(blob_to_vec(blob))
            .map_err(|e| RecallError::IndexConsistency(format!("stored vector is invalid: {e}")))
    }

    pub fn to_blob(&self) -> Vec<u8> {
        vec_to_blob(self.as_slice())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0[..]
    }

    pub fn cosine(&self, other: &Embedding) -> f32 {
        cosine_similarity(self.as_slice(), other.as_slice())
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("dim", &EMBEDDING_DIM)
            .field("head", &&self.0[..4])
            .finish()
    }
}

/// A text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded alongside each stored vector.
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

/// Run [`EmbeddingProvider::embed`] under a deadline.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Embedding, EmbeddingError> {
    match tokio::time::timeout(timeout, provider.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Timeout(timeout)),
    }
}

// ============ Disabled Provider ============

/// Provider used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
        Err(EmbeddingError::Unavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashingProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `--features local-embeddings`) |
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, RecallError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hash" => Ok(Arc::new(HashingProvider::new())),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(RecallError::Config(
            "the local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(RecallError::Config(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty or zero vectors and for vectors of different
/// lengths.
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

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub(crate) fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(i: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[i] = 1.0;
        Embedding::from_vec(v).unwrap()
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v: Vec<f32> = (0..EMBEDDING_DIM).map(|i| i as f32 * 0.5 - 3.0).collect();
        let e = Embedding::from_slice(&v).unwrap();
        let restored = Embedding::from_blob(&e.to_blob()).unwrap();
        assert_eq!(e, restored);
    }

    #[test]
    fn test_wrong_dimension_rejected() {
        let err = Embedding::from_vec(vec![0.1; 768]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: EMBEDDING_DIM,
                actual: 768
            }
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[7] = f32::NAN;
        assert!(matches!(
            Embedding::from_vec(v),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_blob_is_consistency_error() {
        let blob = basis(0).to_blob();
        let err = Embedding::from_blob(&blob[..blob.len() - 4]).unwrap_err();
        assert!(matches!(err, RecallError::IndexConsistency(_)));
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((basis(3).cosine(&basis(3)) - 1.0).abs() < 1e-6);
        assert!(basis(3).cosine(&basis(4)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_unavailable() {
        let err = DisabledProvider.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }

    struct Sleepy;

    #[async_trait]
    impl EmbeddingProvider for Sleepy {
        fn model_name(&self) -> &str {
            "sleepy"
        }
        async fn embed(&self, _text: &str) -> Result<Embedding, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(basis(0))
        }
    }

    #[tokio::test]
    async fn test_timeout_wrapper() {
        let err = embed_with_timeout(&Sleepy, "x", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Timeout(_)));
    }

    #[test]
    fn test_create_provider_by_name() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_provider(&config).unwrap().model_name(), "disabled");
        config.provider = "hash".to_string();
        assert_eq!(
            create_provider(&config).unwrap().model_name(),
            HashingProvider::MODEL_NAME
        );
        config.provider = "nope".to_string();
        assert!(create_provider(&config).is_err());
    }
}
