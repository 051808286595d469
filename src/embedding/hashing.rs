//! Feature-hashing bag-of-words embeddings.
//!
//! Each normalized token (and each adjacent token pair, at half weight) is
//! hashed with SHA-256 into one of [`EMBEDDING_DIM`] buckets with a signed
//! contribution, then the vector is L2-normalized. No model, no network;
//! texts sharing vocabulary land close together.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{l2_normalize, Embedding, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::EmbeddingError;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "so", "that", "the", "this", "to", "was", "we", "were",
    "will", "with",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct HashingProvider;

impl HashingProvider {
    pub const MODEL_NAME: &'static str = "hash-bow-384";

    pub fn new() -> Self {
        Self
    }

    /// Synchronous core; the trait method wraps this.
    pub fn embed_text(&self, text: &str) -> Embedding {
        let tokens = tokenize(text);
        let mut values = [0.0f32; EMBEDDING_DIM];

        for token in &tokens {
            add_feature(&mut values, token, 1.0);
        }
        for pair in tokens.windows(2) {
            add_feature(&mut values, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut values);
        Embedding(Box::new(values))
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

fn add_feature(values: &mut [f32], feature: &str, weight: f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
        % EMBEDDING_DIM;
    let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
    values[bucket] += sign * weight;
}

/// Lowercase alphanumeric tokens with stopwords dropped and common English
/// suffixes stripped.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
        .collect()
}

fn stem(token: &str) -> String {
    for suffix in ["ing", "ed", "es", "ly", "s"] {
        if let Some(root) = token.strip_suffix(suffix) {
            if root.chars().count() >= 3 {
                return root.to_string();
            }
        }
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let p = HashingProvider::new();
        assert_eq!(p.embed_text("quarterly budget"), p.embed_text("quarterly budget"));
    }

    #[test]
    fn test_unit_length() {
        let e = HashingProvider::new().embed_text("planning the launch schedule");
        let norm: f32 = e.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let p = HashingProvider::new();
        let query = p.embed_text("budget planning");
        let related = p.embed_text("We discussed the budget and planned the launch.");
        let unrelated = p.embed_text("The cat sat on the warm windowsill.");
        assert!(query.cosine(&related) > query.cosine(&unrelated));
    }

    #[test]
    fn test_stemming_and_case() {
        assert_eq!(tokenize("Planning PLANS planned"), vec!["plann", "plan", "plann"]);
        assert_eq!(stem("is"), "is");
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingProvider::new().embed_text("  the and  ");
        assert!(e.as_slice().iter().all(|v| *v == 0.0));
    }
}
