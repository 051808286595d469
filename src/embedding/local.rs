//! In-process embeddings via fastembed (all-MiniLM-L6-v2).
//!
//! The model is downloaded from Hugging Face on first use and cached;
//! afterwards no network calls are made. Inference runs on the blocking
//! pool and the loaded model is shared by every worker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{Embedding, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, RecallError};

pub struct LocalProvider {
    model_name: String,
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RecallError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        if model_name != "all-minilm-l6-v2" {
            return Err(RecallError::Config(format!(
                "local embedding model '{model_name}' is not supported; only all-minilm-l6-v2 produces 384-dimensional vectors"
            )));
        }
        Ok(Self {
            model_name,
            model: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let model = Arc::clone(&self.model);
        let texts = vec![text.to_string()];

        let vector = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, EmbeddingError> {
            let mut guard = model
                .lock()
                .map_err(|_| EmbeddingError::Unavailable("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let loaded = TextEmbedding::try_new(InitOptions::new(
                    EmbeddingModel::AllMiniLML6V2,
                ))
                .map_err(|e| {
                    EmbeddingError::Unavailable(format!("failed to load local model: {e}"))
                })?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::Unavailable("local model not loaded".to_string()))?;

            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::Malformed(format!("local embedding failed: {e}")))?
                .pop()
                .ok_or_else(|| EmbeddingError::Malformed("empty local embedding output".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Unavailable(format!("embedding task failed: {e}")))??;

        Embedding::from_vec(vector)
    }
}
