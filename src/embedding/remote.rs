//! HTTP embedding providers.
//!
//! Both providers retry HTTP 429 and 5xx responses with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s) up to `embedding.max_retries`.
//! Client errors fail immediately. Timeouts are not retried here; the
//! chunk is marked failed and picked up by the next batch pass.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Embedding, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, RecallError};

fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client, RecallError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RecallError::Config(format!("failed to build HTTP client: {e}")))
}

/// POST `body` to `url`, retrying transient failures, and return the JSON
/// response.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout: Duration,
) -> Result<Value, EmbeddingError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| EmbeddingError::Malformed(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(EmbeddingError::Http(format!("{status}: {body_text}")));
                    continue;
                }
                return Err(EmbeddingError::Http(format!("{status}: {body_text}")));
            }
            Err(e) if e.is_timeout() => return Err(EmbeddingError::Timeout(timeout)),
            Err(e) => {
                return Err(EmbeddingError::Unavailable(format!(
                    "cannot reach {url}: {e}"
                )))
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EmbeddingError::Unavailable("embedding request failed after retries".to_string())
    }))
}

fn parse_vector(value: &Value) -> Result<Embedding, EmbeddingError> {
    let values = value
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed("non-numeric embedding value".to_string()))
        })
        .collect::<Result<Vec<f32>, _>>()?;
    Embedding::from_vec(values)
}

// ============ OpenAI Provider ============

/// Provider for OpenAI-compatible `POST {url}/embeddings` endpoints.
///
/// Requests `dimensions = 384` so `text-embedding-3-*` models match the
/// stored vector size.
pub struct OpenAIProvider {
    model: String,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RecallError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RecallError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": EMBEDDING_DIM,
        });
        let json = post_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout,
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<Embedding, EmbeddingError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| EmbeddingError::Malformed("missing data array".to_string()))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding".to_string()))?;
    parse_vector(embedding)
}

// ============ Ollama Provider ============

/// Provider for a local Ollama instance (`POST {url}/api/embed`).
///
/// Defaults to the `all-minilm` model, which produces 384-dimensional
/// vectors.
pub struct OllamaProvider {
    model: String,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RecallError> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm".to_string()),
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let json = post_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.max_retries,
            self.timeout,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Embedding, EmbeddingError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| EmbeddingError::Malformed("missing embeddings array".to_string()))?;
    parse_vector(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_json(len: usize) -> Value {
        let mut v = vec![0.0f64; len];
        v[0] = 1.0;
        serde_json::json!(v)
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({ "data": [{ "index": 0, "embedding": unit_json(EMBEDDING_DIM) }] });
        let e = parse_openai_response(&json).unwrap();
        assert_eq!(e.as_slice()[0], 1.0);
    }

    #[test]
    fn test_parse_ollama_wrong_dimension() {
        let json = serde_json::json!({ "embeddings": [unit_json(768)] });
        assert!(matches!(
            parse_ollama_response(&json),
            Err(EmbeddingError::Dimension { actual: 768, .. })
        ));
    }

    #[test]
    fn test_parse_missing_fields() {
        assert!(matches!(
            parse_openai_response(&serde_json::json!({})),
            Err(EmbeddingError::Malformed(_))
        ));
        assert!(matches!(
            parse_ollama_response(&serde_json::json!({ "embeddings": [["x"]] })),
            Err(EmbeddingError::Malformed(_))
        ));
    }
}
