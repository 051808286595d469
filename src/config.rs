//! TOML configuration.
//!
//! Only `[db]` is required. Every other section falls back to defaults,
//! and [`Config::validate`] rejects inconsistent values before any
//! component is built.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::RecallError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), RecallError> {
        if self.window_size == 0 {
            return Err(RecallError::Config(
                "chunking.window_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(RecallError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunking.window_size ({})",
                self.overlap, self.window_size
            )));
        }
        Ok(())
    }
}

fn default_window_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_weight")]
    pub semantic_weight: f64,
    /// Candidates pulled from each channel before merging.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Semantic hits below this cosine similarity are dropped.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_proximity_window")]
    pub proximity_window: usize,
    #[serde(default = "default_proximity_boost")]
    pub proximity_boost: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_weight(),
            semantic_weight: default_weight(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            min_similarity: default_min_similarity(),
            proximity_window: default_proximity_window(),
            proximity_boost: default_proximity_boost(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), RecallError> {
        let weights = [
            ("keyword_weight", self.keyword_weight),
            ("semantic_weight", self.semantic_weight),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(RecallError::Config(format!(
                    "retrieval.{name} must be a non-negative number, got {w}"
                )));
            }
        }
        if self.keyword_weight + self.semantic_weight == 0.0 {
            return Err(RecallError::Config(
                "retrieval.keyword_weight and retrieval.semantic_weight cannot both be 0"
                    .to_string(),
            ));
        }
        if self.candidate_k == 0 {
            return Err(RecallError::Config(
                "retrieval.candidate_k must be >= 1".to_string(),
            ));
        }
        if self.final_limit == 0 {
            return Err(RecallError::Config(
                "retrieval.final_limit must be >= 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(RecallError::Config(
                "retrieval.min_similarity must be in [-1.0, 1.0]".to_string(),
            ));
        }
        if !self.proximity_boost.is_finite() || self.proximity_boost < 0.0 {
            return Err(RecallError::Config(
                "retrieval.proximity_boost must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_weight() -> f64 {
    0.5
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    10
}
fn default_min_similarity() -> f32 {
    0.3
}
fn default_proximity_window() -> usize {
    10
}
fn default_proximity_boost() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of `disabled`, `hash`, `openai`, `ollama`, `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for `openai` and `ollama` providers.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key for `openai`.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn validate(&self) -> Result<(), RecallError> {
        match self.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(RecallError::Config(format!(
                    "unknown embedding provider '{other}'; expected disabled, hash, openai, ollama or local"
                )))
            }
        }
        if self.concurrency == 0 {
            return Err(RecallError::Config(
                "embedding.concurrency must be >= 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(RecallError::Config(
                "embedding.timeout_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_concurrency() -> usize {
    2
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Attach `<stem>.analysis.md` sidecars as document metadata.
    #[serde(default = "default_true")]
    pub analysis_sidecars: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            analysis_sidecars: true,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Configuration with every section at its default, pointed at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexer: IndexerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), RecallError> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.embedding.validate()?;
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/recall.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.window_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.keyword_weight, 0.5);
        assert_eq!(config.retrieval.semantic_weight, 0.5);
        assert_eq!(config.embedding.concurrency, 2);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[chunking]\nwindow_size = 100\noverlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap"), "got: {err}");
    }

    #[test]
    fn test_rejects_negative_weight() {
        let err = parse_config("[db]\npath = \"x.db\"\n[retrieval]\nkeyword_weight = -0.1\n")
            .unwrap_err();
        assert!(err.to_string().contains("keyword_weight"), "got: {err}");
    }

    #[test]
    fn test_rejects_all_zero_weights() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[retrieval]\nkeyword_weight = 0.0\nsemantic_weight = 0.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot both be 0"), "got: {err}");
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse_config("[db]\npath = \"x.db\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("magic"), "got: {err}");
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"hash\"\nconcurrency = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"), "got: {err}");
    }
}
