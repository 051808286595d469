//! Core data models.
//!
//! These types represent the documents, chunks, and metadata that flow
//! through ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocumentId = i64;
pub type ChunkId = i64;

/// Opaque analysis metadata supplied alongside a document.
///
/// `classification` and `summary` are stored in their own columns so they
/// can be filtered and keyword-searched; everything else lands in
/// `metadata_json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    /// Transcription engine named in the source header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_model: Option<String>,
}

/// Raw item handed to the store for ingestion.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Unique key; re-ingesting the same filename updates in place.
    pub filename: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub meta: DocumentMeta,
}

impl SourceItem {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            timestamp,
            meta: DocumentMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: DocumentMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Document as stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub word_count: i64,
    pub fingerprint: String,
    pub meta: DocumentMeta,
    pub ingested_at: DateTime<Utc>,
}

/// Lightweight document view used by search results and derived views.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A stored chunk of a document's content.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub chunk_index: i64,
    /// Offset of the first character, in Unicode scalar values.
    pub span_start: i64,
    pub span_len: i64,
    pub text: String,
    pub embed_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_error: Option<String>,
}

/// Whitespace-delimited word count.
pub fn word_count(content: &str) -> i64 {
    content.split_whitespace().count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("  one two\n\nthree\t four "), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_meta_skips_empty_fields() {
        let meta = DocumentMeta {
            classification: Some("meeting".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"classification":"meeting"}"#);
    }
}
