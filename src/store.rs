//! Document store.
//!
//! Owns the `documents` and `chunks` tables. Every mutation runs inside a
//! single SQLite transaction while holding the store's write lock, so the
//! keyword index (maintained by triggers) and the chunk rows never diverge
//! from the document they belong to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::EMBEDDING_DIM;
use crate::error::{RecallError, Result};
use crate::filters::{bind_filters, SearchFilters, FILTER_CLAUSE};
use crate::migrate;
use crate::models::{
    word_count, Chunk, Document, DocumentId, DocumentMeta, DocumentSummary, SourceItem,
};

/// What [`DocumentStore::ingest`] did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Inserted,
    /// Content changed; chunks and embeddings were regenerated.
    Updated,
    /// Same fingerprint; only metadata and timestamp were refreshed.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document_id: DocumentId,
    pub status: IngestStatus,
    pub chunks: usize,
}

/// Shared handle to the document database.
///
/// Cheap to clone; every clone shares the pool and the write lock.
/// Columns compared when the same file is ingested again.
#[derive(sqlx::FromRow)]
struct StoredRow {
    id: DocumentId,
    fingerprint: String,
    timestamp: i64,
    classification: Option<String>,
    summary: Option<String>,
    metadata_json: String,
}

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    chunking: ChunkingConfig,
    write_lock: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool, chunking: ChunkingConfig) -> Result<Self> {
        chunking.validate()?;
        Ok(Self {
            pool,
            chunking,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Connect, run migrations, and build a store from `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let pool = db::connect(&config.db).await?;
        migrate::run_migrations(&pool).await?;
        Self::new(pool, config.chunking)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Serialize writers. SQLite allows one writer at a time; taking the
    /// lock up front avoids `SQLITE_BUSY` when a deferred transaction
    /// upgrades.
    pub(crate) async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or update a document keyed by filename.
    ///
    /// When the content fingerprint changes, the document's chunks (and,
    /// by cascade, their embeddings) are replaced in the same transaction.
    #[instrument(skip_all, fields(filename = %item.filename))]
    pub async fn ingest(&self, item: &SourceItem) -> Result<IngestOutcome> {
        if item.filename.trim().is_empty() {
            return Err(RecallError::InvalidDocument(
                "filename must not be empty".to_string(),
            ));
        }
        if item.content.trim().is_empty() {
            return Err(RecallError::InvalidDocument(format!(
                "{}: content is empty",
                item.filename
            )));
        }

        let fingerprint = fingerprint(&item.content);
        let words = word_count(&item.content);
        let metadata_json = serde_json::to_string(&item.meta)?;
        let timestamp = item.timestamp.timestamp();
        let now = Utc::now().timestamp();

        let _guard = self.write_guard().await;
        let mut tx = self.pool.begin().await?;

        let existing: Option<StoredRow> = sqlx::query_as(
            "SELECT id, fingerprint, timestamp, classification, summary, metadata_json \
             FROM documents WHERE filename = ?",
        )
        .bind(&item.filename)
        .fetch_optional(&mut *tx)
        .await?;

        let (document_id, status) = match existing {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO documents (filename, timestamp, content, word_count, fingerprint,
                                           classification, summary, metadata_json, ingested_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&item.filename)
                .bind(timestamp)
                .bind(&item.content)
                .bind(words)
                .bind(&fingerprint)
                .bind(&item.meta.classification)
                .bind(&item.meta.summary)
                .bind(&metadata_json)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                (result.last_insert_rowid(), IngestStatus::Inserted)
            }
            Some(row) if row.fingerprint == fingerprint => {
                let id = row.id;
                if row.timestamp == timestamp
                    && row.classification == item.meta.classification
                    && row.summary == item.meta.summary
                    && row.metadata_json == metadata_json
                {
                    // Nothing to write; the keyword index stays untouched.
                    drop(tx);
                    return Ok(IngestOutcome {
                        document_id: id,
                        status: IngestStatus::Unchanged,
                        chunks: 0,
                    });
                }
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET timestamp = ?, classification = ?, summary = ?, metadata_json = ?
                    WHERE id = ?
                    "#,
                )
                .bind(timestamp)
                .bind(&item.meta.classification)
                .bind(&item.meta.summary)
                .bind(&metadata_json)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                (id, IngestStatus::Unchanged)
            }
            Some(row) => {
                let id = row.id;
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET timestamp = ?, content = ?, word_count = ?, fingerprint = ?,
                        classification = ?, summary = ?, metadata_json = ?, ingested_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(timestamp)
                .bind(&item.content)
                .bind(words)
                .bind(&fingerprint)
                .bind(&item.meta.classification)
                .bind(&item.meta.summary)
                .bind(&metadata_json)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                // Embeddings follow through ON DELETE CASCADE.
                sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                (id, IngestStatus::Updated)
            }
        };

        let mut chunk_count = 0;
        if status != IngestStatus::Unchanged {
            let chunks = chunk_text(&item.content, &self.chunking);
            for chunk in &chunks {
                sqlx::query(
                    r#"
                    INSERT INTO chunks (document_id, chunk_index, span_start, span_len, text)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(document_id)
                .bind(chunk.index as i64)
                .bind(chunk.start as i64)
                .bind(chunk.len as i64)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
            }
            chunk_count = chunks.len();
        }

        tx.commit().await?;
        debug!(document_id, ?status, chunks = chunk_count, "ingested");

        Ok(IngestOutcome {
            document_id,
            status,
            chunks: chunk_count,
        })
    }

    /// Delete a document with its chunks, embeddings and index entry.
    /// Returns `false` if no such document existed.
    pub async fn delete(&self, id: DocumentId) -> Result<bool> {
        let _guard = self.write_guard().await;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(document_id = id, "deleted document");
        }
        Ok(deleted)
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, timestamp, content, word_count, fingerprint,
                   classification, summary, metadata_json, ingested_at
            FROM documents WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn chunks_for(&self, document_id: DocumentId) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, span_start, span_len, text,
                   embed_attempts, embed_error
            FROM chunks WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                span_start: row.get("span_start"),
                span_len: row.get("span_len"),
                text: row.get("text"),
                embed_attempts: row.get("embed_attempts"),
                embed_error: row.get("embed_error"),
            })
            .collect())
    }

    /// Summaries for a set of ids, keyed by id. Unknown ids are absent.
    pub async fn document_summaries(
        &self,
        ids: &[DocumentId],
    ) -> Result<HashMap<DocumentId, DocumentSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, filename, timestamp, word_count, classification, summary \
             FROM documents WHERE id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(row_to_summary)
            .map(|s| (s.id, s))
            .collect())
    }

    /// Documents matching `filters`, newest first.
    pub async fn list_documents(&self, filters: &SearchFilters) -> Result<Vec<DocumentSummary>> {
        let sql = format!(
            "SELECT d.id, d.filename, d.timestamp, d.word_count, d.classification, d.summary \
             FROM documents d WHERE {FILTER_CLAUSE} \
             ORDER BY d.timestamp DESC, d.id ASC"
        );
        let rows = bind_filters(sqlx::query(&sql), filters)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_summary).collect())
    }

    /// Distinct classifications carried by at least one document.
    pub async fn classifications(&self) -> Result<Vec<String>> {
        let values = sqlx::query_scalar(
            "SELECT DISTINCT classification FROM documents \
             WHERE classification IS NOT NULL ORDER BY classification",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    /// Verify that derived data agrees with the documents table.
    ///
    /// Checks the keyword index row set, runs the FTS5 integrity check
    /// against the content table, and checks stored vector sizes.
    pub async fn check_integrity(&self) -> Result<()> {
        let unindexed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents d \
             WHERE NOT EXISTS (SELECT 1 FROM documents_fts_docsize s WHERE s.id = d.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        let stale: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents_fts_docsize s \
             WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = s.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        if unindexed > 0 || stale > 0 {
            return Err(RecallError::IndexConsistency(format!(
                "keyword index out of sync: {unindexed} unindexed documents, {stale} stale entries"
            )));
        }

        sqlx::query("INSERT INTO documents_fts(documents_fts, rank) VALUES('integrity-check', 1)")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RecallError::IndexConsistency(format!("keyword index integrity check failed: {e}"))
            })?;

        let orphaned_chunks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c \
             WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = c.document_id)",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphaned_vectors: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings e \
             WHERE NOT EXISTS (SELECT 1 FROM chunks c WHERE c.id = e.chunk_id)",
        )
        .fetch_one(&self.pool)
        .await?;
        if orphaned_chunks > 0 || orphaned_vectors > 0 {
            return Err(RecallError::IndexConsistency(format!(
                "{orphaned_chunks} orphaned chunks, {orphaned_vectors} orphaned embeddings"
            )));
        }

        let bad_vectors: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings WHERE dimension != ? OR length(vector) != ?",
        )
        .bind(EMBEDDING_DIM as i64)
        .bind((EMBEDDING_DIM * 4) as i64)
        .fetch_one(&self.pool)
        .await?;
        if bad_vectors > 0 {
            return Err(RecallError::IndexConsistency(format!(
                "{bad_vectors} embeddings do not have {EMBEDDING_DIM} dimensions"
            )));
        }

        Ok(())
    }

    /// Rebuild the keyword index from the documents table.
    pub async fn rebuild_index(&self) -> Result<()> {
        let _guard = self.write_guard().await;
        sqlx::query("INSERT INTO documents_fts(documents_fts) VALUES('rebuild')")
            .execute(&self.pool)
            .await?;
        info!("rebuilt keyword index");
        Ok(())
    }
}

/// SHA-256 of the content, hex encoded.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Document {
    let metadata_json: String = row.get("metadata_json");
    let mut meta: DocumentMeta = serde_json::from_str(&metadata_json).unwrap_or_default();
    // Columns are authoritative for the filterable fields.
    meta.classification = row.get("classification");
    meta.summary = row.get("summary");

    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        timestamp: from_unix(row.get("timestamp")),
        content: row.get("content"),
        word_count: row.get("word_count"),
        fingerprint: row.get("fingerprint"),
        meta,
        ingested_at: from_unix(row.get("ingested_at")),
    }
}

pub(crate) fn row_to_summary(row: &SqliteRow) -> DocumentSummary {
    DocumentSummary {
        id: row.get("id"),
        filename: row.get("filename"),
        timestamp: from_unix(row.get("timestamp")),
        word_count: row.get("word_count"),
        classification: row.get("classification"),
        summary: row.get("summary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("hello");
        assert_eq!(a, fingerprint("hello"));
        assert_ne!(a, fingerprint("hello "));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_from_unix_round_trips_seconds() {
        assert_eq!(from_unix(1_753_833_600).timestamp(), 1_753_833_600);
    }
}
