//! Chunk embeddings: generation, storage, and similarity search.
//!
//! Vectors are generated lazily by [`EmbeddingStore::batch_generate`],
//! which fans provider calls out over a bounded worker pool and writes
//! results from a single loop. Failures are recorded on the chunk row and
//! retried on the next pass.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{create_provider, embed_with_timeout, Embedding, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{EmbeddingError, RecallError, Result};
use crate::filters::{bind_filters, SearchFilters, FILTER_CLAUSE};
use crate::models::{Chunk, ChunkId, DocumentId};
use crate::scheduler::CancelToken;
use crate::store::DocumentStore;

/// Worker-pool settings for embedding generation.
#[derive(Debug, Clone, Copy)]
pub struct EmbedOptions {
    pub concurrency: usize,
    /// Deadline for a single provider call.
    pub timeout: Duration,
}

impl EmbedOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

/// Outcome of one embedding pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub generated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// The pass stopped early because its cancel token fired.
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct EmbeddingStore {
    store: DocumentStore,
    provider: Arc<dyn EmbeddingProvider>,
    options: EmbedOptions,
}

impl EmbeddingStore {
    pub fn new(
        store: DocumentStore,
        provider: Arc<dyn EmbeddingProvider>,
        options: EmbedOptions,
    ) -> Result<Self> {
        if options.concurrency == 0 {
            return Err(RecallError::Config(
                "embedding concurrency must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            provider,
            options,
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed one chunk's text under the configured timeout.
    pub async fn generate(&self, chunk: &Chunk) -> std::result::Result<Embedding, EmbeddingError> {
        self.embed_text(&chunk.text).await
    }

    pub async fn embed_text(&self, text: &str) -> std::result::Result<Embedding, EmbeddingError> {
        embed_with_timeout(self.provider.as_ref(), text, self.options.timeout).await
    }

    /// Stored vector for a chunk, if one exists.
    pub async fn get(&self, chunk_id: ChunkId) -> Result<Option<Embedding>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT vector FROM embeddings WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_optional(self.store.pool())
                .await?;
        blob.map(|b| Embedding::from_blob(&b)).transpose()
    }

    /// Embed every chunk lacking a vector, or every chunk when `force`.
    ///
    /// Provider calls run `options.concurrency` at a time; a failure or
    /// timeout marks that chunk and the pass moves on. Under `force`, a
    /// chunk whose regeneration fails keeps its previous vector.
    #[instrument(skip(self, cancel), fields(model = %self.provider.model_name()))]
    pub async fn batch_generate(&self, force: bool, cancel: &CancelToken) -> Result<EmbedReport> {
        let pool = self.store.pool();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?;

        let sql = if force {
            "SELECT id, text FROM chunks ORDER BY id"
        } else {
            "SELECT c.id, c.text FROM chunks c \
             LEFT JOIN embeddings e ON e.chunk_id = c.id \
             WHERE e.chunk_id IS NULL ORDER BY c.id"
        };
        let pending: Vec<(ChunkId, String)> = sqlx::query_as(sql).fetch_all(pool).await?;

        let mut report = EmbedReport {
            skipped: (total as u64).saturating_sub(pending.len() as u64),
            ..Default::default()
        };
        if pending.is_empty() {
            debug!("no chunks pending");
            return Ok(report);
        }
        info!(pending = pending.len(), force, "embedding chunks");

        let provider = Arc::clone(&self.provider);
        let timeout = self.options.timeout;
        let results = stream::iter(pending)
            .map(|(chunk_id, text)| {
                let provider = Arc::clone(&provider);
                async move {
                    let result = embed_with_timeout(provider.as_ref(), &text, timeout).await;
                    (chunk_id, result)
                }
            })
            .buffer_unordered(self.options.concurrency);
        tokio::pin!(results);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.interrupted = true;
                    break;
                }
                next = results.next() => next,
            };
            let Some((chunk_id, result)) = next else {
                break;
            };

            match result {
                Ok(embedding) => {
                    if self.store_vector(chunk_id, &embedding).await? {
                        report.generated += 1;
                    } else {
                        // Chunk was replaced by a concurrent re-ingest.
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(chunk_id, error = %e, "embedding failed; will retry next pass");
                    self.mark_failed(chunk_id, &e).await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            generated = report.generated,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            "embedding pass finished"
        );
        Ok(report)
    }

    /// Upsert a vector. Returns `false` if the chunk no longer exists.
    async fn store_vector(&self, chunk_id: ChunkId, embedding: &Embedding) -> Result<bool> {
        let _guard = self.store.write_guard().await;
        let mut tx = self.store.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, vector, dimension, model, created_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM chunks WHERE id = ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                vector = excluded.vector,
                dimension = excluded.dimension,
                model = excluded.model,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_id)
        .bind(embedding.to_blob())
        .bind(EMBEDDING_DIM as i64)
        .bind(self.provider.model_name())
        .bind(Utc::now().timestamp())
        .bind(chunk_id)
        .execute(&mut *tx)
        .await?;

        let stored = result.rows_affected() > 0;
        if stored {
            sqlx::query("UPDATE chunks SET embed_error = NULL WHERE id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn mark_failed(&self, chunk_id: ChunkId, error: &EmbeddingError) -> Result<()> {
        let _guard = self.store.write_guard().await;
        sqlx::query(
            "UPDATE chunks SET embed_attempts = embed_attempts + 1, embed_error = ? WHERE id = ?",
        )
        .bind(error.to_string())
        .bind(chunk_id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }
}

/// A chunk matched by vector similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub chunk_index: i64,
    pub similarity: f32,
    pub text: String,
}

/// Nearest-neighbour lookup over stored chunk vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `top_k` chunks by cosine similarity, ties broken by lower
    /// chunk index.
    async fn similarity_search(
        &self,
        query: &Embedding,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>>;
}

/// Exact search by scanning every stored vector.
pub struct LinearScanIndex {
    pool: SqlitePool,
}

impl LinearScanIndex {
    pub fn new(store: &DocumentStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }
}

#[async_trait]
impl VectorIndex for LinearScanIndex {
    async fn similarity_search(
        &self,
        query: &Embedding,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.text, e.vector \
             FROM embeddings e \
             JOIN chunks c ON c.id = e.chunk_id \
             JOIN documents d ON d.id = c.document_id \
             WHERE {FILTER_CLAUSE}"
        );

        let mut hits = Vec::new();
        let mut rows = bind_filters(sqlx::query(&sql), filters).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let blob: Vec<u8> = row.get("vector");
            let vector = Embedding::from_blob(&blob)?;
            hits.push(ChunkHit {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                similarity: query.cosine(&vector),
                text: row.get("text"),
            });
        }

        hits.sort_by(compare_hits);
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn compare_hits(a: &ChunkHit, b: &ChunkHit) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then(a.chunk_index.cmp(&b.chunk_index))
        .then(a.chunk_id.cmp(&b.chunk_id))
}

pub(crate) fn print_embed_report(label: &str, report: &EmbedReport) {
    println!("{label}");
    println!("  generated: {}", report.generated);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    if report.interrupted {
        println!("  interrupted: yes");
    }
}

/// `recall reembed [--force]`
pub async fn run_reembed(config: &Config, force: bool) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let store = DocumentStore::open(config).await?;
    let provider = create_provider(&config.embedding)?;
    let embeddings = EmbeddingStore::new(
        store.clone(),
        provider,
        EmbedOptions::from_config(&config.embedding),
    )?;

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();
    let report = embeddings.batch_generate(force, &cancel).await?;
    print_embed_report(if force { "reembed (forced)" } else { "reembed" }, &report);

    store.close().await;
    Ok(())
}
