//! Index statistics.
//!
//! A quick summary of what's indexed: document and chunk counts,
//! embedding coverage, date span, and a per-classification breakdown.
//! Used by `recall stats` to confirm that indexing and embedding passes
//! are doing what you expect.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::store::{from_unix, DocumentStore};

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationCount {
    pub classification: String,
    pub documents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// Chunks whose last embedding attempt failed and have no vector.
    pub failed: i64,
    pub total_words: i64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub by_classification: Vec<ClassificationCount>,
    pub database_bytes: u64,
}

impl IndexStats {
    pub async fn collect(store: &DocumentStore, db_path: &Path) -> crate::Result<Self> {
        let pool = store.pool();

        let doc_row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(word_count), 0) AS words, \
                    MIN(timestamp) AS earliest, MAX(timestamp) AS latest \
             FROM documents",
        )
        .fetch_one(pool)
        .await?;

        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?;
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(pool)
            .await?;
        let failed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c \
             WHERE c.embed_error IS NOT NULL \
               AND NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.chunk_id = c.id)",
        )
        .fetch_one(pool)
        .await?;

        let by_classification = sqlx::query(
            "SELECT COALESCE(classification, '(none)') AS class, COUNT(*) AS n \
             FROM documents GROUP BY class ORDER BY n DESC, class ASC",
        )
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| ClassificationCount {
            classification: row.get("class"),
            documents: row.get("n"),
        })
        .collect();

        Ok(Self {
            documents: doc_row.get("n"),
            chunks,
            embedded,
            failed,
            total_words: doc_row.get("words"),
            earliest: doc_row.get::<Option<i64>, _>("earliest").map(from_unix),
            latest: doc_row.get::<Option<i64>, _>("latest").map(from_unix),
            by_classification,
            database_bytes: std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0),
        })
    }
}

/// `recall stats`
pub async fn run_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = DocumentStore::open(config).await?;
    let stats = IndexStats::collect(&store, &config.db.path).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Recall Index Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.database_bytes));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Words:       {}", stats.total_words);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    if stats.failed > 0 {
        println!("  Failed:      {} (retried on next reembed)", stats.failed);
    }
    if let (Some(first), Some(last)) = (stats.earliest, stats.latest) {
        println!(
            "  Span:        {} .. {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        );
    }

    if !stats.by_classification.is_empty() {
        println!();
        println!("  By classification:");
        println!("  {:<24} {:>6}", "CLASSIFICATION", "DOCS");
        println!("  {}", "-".repeat(32));
        for c in &stats.by_classification {
            println!("  {:<24} {:>6}", c.classification, c.documents);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
