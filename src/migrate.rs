use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;

/// Create the schema if it does not exist yet. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL UNIQUE,
            timestamp INTEGER NOT NULL,
            content TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            classification TEXT,
            summary TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            span_start INTEGER NOT NULL,
            span_len INTEGER NOT NULL,
            text TEXT NOT NULL,
            embed_attempts INTEGER NOT NULL DEFAULT 0,
            embed_error TEXT,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id INTEGER PRIMARY KEY,
            vector BLOB NOT NULL,
            dimension INTEGER NOT NULL,
            model TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        debug!("creating documents_fts");
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE documents_fts USING fts5(
                content,
                summary,
                content='documents',
                content_rowid='id',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // The keyword index follows the documents table inside the writer's
    // transaction.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_fts_insert AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_fts_delete AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_fts_update AFTER UPDATE OF content, summary ON documents
        WHEN old.content IS NOT new.content OR old.summary IS NOT new.summary
        BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
            INSERT INTO documents_fts(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_timestamp ON documents(timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_classification ON documents(classification)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
