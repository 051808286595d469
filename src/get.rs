//! Document retrieval and deletion by id.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::models::{Chunk, Document, DocumentId};
use crate::store::DocumentStore;

/// A document with its chunks, as printed by `recall get --json`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

pub async fn get_document(store: &DocumentStore, id: DocumentId) -> Result<DocumentView> {
    let Some(document) = store.get_document(id).await? else {
        bail!("document not found: {}", id);
    };
    let chunks = store.chunks_for(id).await?;
    Ok(DocumentView { document, chunks })
}

/// `recall get <id>`
pub async fn run_get(config: &Config, id: DocumentId, json: bool) -> Result<()> {
    let store = DocumentStore::open(config).await?;
    let view = get_document(&store, id).await;
    store.close().await;
    let view = view?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let doc = &view.document;
    let meta = &doc.meta;
    println!("--- Document ---");
    println!("id:             {}", doc.id);
    println!("filename:       {}", doc.filename);
    println!("timestamp:      {}", doc.timestamp.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("words:          {}", doc.word_count);
    println!("fingerprint:    {}", doc.fingerprint);
    println!("ingested_at:    {}", doc.ingested_at.format("%Y-%m-%dT%H:%M:%SZ"));
    if let Some(ref class) = meta.classification {
        println!("classification: {}", class);
    }
    if let Some(ref engine) = meta.engine {
        println!("engine:         {}", engine);
    }
    if !meta.tags.is_empty() {
        println!("tags:           {}", meta.tags.join(", "));
    }
    if let Some(ref summary) = meta.summary {
        println!("summary:        {}", summary);
    }
    for item in &meta.action_items {
        println!("action:         {}", item);
    }
    println!();

    println!("--- Content ---");
    println!("{}", doc.content);
    println!();

    println!("--- Chunks ({}) ---", view.chunks.len());
    for chunk in &view.chunks {
        let status = match chunk.embed_error {
            Some(ref e) => format!(" (embedding failed x{}: {})", chunk.embed_attempts, e),
            None => String::new(),
        };
        println!(
            "[chunk {} @{}+{}]{}",
            chunk.chunk_index, chunk.span_start, chunk.span_len, status
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

/// `recall delete <id>`
pub async fn run_delete(config: &Config, id: DocumentId) -> Result<()> {
    let store = DocumentStore::open(config).await?;
    let deleted = store.delete(id).await;
    store.close().await;

    if !deleted? {
        bail!("document not found: {}", id);
    }
    println!("deleted document {}", id);
    Ok(())
}
