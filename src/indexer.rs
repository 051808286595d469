//! Batch indexing.
//!
//! [`BatchIndexer`] drains any source of [`SourceItem`]s into the store.
//! Items whose content fingerprint matches the stored one are skipped,
//! so re-running over the same corpus is cheap and safe. Per-item
//! problems land in the report; only storage failures stop the run.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::connector_fs::FilesystemSource;
use crate::embedding::create_provider;
use crate::error::Result;
use crate::models::SourceItem;
use crate::scheduler::CancelToken;
use crate::store::{DocumentStore, IngestStatus};
use crate::vectors::{print_embed_report, EmbedOptions, EmbeddingStore};

/// A source item that could not be read or stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{filename}: {message}")]
pub struct SourceError {
    pub filename: String,
    pub message: String,
}

impl SourceError {
    pub fn new(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub scanned: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub errors: Vec<SourceError>,
    pub interrupted: bool,
}

pub struct BatchIndexer {
    store: DocumentStore,
}

impl BatchIndexer {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Ingest every item from `source`.
    ///
    /// The token is checked before each item; a cancelled run returns the
    /// partial report with `interrupted` set.
    #[instrument(skip_all)]
    pub async fn run<I>(&self, source: I, cancel: &CancelToken) -> Result<IndexReport>
    where
        I: IntoIterator<Item = std::result::Result<SourceItem, SourceError>>,
    {
        let mut report = IndexReport::default();

        for next in source {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            report.scanned += 1;

            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!(file = %e.filename, error = %e.message, "skipping unreadable item");
                    report.errors.push(e);
                    continue;
                }
            };

            // The store compares fingerprints; unchanged content only
            // refreshes metadata.
            match self.store.ingest(&item).await {
                Ok(outcome) if outcome.status == IngestStatus::Unchanged => {
                    debug!(file = %item.filename, "content unchanged");
                    report.skipped += 1;
                }
                Ok(outcome) => {
                    debug!(file = %item.filename, chunks = outcome.chunks, status = ?outcome.status, "indexed");
                    report.indexed += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(file = %item.filename, error = %e, "failed to index");
                    report.errors.push(SourceError::new(&item.filename, e.to_string()));
                }
            }
        }

        info!(
            scanned = report.scanned,
            indexed = report.indexed,
            skipped = report.skipped,
            errors = report.errors.len(),
            interrupted = report.interrupted,
            "index pass finished"
        );
        Ok(report)
    }
}

pub(crate) fn print_index_report(path: &Path, report: &IndexReport) {
    println!("index {}", path.display());
    println!("  scanned: {}", report.scanned);
    println!("  indexed: {}", report.indexed);
    println!("  skipped: {}", report.skipped);
    println!("  errors: {}", report.errors.len());
    for e in &report.errors {
        println!("    {}", e);
    }
    if report.interrupted {
        println!("  interrupted: yes");
    }
}

/// Index `path`, then embed new chunks if a provider is configured.
///
/// Shared by `recall index` and each `recall watch` run.
pub async fn index_once(
    config: &Config,
    store: &DocumentStore,
    path: &Path,
    embed: bool,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    let source = FilesystemSource::new(path, &config.indexer)?;
    let report = BatchIndexer::new(store.clone())
        .run(source.items(), cancel)
        .await?;
    print_index_report(path, &report);

    if embed && config.embedding.is_enabled() && !report.interrupted {
        let embeddings = EmbeddingStore::new(
            store.clone(),
            create_provider(&config.embedding)?,
            EmbedOptions::from_config(&config.embedding),
        )?;
        let embed_report = embeddings.batch_generate(false, cancel).await?;
        print_embed_report("embed", &embed_report);
    }
    Ok(())
}

/// `recall index <path> [--no-embed]`
pub async fn run_index(config: &Config, path: &Path, no_embed: bool) -> anyhow::Result<()> {
    let store = DocumentStore::open(config).await?;
    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();

    let result = index_once(config, &store, path, !no_embed, &cancel).await;
    store.close().await;
    result
}
