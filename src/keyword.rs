//! Keyword search over the `documents_fts` index.
//!
//! The index tokenizes with `porter unicode61`, so matching is
//! case-insensitive and stemmed ("planning" finds "planned"). Ranking is
//! FTS5 BM25 with content weighted above the analysis summary; documents
//! where adjacent query terms appear close together get a multiplicative
//! proximity boost.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;
use sqlx::Row;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::filters::{bind_filters, SearchFilters, FILTER_CLAUSE};
use crate::models::{DocumentId, DocumentSummary};
use crate::store::{row_to_summary, DocumentStore};

/// Query terms beyond this are ignored.
const MAX_TERMS: usize = 32;

/// Tuning for [`DocumentStore::search_keyword`].
#[derive(Debug, Clone, Copy)]
pub struct KeywordOptions {
    /// Max token distance for the proximity boost.
    pub proximity_window: usize,
    /// Score multiplier is `1 + proximity_boost` for close matches.
    pub proximity_boost: f64,
}

impl From<&RetrievalConfig> for KeywordOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            proximity_window: config.proximity_window,
            proximity_boost: config.proximity_boost,
        }
    }
}

impl Default for KeywordOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

/// A document matched by keyword.
#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub document: DocumentSummary,
    /// Negated BM25 rank (higher is better), after any proximity boost.
    pub score: f64,
    pub snippet: String,
    pub proximity: bool,
}

/// Split a free-text query into lowercase index terms, deduplicated in
/// order of first appearance.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_TERMS)
        .collect()
}

/// FTS5 expression matching any of the terms. Terms are quoted, so FTS
/// operators in user input (`AND`, `NEAR`, `*`) are treated as plain text.
pub fn match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// FTS5 expression matching documents where some adjacent pair of query
/// terms occurs within `window` tokens.
pub fn proximity_expression(terms: &[String], window: usize) -> Option<String> {
    if terms.len() < 2 {
        return None;
    }
    Some(
        terms
            .windows(2)
            .map(|pair| format!("NEAR(\"{}\" \"{}\", {})", pair[0], pair[1], window))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

impl DocumentStore {
    /// Rank documents by keyword relevance.
    ///
    /// Returns an empty list for queries with no indexable terms. Results
    /// are ordered by score, then most recent timestamp, then id.
    pub async fn search_keyword(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        options: &KeywordOptions,
    ) -> Result<Vec<KeywordHit>> {
        filters.check()?;
        let terms = query_terms(query);
        let Some(expr) = match_expression(&terms) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.ranked(&expr, None, filters, limit).await?;

        // Only documents matching the proximity expression can be boosted,
        // and only their top `limit` by raw score can reach the cutoff.
        if options.proximity_boost > 0.0 {
            if let Some(near) = proximity_expression(&terms, options.proximity_window) {
                let close = self.ranked(&expr, Some(&near), filters, limit).await?;
                let close_ids: HashSet<DocumentId> =
                    close.iter().map(|h| h.document.id).collect();
                hits.retain(|h| !close_ids.contains(&h.document.id));
                hits.extend(close.into_iter().map(|mut hit| {
                    hit.score *= 1.0 + options.proximity_boost;
                    hit.proximity = true;
                    hit
                }));
                sort_keyword_hits(&mut hits);
                hits.truncate(limit);
            }
        }

        debug!(terms = terms.len(), hits = hits.len(), "keyword search");
        Ok(hits)
    }

    /// Top `limit` documents for `expr` by raw BM25 score, optionally
    /// restricted to rows that also match `within`.
    async fn ranked(
        &self,
        expr: &str,
        within: Option<&str>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        let restrict = if within.is_some() {
            "AND d.id IN (SELECT rowid FROM documents_fts WHERE documents_fts MATCH ?) "
        } else {
            ""
        };
        let sql = format!(
            "SELECT d.id, d.filename, d.timestamp, d.word_count, d.classification, d.summary, \
                    bm25(documents_fts, 1.0, 0.5) AS rank, \
                    snippet(documents_fts, 0, '[', ']', '...', 24) AS snippet \
             FROM documents_fts \
             JOIN documents d ON d.id = documents_fts.rowid \
             WHERE documents_fts MATCH ? {restrict}AND {FILTER_CLAUSE} \
             ORDER BY rank, d.timestamp DESC, d.id ASC \
             LIMIT ?"
        );
        let mut query = sqlx::query(&sql).bind(expr);
        if let Some(within) = within {
            query = query.bind(within);
        }
        let rows = bind_filters(query, filters)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                KeywordHit {
                    document: row_to_summary(row),
                    score: -rank,
                    snippet: row.get("snippet"),
                    proximity: false,
                }
            })
            .collect())
    }
}

pub(crate) fn sort_keyword_hits(hits: &mut [KeywordHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.document.timestamp.cmp(&a.document.timestamp))
            .then(a.document.id.cmp(&b.document.id))
    });
}
