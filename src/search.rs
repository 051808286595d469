//! Keyword, semantic, and hybrid search.
//!
//! Hybrid mode runs both channels concurrently, min-max normalizes each
//! candidate list to `[0, 1]`, and combines them per document:
//!
//! ```text
//! score = keyword_weight * k + semantic_weight * s
//! ```
//!
//! A document missing from one channel scores 0 there. Results sort by
//! score descending, then timestamp descending, then id ascending. If the
//! embedding provider is unreachable, hybrid falls back to the keyword
//! ranking and marks the response `degraded`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_provider;
use crate::error::{EmbeddingError, RecallError, Result};
use crate::filters::SearchFilters;
use crate::keyword::{KeywordHit, KeywordOptions};
use crate::models::{DocumentId, DocumentSummary};
use crate::store::DocumentStore;
use crate::vectors::{ChunkHit, EmbedOptions, EmbeddingStore, LinearScanIndex, VectorIndex};

/// Characters of chunk text shown for semantic matches.
const SNIPPET_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SearchMode {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(RecallError::Config(format!(
                "unknown search mode '{other}'; use keyword, semantic, or hybrid"
            ))),
        }
    }
}

/// One ranked document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    /// Keyword component: raw BM25 in keyword mode, normalized in hybrid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    /// Semantic component: cosine similarity, normalized in hybrid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    pub snippet: String,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    /// The mode that actually produced `results`; `keyword` when hybrid
    /// fell back.
    pub effective_mode: SearchMode,
    /// True when the semantic channel was requested but unavailable.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "SearchFilters::is_empty")]
    pub filters: SearchFilters,
    pub results: Vec<SearchHit>,
}

impl SearchResponse {
    fn empty(query: &str, mode: SearchMode, filters: &SearchFilters) -> Self {
        Self {
            query: query.to_string(),
            mode,
            effective_mode: mode,
            degraded: false,
            warnings: Vec::new(),
            filters: filters.clone(),
            results: Vec::new(),
        }
    }
}

/// A per-document candidate from one channel.
#[derive(Debug, Clone)]
struct Candidate {
    document: DocumentSummary,
    raw_score: f64,
    snippet: String,
}

impl From<KeywordHit> for Candidate {
    fn from(hit: KeywordHit) -> Self {
        Self {
            document: hit.document,
            raw_score: hit.score,
            snippet: hit.snippet,
        }
    }
}

/// The query engine. Cheap to clone.
#[derive(Clone)]
pub struct HybridSearch {
    store: DocumentStore,
    embeddings: EmbeddingStore,
    index: Arc<dyn VectorIndex>,
    retrieval: RetrievalConfig,
}

impl HybridSearch {
    pub fn new(
        store: DocumentStore,
        embeddings: EmbeddingStore,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        retrieval.validate()?;
        let index = Arc::new(LinearScanIndex::new(&store));
        Ok(Self {
            store,
            embeddings,
            index,
            retrieval,
        })
    }

    /// Swap the vector index implementation.
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = index;
        self
    }

    /// Open the store and build an engine with the configured provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = DocumentStore::open(config).await?;
        let provider = create_provider(&config.embedding)?;
        let embeddings = EmbeddingStore::new(
            store.clone(),
            provider,
            EmbedOptions::from_config(&config.embedding),
        )?;
        Self::new(store, embeddings, config.retrieval.clone())
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Run a query. Filter problems and provider outages produce an
    /// empty or degraded response with warnings, never an error; only
    /// storage failures propagate.
    #[instrument(skip(self, filters), fields(mode = %mode))]
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<SearchResponse> {
        let mut response = SearchResponse::empty(query, mode, filters);
        if query.trim().is_empty() || top_k == 0 {
            return Ok(response);
        }

        match self.validate_filters(filters).await {
            Ok(()) => {}
            Err(RecallError::QueryFilter(msg)) => {
                warn!(%msg, "rejected search filters");
                response.warnings.push(msg);
                return Ok(response);
            }
            Err(e) => return Err(e),
        }

        let pool_size = self.retrieval.candidate_k.max(top_k);

        match mode {
            SearchMode::Keyword => {
                let keyword = self.keyword_candidates(query, pool_size, filters).await?;
                response.results = keyword_results(keyword, top_k);
            }
            SearchMode::Semantic => {
                match self.semantic_candidates(query, pool_size, filters).await? {
                    Ok(semantic) => response.results = semantic_results(semantic, top_k),
                    Err(e) => {
                        warn!(error = %e, "semantic search unavailable");
                        response.degraded = true;
                        response
                            .warnings
                            .push(format!("semantic search unavailable: {e}"));
                    }
                }
            }
            SearchMode::Hybrid => {
                let (keyword, semantic) = tokio::join!(
                    self.keyword_candidates(query, pool_size, filters),
                    self.semantic_candidates(query, pool_size, filters),
                );
                let keyword = keyword?;
                match semantic? {
                    Ok(semantic) => {
                        response.results = merge_candidates(
                            &keyword,
                            &semantic,
                            self.retrieval.keyword_weight,
                            self.retrieval.semantic_weight,
                        );
                        response.results.truncate(top_k);
                    }
                    Err(e) => {
                        warn!(error = %e, "semantic channel unavailable, using keyword ranking");
                        response.degraded = true;
                        response.effective_mode = SearchMode::Keyword;
                        response.warnings.push(format!(
                            "semantic search unavailable, showing keyword results only: {e}"
                        ));
                        response.results = keyword_results(keyword, top_k);
                    }
                }
            }
        }

        info!(
            results = response.results.len(),
            degraded = response.degraded,
            "search complete"
        );
        Ok(response)
    }

    async fn validate_filters(&self, filters: &SearchFilters) -> Result<()> {
        filters.check()?;
        if let Some(ref wanted) = filters.classification {
            let known = self.store.classifications().await?;
            if !known.iter().any(|c| c == wanted) {
                return Err(RecallError::QueryFilter(format!(
                    "unknown classification '{wanted}'"
                )));
            }
        }
        Ok(())
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        let options = KeywordOptions::from(&self.retrieval);
        let hits = self
            .store
            .search_keyword(query, filters, limit, &options)
            .await?;
        Ok(hits.into_iter().map(Candidate::from).collect())
    }

    /// Outer error: storage. Inner error: the provider could not embed
    /// the query.
    async fn semantic_candidates(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<std::result::Result<Vec<Candidate>, EmbeddingError>> {
        let query_vector = match self.embeddings.embed_text(query).await {
            Ok(v) => v,
            Err(e) => return Ok(Err(e)),
        };

        // The index ranks chunks. Widen the fetch until `limit` distinct
        // documents are found or hits fall below the cutoff.
        let mut fetch = limit;
        let best = loop {
            let hits = self
                .index
                .similarity_search(&query_vector, fetch, filters)
                .await?;
            let exhausted = hits.len() < fetch;
            let below_cutoff = hits
                .last()
                .map_or(true, |h| h.similarity < self.retrieval.min_similarity);
            let best = best_chunk_per_document(hits, self.retrieval.min_similarity);
            if best.len() >= limit || exhausted || below_cutoff {
                break best;
            }
            debug!(fetch, documents = best.len(), "widening semantic candidate pool");
            fetch = fetch.saturating_mul(4);
        };

        let ids: Vec<DocumentId> = best.iter().map(|(id, _, _)| *id).collect();
        let mut summaries = self.store.document_summaries(&ids).await?;

        Ok(Ok(best
            .into_iter()
            .filter_map(|(id, score, snippet)| {
                summaries.remove(&id).map(|document| Candidate {
                    document,
                    raw_score: score,
                    snippet,
                })
            })
            .collect()))
    }
}

/// First hit per document above `min_similarity`. Hits arrive best-first,
/// so the first chunk seen is the document's best one.
fn best_chunk_per_document(
    hits: Vec<ChunkHit>,
    min_similarity: f32,
) -> Vec<(DocumentId, f64, String)> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| hit.similarity >= min_similarity)
        .filter(|hit| seen.insert(hit.document_id))
        .map(|hit| (hit.document_id, hit.similarity as f64, excerpt(&hit.text)))
        .collect()
}

fn keyword_results(candidates: Vec<Candidate>, top_k: usize) -> Vec<SearchHit> {
    candidates
        .into_iter()
        .take(top_k)
        .map(|c| to_hit(c.document, c.raw_score, Some(c.raw_score), None, c.snippet))
        .collect()
}

fn semantic_results(candidates: Vec<Candidate>, top_k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| to_hit(c.document, c.raw_score, None, Some(c.raw_score), c.snippet))
        .collect();
    sort_hits(&mut hits);
    hits.truncate(top_k);
    hits
}

fn to_hit(
    document: DocumentSummary,
    score: f64,
    keyword_score: Option<f64>,
    semantic_score: Option<f64>,
    snippet: String,
) -> SearchHit {
    SearchHit {
        document_id: document.id,
        filename: document.filename,
        timestamp: document.timestamp,
        score,
        keyword_score,
        semantic_score,
        snippet,
        word_count: document.word_count,
        classification: document.classification,
        summary: document.summary,
    }
}

// ============ Score normalization ============

/// Min-max normalize scores to [0, 1]. An all-equal list normalizes to 1.0.
fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

// ============ Hybrid merge ============

fn merge_candidates(
    keyword: &[Candidate],
    semantic: &[Candidate],
    keyword_weight: f64,
    semantic_weight: f64,
) -> Vec<SearchHit> {
    struct Merged<'a> {
        document: &'a DocumentSummary,
        keyword: Option<(f64, &'a str)>,
        semantic: Option<(f64, &'a str)>,
    }

    let mut merged: HashMap<DocumentId, Merged> = HashMap::new();
    for (c, norm) in normalize_scores(keyword) {
        merged
            .entry(c.document.id)
            .or_insert_with(|| Merged {
                document: &c.document,
                keyword: None,
                semantic: None,
            })
            .keyword = Some((norm, c.snippet.as_str()));
    }
    for (c, norm) in normalize_scores(semantic) {
        merged
            .entry(c.document.id)
            .or_insert_with(|| Merged {
                document: &c.document,
                keyword: None,
                semantic: None,
            })
            .semantic = Some((norm, c.snippet.as_str()));
    }

    let mut hits: Vec<SearchHit> = merged
        .into_values()
        .map(|m| {
            let k = m.keyword.map(|(s, _)| s).unwrap_or(0.0);
            let s = m.semantic.map(|(s, _)| s).unwrap_or(0.0);
            let snippet = match (m.keyword, m.semantic) {
                (Some((_, ks)), Some((_, ss))) => if s > k { ss } else { ks },
                (Some((_, ks)), None) => ks,
                (None, Some((_, ss))) => ss,
                (None, None) => "",
            };
            to_hit(
                m.document.clone(),
                keyword_weight * k + semantic_weight * s,
                m.keyword.map(|(s, _)| s),
                m.semantic.map(|(s, _)| s),
                snippet.to_string(),
            )
        })
        .collect();

    sort_hits(&mut hits);
    hits
}

/// Score desc, timestamp desc, id asc.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.timestamp.cmp(&a.timestamp))
            .then(a.document_id.cmp(&b.document_id))
    });
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}

// ============ CLI ============

/// Options shared by `recall search` and `recall export`.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub query: String,
    pub mode: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub classification: Option<String>,
    pub limit: Option<usize>,
}

/// Parse CLI arguments and run the query. Filter parse errors become
/// warnings on an empty response, matching engine behaviour.
pub async fn execute_query(engine: &HybridSearch, args: &QueryArgs) -> anyhow::Result<SearchResponse> {
    let mode: SearchMode = args.mode.parse()?;
    let top_k = args.limit.unwrap_or(engine.retrieval().final_limit);

    let filters = match SearchFilters::parse(
        args.from.as_deref(),
        args.to.as_deref(),
        args.classification.as_deref(),
    ) {
        Ok(f) => f,
        Err(RecallError::QueryFilter(msg)) => {
            let mut response = SearchResponse::empty(&args.query, mode, &SearchFilters::default());
            response.warnings.push(msg);
            return Ok(response);
        }
        Err(e) => return Err(e.into()),
    };

    Ok(engine.search(&args.query, mode, top_k, &filters).await?)
}

/// `recall search`
pub async fn run_search(config: &Config, args: &QueryArgs, json: bool) -> anyhow::Result<()> {
    let engine = HybridSearch::open(config).await?;
    let response = execute_query(&engine, args).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        for warning in &response.warnings {
            eprintln!("Warning: {}", warning);
        }
        print_results(&response);
    }

    engine.store().close().await;
    Ok(())
}

fn print_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, hit) in response.results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.filename);
        println!("    date: {}", hit.timestamp.format("%Y-%m-%d %H:%M"));
        if let Some(ref class) = hit.classification {
            println!("    classification: {}", class);
        }
        match (hit.keyword_score, hit.semantic_score) {
            (Some(k), Some(s)) => println!("    scores: keyword {:.2}, semantic {:.2}", k, s),
            (Some(k), None) if response.mode == SearchMode::Hybrid => {
                println!("    scores: keyword {:.2}", k)
            }
            (None, Some(s)) if response.mode == SearchMode::Hybrid => {
                println!("    scores: semantic {:.2}", s)
            }
            _ => {}
        }
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!("    id: {}", hit.document_id);
        println!();
    }

    if response.degraded {
        println!("(semantic search unavailable: keyword results only)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: DocumentId, ts: i64, score: f64) -> Candidate {
        Candidate {
            document: DocumentSummary {
                id,
                filename: format!("doc-{id}.txt"),
                timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
                word_count: 10,
                classification: None,
                summary: None,
            },
            raw_score: score,
            snippet: format!("snippet {id}"),
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<DocumentId> {
        hits.iter().map(|h| h.document_id).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![candidate(1, 0, 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            candidate(1, 0, 10.0),
            candidate(2, 0, 5.0),
            candidate(3, 0, 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![candidate(1, 0, 3.0), candidate(2, 0, 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            candidate(1, 0, -5.0),
            candidate(2, 0, 100.0),
            candidate(3, 0, 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    #[test]
    fn test_merge_missing_channel_scores_zero() {
        // Doc 1 keyword only, doc 2 semantic only.
        let kw = vec![candidate(1, 100, 8.0), candidate(3, 100, 2.0)];
        let sem = vec![candidate(2, 100, 0.9), candidate(3, 100, 0.3)];
        let hits = merge_candidates(&kw, &sem, 0.5, 0.5);

        let by_id: HashMap<DocumentId, &SearchHit> =
            hits.iter().map(|h| (h.document_id, h)).collect();
        assert_eq!(by_id[&1].semantic_score, None);
        assert!((by_id[&1].score - 0.5).abs() < 1e-9);
        assert_eq!(by_id[&2].keyword_score, None);
        assert!((by_id[&2].score - 0.5).abs() < 1e-9);
        assert!(by_id[&3].score.abs() < 1e-9);
    }

    #[test]
    fn test_merge_higher_single_channel_score_ranks_first() {
        // Keyword-only doc 1 normalizes to 1.0; semantic-only doc 2 to 0.6.
        let kw = vec![candidate(1, 100, 4.0), candidate(3, 100, 1.0)];
        let sem = vec![
            candidate(2, 100, 0.8),
            candidate(4, 100, 0.9),
            candidate(3, 100, 0.65),
        ];
        let hits = merge_candidates(&kw, &sem, 0.5, 0.5);
        let order = ids(&hits);
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(1) < pos(2), "order: {:?}", order);
    }

    #[test]
    fn test_merge_ties_break_by_recency_then_id() {
        let kw = vec![candidate(5, 100, 1.0), candidate(7, 300, 1.0)];
        let sem = vec![candidate(6, 300, 0.4)];
        let hits = merge_candidates(&kw, &sem, 0.5, 0.5);
        // All score 0.5: newest first, then lower id.
        assert_eq!(ids(&hits), vec![6, 7, 5]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let kw: Vec<Candidate> = (1..=20).map(|i| candidate(i, i * 10, (i % 7) as f64)).collect();
        let sem: Vec<Candidate> = (10..=30)
            .map(|i| candidate(i, i * 10, (i % 5) as f64 / 5.0))
            .collect();
        let first = ids(&merge_candidates(&kw, &sem, 0.5, 0.5));
        for _ in 0..10 {
            assert_eq!(ids(&merge_candidates(&kw, &sem, 0.5, 0.5)), first);
        }
    }

    #[test]
    fn test_keyword_weight_only_preserves_keyword_order() {
        let kw = vec![
            candidate(1, 0, 10.0),
            candidate(2, 0, 5.0),
            candidate(3, 0, 1.0),
        ];
        let sem = vec![candidate(1, 0, 0.1), candidate(3, 0, 0.9)];
        let hits = merge_candidates(&kw, &sem, 1.0, 0.0);
        assert_eq!(ids(&hits), vec![1, 2, 3]);
    }

    #[test]
    fn test_snippet_prefers_stronger_channel() {
        let kw = vec![candidate(1, 0, 1.0), candidate(2, 0, 9.0)];
        let mut sem = vec![candidate(1, 0, 0.9)];
        sem[0].snippet = "semantic chunk".to_string();
        let hits = merge_candidates(&kw, &sem, 0.5, 0.5);
        let doc1 = hits.iter().find(|h| h.document_id == 1).unwrap();
        // Keyword normalized 0.0 < semantic 1.0.
        assert_eq!(doc1.snippet, "semantic chunk");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(500);
        let e = excerpt(&text);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), SNIPPET_CHARS + 3);
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
