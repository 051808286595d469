//! Per-day activity over the indexed corpus.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::filters::SearchFilters;
use crate::models::DocumentSummary;
use crate::store::DocumentStore;

/// One UTC calendar day with at least one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineDay {
    pub date: NaiveDate,
    pub document_count: u64,
    pub word_count: i64,
    pub classifications: Vec<String>,
}

/// Group documents by UTC day, oldest first.
pub fn aggregate(documents: &[DocumentSummary]) -> Vec<TimelineDay> {
    let mut days: BTreeMap<NaiveDate, (u64, i64, BTreeSet<String>)> = BTreeMap::new();
    for doc in documents {
        let entry = days.entry(doc.timestamp.date_naive()).or_default();
        entry.0 += 1;
        entry.1 += doc.word_count;
        if let Some(ref class) = doc.classification {
            entry.2.insert(class.clone());
        }
    }

    days.into_iter()
        .map(|(date, (document_count, word_count, classes))| TimelineDay {
            date,
            document_count,
            word_count,
            classifications: classes.into_iter().collect(),
        })
        .collect()
}

/// Timeline for an inclusive date range; either bound may be open.
pub async fn timeline(
    store: &DocumentStore,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> crate::Result<Vec<TimelineDay>> {
    let filters = SearchFilters {
        from,
        to,
        classification: None,
    };
    let documents = store.list_documents(&filters).await?;
    Ok(aggregate(&documents))
}

/// `recall timeline [--from DATE] [--to DATE] [--days N]`
///
/// Without explicit dates, covers the last `days` days including today.
pub async fn run_timeline(
    config: &Config,
    from: Option<&str>,
    to: Option<&str>,
    days: u32,
    json: bool,
) -> Result<()> {
    let mut filters = SearchFilters::parse(from, to, None)?;
    if filters.from.is_none() && filters.to.is_none() {
        let today = Utc::now().date_naive();
        filters.from = Some(today - Duration::days(i64::from(days.saturating_sub(1))));
        filters.to = Some(today);
    }

    let store = DocumentStore::open(config).await?;
    let days = timeline(&store, filters.from, filters.to).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&days)?);
        return Ok(());
    }

    if days.is_empty() {
        println!("No documents in range.");
        return Ok(());
    }

    println!("  {:<12} {:>6} {:>8}   {}", "DATE", "DOCS", "WORDS", "CLASSIFICATIONS");
    println!("  {}", "-".repeat(60));
    for day in &days {
        println!(
            "  {:<12} {:>6} {:>8}   {}",
            day.date.to_string(),
            day.document_count,
            day.word_count,
            day.classifications.join(", ")
        );
    }
    Ok(())
}
