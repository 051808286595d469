//! Render search results as JSON, CSV, or Markdown.
//!
//! [`render`] is a pure function over a [`SearchResponse`]; `recall export`
//! runs a query and writes the rendered text to a file or stdout.

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;

use crate::config::Config;
use crate::error::RecallError;
use crate::search::{execute_query, HybridSearch, QueryArgs, SearchResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = RecallError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(RecallError::Config(format!(
                "unknown export format '{other}'; use json, csv, or markdown"
            ))),
        }
    }
}

const CSV_HEADER: [&str; 9] = [
    "document_id",
    "filename",
    "date",
    "timestamp",
    "score",
    "mode",
    "classification",
    "summary",
    "snippet",
];

pub fn render(response: &SearchResponse, format: ExportFormat) -> crate::Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(response)?),
        ExportFormat::Csv => Ok(render_csv(response)),
        ExportFormat::Markdown => Ok(render_markdown(response)),
    }
}

fn render_csv(response: &SearchResponse) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push_str("\r\n");

    let mode = response.effective_mode.to_string();
    for hit in &response.results {
        let fields = [
            hit.document_id.to_string(),
            hit.filename.clone(),
            hit.timestamp.format("%Y-%m-%d").to_string(),
            hit.timestamp.to_rfc3339(),
            format!("{:.4}", hit.score),
            mode.clone(),
            hit.classification.clone().unwrap_or_default(),
            hit.summary.clone().unwrap_or_default(),
            hit.snippet.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Quote a field when it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_markdown(response: &SearchResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Search Results");
    let _ = writeln!(out);
    let _ = writeln!(out, "**Query:** {}", response.query);
    let _ = writeln!(out, "**Mode:** {}", response.effective_mode);
    let _ = writeln!(out, "**Results:** {}", response.results.len());
    if response.degraded {
        let _ = writeln!(out, "**Note:** semantic search was unavailable");
    }
    let _ = writeln!(out);

    for (i, hit) in response.results.iter().enumerate() {
        let _ = writeln!(out, "## {}. {}", i + 1, hit.filename);
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Date:** {}", hit.timestamp.format("%Y-%m-%d %H:%M"));
        let _ = writeln!(out, "- **Score:** {:.3}", hit.score);
        let _ = writeln!(out, "- **Mode:** {}", response.effective_mode);
        if let Some(ref class) = hit.classification {
            let _ = writeln!(out, "- **Classification:** {}", class);
        }
        if let Some(ref summary) = hit.summary {
            let _ = writeln!(out);
            let _ = writeln!(out, "**Summary:** {}", summary);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "> {}", hit.snippet.replace('\n', " ").trim());
        let _ = writeln!(out);
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
    }
    out
}

/// `recall export <query> --format <fmt> [--output PATH]`
///
/// Writes to `output` when given, otherwise to stdout for piping.
pub async fn run_export(
    config: &Config,
    args: &QueryArgs,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let engine = HybridSearch::open(config).await?;
    let response = execute_query(&engine, args).await?;
    for warning in &response.warnings {
        eprintln!("Warning: {}", warning);
    }

    let text = render(&response, format)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &text)?;
            eprintln!(
                "Exported {} results to {}",
                response.results.len(),
                path.display()
            );
        }
        None => print!("{}", text),
    }

    engine.store().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::SearchFilters;
    use crate::search::{SearchHit, SearchMode};
    use chrono::{TimeZone, Utc};

    fn response() -> SearchResponse {
        SearchResponse {
            query: "launch".to_string(),
            mode: SearchMode::Hybrid,
            effective_mode: SearchMode::Hybrid,
            degraded: false,
            warnings: Vec::new(),
            filters: SearchFilters::default(),
            results: vec![SearchHit {
                document_id: 7,
                filename: "2025-07-30/standup.txt".to_string(),
                timestamp: Utc.with_ymd_and_hms(2025, 7, 30, 9, 15, 0).unwrap(),
                score: 0.75,
                keyword_score: Some(1.0),
                semantic_score: Some(0.5),
                snippet: "We decided to \"delay\" the launch,\nagain".to_string(),
                word_count: 9,
                classification: Some("meeting".to_string()),
                summary: None,
            }],
        }
    }

    #[test]
    fn test_csv_quotes_per_rfc4180() {
        let csv = render(&response(), ExportFormat::Csv).unwrap();
        let mut lines = csv.split("\r\n");
        assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,2025-07-30/standup.txt,2025-07-30,"));
        assert!(row.contains(",0.7500,hybrid,meeting,,"));
        assert!(csv.contains("\"We decided to \"\"delay\"\" the launch,\nagain\""));
    }

    #[test]
    fn test_csv_plain_fields_unquoted() {
        assert_eq!(csv_field("meeting"), "meeting");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field(""), "");
    }

    #[test]
    fn test_markdown_numbered_sections() {
        let md = render(&response(), ExportFormat::Markdown).unwrap();
        assert!(md.starts_with("# Search Results\n"));
        assert!(md.contains("## 1. 2025-07-30/standup.txt"));
        assert!(md.contains("- **Date:** 2025-07-30 09:15"));
        assert!(md.contains("- **Score:** 0.750"));
        assert!(md.contains("---"));
    }

    #[test]
    fn test_json_round_trips_through_serde() {
        let json = render(&response(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mode"], "hybrid");
        assert_eq!(value["results"][0]["document_id"], 7);
        assert!(value.get("filters").is_none());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
