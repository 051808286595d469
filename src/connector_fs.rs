//! Filesystem source for transcripts and notes.
//!
//! Walks a root directory, applying include/exclude globs to paths
//! relative to the root. Each matching file becomes a [`SourceItem`] keyed
//! by that relative path.
//!
//! # Transcript header
//!
//! The first ten lines may carry a header closed by a `---` line:
//!
//! ```text
//! Generated: 2025-07-30 09:15:00
//! Engine: whisper.cpp
//! ---
//! transcript text...
//! ```
//!
//! The header is stripped from the indexed content.
//!
//! # Timestamps
//!
//! Header `Generated:` wins, then the nearest ancestor directory named
//! `YYYY-MM-DD`, then the file's modification time.
//!
//! # Analysis sidecars
//!
//! `<stem>.analysis.md` or `<stem>_analysis.md` in the same or parent
//! directory supplies classification, summary, tags and action items.
//! Sidecars are never indexed on their own.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexerConfig;
use crate::error::{RecallError, Result};
use crate::filters::day_start;
use crate::indexer::SourceError;
use crate::models::{DocumentMeta, SourceItem};

const HEADER_LINES: usize = 10;
const SIDECAR_SUFFIXES: [&str; 2] = [".analysis.md", "_analysis.md"];

pub struct FilesystemSource {
    root: PathBuf,
    files: Vec<(PathBuf, String)>,
    walk_errors: Vec<SourceError>,
    sidecars: bool,
}

impl FilesystemSource {
    /// Discover matching files under `root`. Discovery is eager and sorted
    /// by relative path; reading happens lazily in [`items`](Self::items).
    pub fn new(root: impl AsRef<Path>, config: &IndexerConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RecallError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source directory does not exist: {}", root.display()),
            )));
        }

        let include_set = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut files = Vec::new();
        let mut walk_errors = Vec::new();
        for entry in WalkDir::new(&root).follow_links(config.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let key = e
                        .path()
                        .map(|p| relative_key(p.strip_prefix(&root).unwrap_or(p)))
                        .unwrap_or_else(|| root.display().to_string());
                    warn!(path = %key, error = %e, "skipping unreadable entry");
                    walk_errors.push(SourceError::new(key, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let rel_str = relative_key(relative);

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            if is_sidecar(&rel_str) {
                continue;
            }
            files.push((path.to_path_buf(), rel_str));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));
        debug!(
            root = %root.display(),
            files = files.len(),
            errors = walk_errors.len(),
            "discovered files"
        );

        Ok(Self {
            root,
            files,
            walk_errors,
            sidecars: config.analysis_sidecars,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read each discovered file. Entries the walk could not visit,
    /// unreadable files and invalid UTF-8 are per-item errors.
    pub fn items(&self) -> impl Iterator<Item = std::result::Result<SourceItem, SourceError>> + '_ {
        self.walk_errors.iter().cloned().map(Err::<SourceItem, SourceError>).chain(
            self.files
                .iter()
                .map(|(path, key)| self.read_item(path, key)),
        )
    }

    fn read_item(&self, path: &Path, key: &str) -> std::result::Result<SourceItem, SourceError> {
        let bytes = std::fs::read(path).map_err(|e| SourceError::new(key, e.to_string()))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| SourceError::new(key, "file is not valid UTF-8"))?;

        let header = parse_header(&raw);

        let timestamp = match header.generated {
            Some(ts) => ts,
            None => match date_from_path(path) {
                Some(ts) => ts,
                None => modified_time(path).map_err(|e| SourceError::new(key, e.to_string()))?,
            },
        };

        let mut meta = if self.sidecars {
            match find_sidecar(&self.root, path) {
                Some(sidecar) => {
                    let text = std::fs::read_to_string(&sidecar).map_err(|e| {
                        SourceError::new(key, format!("analysis {}: {e}", sidecar.display()))
                    })?;
                    parse_analysis(&text)
                }
                None => DocumentMeta::default(),
            }
        } else {
            DocumentMeta::default()
        };
        meta.engine = header.engine;

        Ok(SourceItem::new(key, header.body, timestamp).with_meta(meta))
    }
}

/// Parsed transcript header plus the remaining content.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptHeader {
    pub generated: Option<DateTime<Utc>>,
    pub engine: Option<String>,
    pub body: String,
}

/// Split off a leading header. Without a `---` line in the first ten
/// lines the whole text is body.
pub fn parse_header(raw: &str) -> TranscriptHeader {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(sep) = lines
        .iter()
        .take(HEADER_LINES)
        .position(|l| l.trim_start().starts_with("---"))
    else {
        return TranscriptHeader {
            generated: None,
            engine: None,
            body: raw.to_string(),
        };
    };

    let mut generated = None;
    let mut engine = None;
    for line in &lines[..sep] {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Generated:") {
            generated = parse_timestamp(value.trim());
        } else if let Some(value) = line.strip_prefix("Engine:") {
            let value = value.trim();
            if !value.is_empty() {
                engine = Some(value.to_string());
            }
        }
    }

    TranscriptHeader {
        generated,
        engine,
        body: lines[sep + 1..].join("\n").trim().to_string(),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(day_start)
}

/// Parse an analysis markdown file into document metadata.
///
/// Recognized: `**Mode:**`, `**Model:**`, and `## ` sections named
/// Summary, Action Items, Tags/Categories, Classification/Type/Category.
pub fn parse_analysis(text: &str) -> DocumentMeta {
    let mut meta = DocumentMeta::default();
    let mut section: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("**Mode:**") {
            meta.analysis_mode = non_empty(value);
        } else if let Some(value) = line.strip_prefix("**Model:**") {
            meta.analysis_model = non_empty(value);
        } else if let Some(title) = line.strip_prefix("## ") {
            if let Some(ref name) = section {
                apply_section(&mut meta, name, &body);
            }
            section = Some(title.trim().to_lowercase());
            body.clear();
        } else if !line.is_empty() && section.is_some() {
            body.push(line);
        }
    }
    if let Some(ref name) = section {
        apply_section(&mut meta, name, &body);
    }
    meta
}

fn apply_section(meta: &mut DocumentMeta, name: &str, lines: &[&str]) {
    if lines.is_empty() {
        return;
    }
    match name {
        "summary" => meta.summary = Some(lines.join(" ")),
        "action items" => {
            meta.action_items = lines
                .iter()
                .map(|l| strip_list_marker(l))
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
        }
        "tags" | "categories" => {
            meta.tags = lines
                .iter()
                .flat_map(|l| strip_list_marker(l).split([',', ';']))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        "classification" | "type" | "category" => {
            meta.classification = non_empty(strip_list_marker(lines[0]));
        }
        _ => {}
    }
}

/// Remove a leading `- `, `* `, `• ` or `1. ` marker.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix('.') {
            return rest.trim();
        }
    }
    line
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_sidecar(key: &str) -> bool {
    SIDECAR_SUFFIXES.iter().any(|s| key.ends_with(s))
}

fn find_sidecar(root: &Path, path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy();
    let stem: &str = &stem;
    let dir = path.parent()?;
    let mut dirs = vec![dir];
    if let Some(parent) = dir.parent() {
        if parent.starts_with(root) {
            dirs.push(parent);
        }
    }

    dirs.into_iter()
        .flat_map(|d| SIDECAR_SUFFIXES.iter().map(move |s| d.join(format!("{stem}{s}"))))
        .find(|candidate| candidate.is_file())
}

/// Midnight UTC of the nearest ancestor directory named `YYYY-MM-DD`.
fn date_from_path(path: &Path) -> Option<DateTime<Utc>> {
    path.ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name())
        .find_map(|name| NaiveDate::parse_from_str(&name.to_string_lossy(), "%Y-%m-%d").ok())
        .map(day_start)
}

fn modified_time(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(std::fs::metadata(path)?.modified()?))
}

fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RecallError::Config(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RecallError::Config(format!("invalid glob set: {e}")))
}
