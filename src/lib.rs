//! # Recall Harness
//!
//! A local-first retrieval engine for personal transcripts and notes.
//!
//! Documents are stored in SQLite with an FTS5 keyword index, split into
//! overlapping character windows, and embedded lazily by a pluggable
//! provider. Queries run in keyword, semantic, or hybrid mode; hybrid
//! merges both rankings and falls back to keyword results when the
//! embedding provider is unreachable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Filesystem  │──▶│ BatchIndexer │──▶│ DocumentStore│
//! │   source    │   │              │   │ SQLite+FTS5  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                   ┌──────────────┐          │
//!                   │EmbeddingStore│◀─────────┤
//!                   │ worker pool  │          │
//!                   └──────┬───────┘          ▼
//!                          │          ┌──────────────┐
//!                          └─────────▶│ HybridSearch │
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init
//! recall index ~/Meeting\ Notes
//! recall search "budget planning" --mode hybrid --from 2025-07-01
//! recall export "launch" --format markdown --output launch.md
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`store`] | Document store, ingest, integrity check |
//! | [`keyword`] | FTS5 keyword search |
//! | [`chunk`] | Character-window chunking |
//! | [`embedding`] | Embedding types and providers |
//! | [`vectors`] | Embedding generation, storage, similarity search |
//! | [`search`] | Keyword, semantic, and hybrid query engine |
//! | [`indexer`] | Batch indexing |
//! | [`connector_fs`] | Filesystem source with header and sidecar parsing |
//! | [`timeline`] | Per-day activity view |
//! | [`export`] | JSON, CSV, and Markdown rendering |
//! | [`stats`] | Index statistics |
//! | [`scheduler`] | Cancellation and periodic runs |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod filters;
pub mod get;
pub mod indexer;
pub mod keyword;
pub mod migrate;
pub mod models;
pub mod scheduler;
pub mod search;
pub mod stats;
pub mod store;
pub mod timeline;
pub mod vectors;

pub use error::{EmbeddingError, RecallError, Result};
