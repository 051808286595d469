//! # Recall CLI (`recall`)
//!
//! Index a folder of transcripts and notes, then search it by keyword,
//! meaning, or both.
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall index <path>` | Index a directory, then embed new chunks |
//! | `recall search "<query>"` | Search indexed documents |
//! | `recall reembed` | Embed chunks that have no vector yet |
//! | `recall get <id>` | Print a document with its chunks |
//! | `recall delete <id>` | Remove a document |
//! | `recall stats` | Index statistics |
//! | `recall timeline` | Documents per day |
//! | `recall export "<query>"` | Write search results as JSON, CSV, or Markdown |
//! | `recall check` | Verify the keyword index and vectors |
//! | `recall rebuild-index` | Rebuild the keyword index |
//! | `recall watch <path>` | Re-index periodically until Ctrl-C |
//!
//! Logs go to stderr. Set `RECALL_LOG` (e.g. `RECALL_LOG=recall_harness=debug`)
//! or pass `-v`/`-vv`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recall_harness::config::{self, Config};
use recall_harness::indexer::{index_once, run_index};
use recall_harness::scheduler::{CancelToken, Scheduler};
use recall_harness::search::{run_search, QueryArgs};
use recall_harness::store::DocumentStore;
use recall_harness::{export, get, stats, timeline, vectors};

/// Recall: hybrid keyword and semantic search over your transcripts and
/// notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Hybrid keyword and semantic search over local transcripts and notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). Overridden by RECALL_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Query options shared by `search` and `export`.
#[derive(Args)]
struct QueryOpts {
    /// The search query string.
    query: String,

    /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`
    /// (weighted merge). Hybrid falls back to keyword results when the
    /// embedding provider is unavailable.
    #[arg(long, default_value = "hybrid")]
    mode: String,

    /// Only documents on or after this date (YYYY-MM-DD).
    #[arg(long)]
    from: Option<String>,

    /// Only documents on or before this date (YYYY-MM-DD).
    #[arg(long)]
    to: Option<String>,

    /// Only documents with this classification.
    #[arg(long)]
    classification: Option<String>,

    /// Maximum number of results. Defaults to `retrieval.final_limit`.
    #[arg(long)]
    limit: Option<usize>,
}

impl From<QueryOpts> for QueryArgs {
    fn from(opts: QueryOpts) -> Self {
        QueryArgs {
            query: opts.query,
            mode: opts.mode,
            from: opts.from,
            to: opts.to,
            classification: opts.classification,
            limit: opts.limit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a directory of transcripts and notes.
    ///
    /// Unchanged files are skipped by content fingerprint. When an
    /// embedding provider is configured, new chunks are embedded afterwards.
    Index {
        /// Directory to index.
        path: PathBuf,

        /// Skip the embedding pass.
        #[arg(long)]
        no_embed: bool,
    },

    /// Search indexed documents.
    Search {
        #[command(flatten)]
        query: QueryOpts,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate embeddings for chunks that lack one.
    Reembed {
        /// Regenerate every chunk's embedding.
        #[arg(long)]
        force: bool,
    },

    /// Print a document, its metadata, and its chunks.
    Get {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Delete a document with its chunks and embeddings.
    Delete { id: i64 },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Documents per day.
    Timeline {
        /// First day (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Days back from today when no dates are given.
        #[arg(long, default_value_t = 30)]
        days: u32,

        #[arg(long)]
        json: bool,
    },

    /// Run a search and write the results as JSON, CSV, or Markdown.
    Export {
        #[command(flatten)]
        query: QueryOpts,

        /// Output format: `json`, `csv`, or `markdown`.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Verify that the keyword index and vectors match the documents.
    Check,

    /// Rebuild the keyword index from stored documents.
    RebuildIndex,

    /// Re-index a directory on an interval until Ctrl-C.
    Watch {
        path: PathBuf,

        /// Seconds between runs.
        #[arg(long, default_value_t = 300)]
        interval: u64,

        /// Skip embedding passes.
        #[arg(long)]
        no_embed: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_env("RECALL_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = DocumentStore::open(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { path, no_embed } => {
            run_index(&cfg, &path, no_embed).await?;
        }
        Commands::Search { query, json } => {
            run_search(&cfg, &query.into(), json).await?;
        }
        Commands::Reembed { force } => {
            vectors::run_reembed(&cfg, force).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, id, json).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, id).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Timeline {
            from,
            to,
            days,
            json,
        } => {
            timeline::run_timeline(&cfg, from.as_deref(), to.as_deref(), days, json).await?;
        }
        Commands::Export {
            query,
            format,
            output,
        } => {
            export::run_export(&cfg, &query.into(), &format, output.as_deref()).await?;
        }
        Commands::Check => {
            let store = DocumentStore::open(&cfg).await?;
            let result = store.check_integrity().await;
            store.close().await;
            result.context("integrity check failed; run `recall rebuild-index`")?;
            println!("ok");
        }
        Commands::RebuildIndex => {
            let store = DocumentStore::open(&cfg).await?;
            let result = store.rebuild_index().await;
            store.close().await;
            result?;
            println!("Keyword index rebuilt.");
        }
        Commands::Watch {
            path,
            interval,
            no_embed,
        } => {
            run_watch(&cfg, path, interval, !no_embed).await?;
        }
    }

    Ok(())
}

async fn run_watch(cfg: &Config, path: PathBuf, interval: u64, embed: bool) -> anyhow::Result<()> {
    if interval == 0 {
        anyhow::bail!("--interval must be at least 1 second");
    }
    let store = DocumentStore::open(cfg).await?;
    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();

    let scheduler = Scheduler::new(Duration::from_secs(interval), cancel.clone());
    let runs = scheduler
        .run(|_| index_once(cfg, &store, &path, embed, &cancel))
        .await;

    store.close().await;
    eprintln!("watch stopped after {} runs", runs);
    Ok(())
}
