//! # Paper Index CLI (`paperx`)
//!
//! Maintenance interface for a paper index: initialize the database,
//! ingest cleaned papers, re-index or remove them, and run ad-hoc queries.
//!
//! ## Usage
//!
//! ```bash
//! paperx --config ./config/paperx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `paperx init` | Create the SQLite database and run schema migrations |
//! | `paperx ingest <file>...` | Index papers from JSON files |
//! | `paperx reindex <id>` | Re-chunk and re-embed one paper |
//! | `paperx reindex --all` | Re-index every live paper |
//! | `paperx delete <id>` | Remove a paper and its chunks |
//! | `paperx search "<query>"` | Ranked chunks for a query |
//! | `paperx context "<query>"` | Prompt-ready context block |
//! | `paperx status <id>` | Show one paper's indexing state |
//! | `paperx papers` | List registered papers |
//! | `paperx stats` | Index summary |
//!
//! Logs go to stderr; `RUST_LOG` overrides `[logging].level`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paper_index::config::{self, Config};
use paper_index::{index, papers, search, stats};

/// Paper Index CLI: chunk, embed, and retrieve research papers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "paperx",
    about = "Paper Index: retrieval-augmented context for research papers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/paperx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Does not contact the embedding provider.
    Init,

    /// Index papers from JSON files.
    Ingest {
        /// One JSON file per paper.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override `[ingestion].workers` for this run.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Re-chunk and re-embed a paper, or every paper with `--all`.
    ///
    /// The previous chunks stay searchable until the new set is written.
    Reindex {
        /// Paper id.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Replace the stored text with the contents of this file.
        #[arg(long, conflicts_with = "all")]
        text_file: Option<PathBuf>,

        /// Re-index every live paper.
        #[arg(long)]
        all: bool,

        /// With `--all`: clear the collection first (needed after a model
        /// change alters the vector dimension).
        #[arg(long, requires = "all")]
        rebuild: bool,
    },

    /// Remove a paper's chunks and mark it removed.
    Delete {
        /// Paper id.
        id: String,
    },

    /// Search indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to one paper.
        #[arg(long)]
        paper: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the bundle as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print prompt-ready context for a query.
    Context {
        query: String,

        #[arg(long)]
        paper: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one paper's indexing state.
    Status {
        /// Paper id.
        id: String,
    },

    /// List registered papers.
    Papers {
        /// Include removed papers.
        #[arg(long)]
        all: bool,
    },

    /// Show index statistics.
    Stats,
}

fn init_tracing(config: Option<&Config>) {
    let default_level = config
        .map(|c| c.logging.level.as_str())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(None);
            return Err(e);
        }
    };
    init_tracing(Some(&cfg));

    match cli.command {
        Commands::Init => {
            index::init(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { files, workers } => {
            papers::run_ingest(&cfg, &files, workers).await?;
        }
        Commands::Reindex {
            id,
            text_file,
            all,
            rebuild,
        } => match id {
            Some(id) if !all => papers::run_reindex(&cfg, &id, text_file).await?,
            _ => papers::run_reindex_all(&cfg, rebuild).await?,
        },
        Commands::Delete { id } => {
            papers::run_delete(&cfg, &id).await?;
        }
        Commands::Search {
            query,
            paper,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, paper, limit, json).await?;
        }
        Commands::Context {
            query,
            paper,
            limit,
        } => {
            search::run_context(&cfg, &query, paper, limit).await?;
        }
        Commands::Status { id } => {
            papers::run_status(&cfg, &id).await?;
        }
        Commands::Papers { all } => {
            papers::run_papers(&cfg, all).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
