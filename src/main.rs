//! # Manual RAG CLI (`mrag`)
//!
//! Builds a hybrid index from a manual and answers questions against it.
//!
//! ## Usage
//!
//! ```bash
//! mrag --config ./config/mrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mrag build --input <pdf\|txt>` | Extract, chunk, (summarize,) embed and save an index |
//! | `mrag search "<query>"` | Print the packed chunks for a query |
//! | `mrag ask "<query>"` | Generate a cited answer |
//! | `mrag ask --interactive` | Ask questions line by line |
//! | `mrag inspect` | Print index statistics |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use manual_rag::config::{self, Config};
use manual_rag::embedding::create_embedder;
use manual_rag::generate::create_generator;
use manual_rag::index::load_index;
use manual_rag::progress::ProgressMode;
use manual_rag::search::{self, QueryEngine};
use manual_rag::{ingest, logging, stats};

const DEFAULT_CONFIG: &str = "./config/mrag.toml";
const DEFAULT_INDEX: &str = "./index";

/// Manual RAG — hybrid retrieval and cited answers over user manuals.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the default path does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "mrag",
    about = "Manual RAG — hybrid retrieval and cited answers over user manuals",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a PDF or a form-feed separated text export.
    ///
    /// Rebuilds from scratch; an existing index at the output path is
    /// replaced only once the new one is completely written.
    Build {
        /// Source document (`.pdf`, or `.txt` with `\f` page breaks).
        #[arg(long)]
        input: PathBuf,

        /// Index directory.
        #[arg(long, default_value = DEFAULT_INDEX)]
        output: PathBuf,

        /// Generate chunk and section summaries to enrich indexing text.
        #[arg(long)]
        summaries: bool,

        /// Number of leading table-of-contents pages.
        #[arg(long)]
        toc_pages: Option<usize>,

        /// Regex for running footers/headers to strip from every page.
        #[arg(long)]
        footer_regex: Option<String>,

        /// Progress output on stderr (default: human when stderr is a TTY, else off).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the packed chunks for a query, with citations.
    Search {
        query: String,

        #[arg(long, default_value = DEFAULT_INDEX)]
        index: PathBuf,
    },

    /// Answer a question from the manual, citing sources.
    Ask {
        /// The question. Omit with --interactive.
        query: Option<String>,

        #[arg(long, default_value = DEFAULT_INDEX)]
        index: PathBuf,

        /// Read questions from stdin, one per line.
        #[arg(long, conflicts_with = "query")]
        interactive: bool,
    },

    /// Print statistics for an index.
    Inspect {
        #[arg(long, default_value = DEFAULT_INDEX)]
        index: PathBuf,
    },
}

/// Explicit paths must exist; the default path falls back to defaults.
fn resolve_config(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn open_engine(cfg: &Config, dir: &Path) -> Result<QueryEngine> {
    let embedder = create_embedder(&cfg.embedding)?;
    let index = load_index(dir, embedder)?;
    let generator = create_generator(&cfg.generation)?;
    QueryEngine::from_index(Arc::new(index), generator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            input,
            output,
            summaries,
            toc_pages,
            footer_regex,
            progress,
        } => {
            if let Some(n) = toc_pages {
                cfg.chunking.toc_pages = n;
            }
            if footer_regex.is_some() {
                cfg.chunking.footer_regex = footer_regex;
            }
            cfg.validate()?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            ingest::run_build(&cfg, &input, &output, summaries, reporter.as_ref()).await?;
        }
        Commands::Search { query, index } => {
            let engine = open_engine(&cfg, &index)?;
            search::run_search(&engine, &query).await?;
        }
        Commands::Ask {
            query,
            index,
            interactive,
        } => {
            let engine = open_engine(&cfg, &index)?;
            match (query, interactive) {
                (_, true) => search::run_interactive(&engine).await?,
                (Some(q), false) => search::run_ask(&engine, &q).await?,
                (None, false) => bail!("Provide a question or use --interactive"),
            }
        }
        Commands::Inspect { index } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let loaded = load_index(&index, embedder)?;
            stats::run_inspect(&loaded, &index)?;
        }
    }

    Ok(())
}
