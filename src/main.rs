//! # Knowledge RAG CLI (`krag`)
//!
//! The `krag` binary manages the uploads directory and vector index and
//! answers questions from them.
//!
//! ## Usage
//!
//! ```bash
//! krag --config ./config/krag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `krag init` | Create the index and uploads directories |
//! | `krag add <file> --title <t>` | Copy a file into uploads and index it |
//! | `krag rebuild` | Discard the index and re-index every upload |
//! | `krag search "<query>"` | Print the nearest chunks |
//! | `krag ask "<query>"` | Answer from the nearest chunks |
//! | `krag stats` | Summarise the index and uploads |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `warn`, e.g. `RUST_LOG=knowledge_rag=debug`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use knowledge_rag::config::{self, Config};
use knowledge_rag::ingest::DocumentOutcome;
use knowledge_rag::knowledge::KnowledgeBase;
use knowledge_rag::search;
use knowledge_rag::sources::{split_tags, NewUpload};
use knowledge_rag::stats;
use knowledge_rag::store::VectorIndexStore;

/// Knowledge RAG CLI: retrieval-augmented answers over your uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/krag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "krag",
    about = "Knowledge RAG: retrieval-augmented answers over uploaded documents",
    version,
    long_about = "Knowledge RAG chunks and embeds documents from an uploads directory into a \
    persistent vector index, then answers questions by retrieving the closest chunks and \
    handing them to a text generation model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/krag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and uploads directories.
    ///
    /// Writes an empty index generation if none exists. Safe to run twice.
    Init,

    /// Copy a file into the uploads directory and index it.
    Add {
        /// File to upload (read as UTF-8 text).
        file: PathBuf,

        /// Title shown as the source of retrieved snippets.
        #[arg(long)]
        title: String,

        #[arg(long)]
        author: Option<String>,

        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Discard the index and re-index every upload.
    ///
    /// Skips empty or very short documents and extraction-error placeholders.
    Rebuild,

    /// Print the chunks nearest to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to retrieval.top_k).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question from the nearest chunks.
    Ask {
        query: String,

        /// Number of chunks to ground the answer on (defaults to retrieval.top_k).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show index and uploads statistics.
    Stats,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(cfg: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cfg.documents.uploads_dir)?;
    let store = VectorIndexStore::load(&cfg.index.dir)?;
    if store.stats().generation == 0 {
        std::fs::create_dir_all(&cfg.index.dir)?;
        store.reset()?;
    }
    println!("Index initialized at {}", cfg.index.dir.display());
    println!("Uploads directory: {}", cfg.documents.uploads_dir.display());
    Ok(())
}

async fn run_rebuild(cfg: &Config) -> anyhow::Result<()> {
    search::require_embeddings(cfg, "rebuild")?;
    let kb = KnowledgeBase::open_for_rebuild(cfg)?;
    let report = kb.rebuild_index().await?;

    for outcome in &report.outcomes {
        match outcome {
            DocumentOutcome::Indexed(r) => println!("  indexed  {}: {}", r.title, r),
            DocumentOutcome::Skipped { title, reason, .. } => {
                println!("  skipped  {}: {}", title, reason)
            }
            DocumentOutcome::Failed { title, error, .. } => {
                println!("  failed   {}: {}", title, error)
            }
        }
    }
    println!("rebuild");
    println!("  documents indexed: {}", report.indexed());
    println!("  documents skipped: {}", report.skipped());
    println!("  documents failed: {}", report.failed());
    println!("  chunks indexed: {}", report.chunks_indexed());
    println!("ok");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg)?,
        Commands::Add {
            file,
            title,
            author,
            tags,
            category,
            description,
        } => {
            search::require_embeddings(&cfg, "add")?;
            let kb = KnowledgeBase::open(&cfg)?;
            let upload = NewUpload {
                title,
                author,
                tags: tags.as_deref().map(split_tags).unwrap_or_default(),
                category,
                description,
            };
            let report = kb.add_upload(&file, upload).await?;
            println!("add {}", file.display());
            println!("  {}", report);
            if !report.failed_chunks.is_empty() {
                println!("  failed chunks: {:?}", report.failed_chunks);
            }
            println!("ok");
        }
        Commands::Rebuild => run_rebuild(&cfg).await?,
        Commands::Search { query, k } => search::run_search(&cfg, &query, k).await?,
        Commands::Ask { query, k } => search::run_ask(&cfg, &query, k).await?,
        Commands::Stats => stats::run_stats(&cfg)?,
    }

    Ok(())
}
