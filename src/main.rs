//! # Grounding CLI (`grd`)
//!
//! Commands for building and querying the knowledge-grounding indices.
//!
//! ```bash
//! grd ingest                          # ingest all configured sources
//! grd ingest ./docs ./handbook.pdf    # ingest specific paths
//! grd search "deployment checklist"   # query the persisted indices
//! grd sources                         # show per-source index status
//! ```
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file; see `config/grd.example.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use grounding::config;
use grounding::embedding;
use grounding::ingest;
use grounding::retrieval::RetrievalService;
use grounding::store::EmbeddingStore;

/// Grounding — a mode-aware chunking, embedding, and similarity-retrieval
/// engine for conversational agents.
#[derive(Parser)]
#[command(
    name = "grd",
    about = "Grounding — chunk, embed, and retrieve documents for conversational agents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest sources into their persisted indices.
    ///
    /// Walks each source (file or directory tree), chunks every supported
    /// file per its inferred mode, embeds new chunks, and persists one
    /// index per source. Re-running is idempotent: already-indexed chunks
    /// are skipped by fingerprint.
    Ingest {
        /// Source paths to ingest instead of the configured ones.
        sources: Vec<PathBuf>,
    },

    /// Search the persisted indices for passages similar to the query.
    ///
    /// Loads every configured source's index, embeds the query, and
    /// merge-ranks cosine hits across all of them.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of passages to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity for a passage to qualify.
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// List configured sources and their index status.
    Sources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { sources } => {
            if !sources.is_empty() {
                cfg.sources.paths = sources;
            }
            let provider = embedding::create_provider(&cfg.embedding)?;
            let mut service = RetrievalService::new(cfg, provider);
            let summary = service.initialize().await?;

            for outcome in &summary.sources {
                match &outcome.outcome {
                    Ok(stats) => {
                        println!("ingest {}", outcome.source.display());
                        println!("  documents: {}", stats.documents);
                        println!("  chunks appended: {}", stats.chunks_appended);
                        println!("  duplicates skipped: {}", stats.chunks_duplicate);
                        println!("  chunks failed: {}", stats.chunks_failed);
                        println!("  total indexed: {}", stats.total_indexed);
                    }
                    Err(e) => {
                        println!("ingest {} failed: {:#}", outcome.source.display(), e);
                    }
                }
            }
            println!("ok");
        }

        Commands::Search {
            query,
            top_k,
            min_score,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let min_score = min_score.unwrap_or(cfg.retrieval.min_score);

            let provider = embedding::create_provider(&cfg.embedding)?;
            let mut service = RetrievalService::new(cfg, provider);
            if service.open() == 0 {
                println!("No indices found. Run `grd ingest` first.");
                return Ok(());
            }

            let hits = service.search(&query, top_k, min_score).await;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, hit) in hits.iter().enumerate() {
                let excerpt: String = hit.text.chars().take(240).collect();
                println!(
                    "{}. [{:.2}] {}",
                    i + 1,
                    hit.score,
                    excerpt.replace('\n', " ")
                );
            }
        }

        Commands::Sources => {
            if cfg.sources.paths.is_empty() {
                println!("No sources configured.");
                return Ok(());
            }
            for source in &cfg.sources.paths {
                let index_path = ingest::index_path_for(&cfg.index.dir, source);
                if index_path.exists() {
                    let store =
                        EmbeddingStore::load(&index_path, source.display().to_string().as_str());
                    println!(
                        "{} -> {} ({} chunks)",
                        source.display(),
                        index_path.display(),
                        store.len()
                    );
                } else {
                    println!("{} -> (no index)", source.display());
                }
            }
        }
    }

    Ok(())
}
