//! # LLMaps CLI (`llmaps`)
//!
//! One binary drives every stage of the store-locator assistant. Stages are
//! run by hand, in roughly this order.
//!
//! ## Usage
//!
//! ```bash
//! llmaps --config ./config/llmaps.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `llmaps scrape "<location>"` | Save each store locator's results for a location as PDF |
//! | `llmaps build-store` | Chunk, embed and insert the PDFs in `raw-documents/` |
//! | `llmaps create-indexes` | Create the vector and full-text search indexes |
//! | `llmaps serve` | Start the HTTP chat API and web page |
//! | `llmaps chat` | Ask questions in the terminal |
//! | `llmaps extract` | Pull product titles and prices from one PDF into CSV |
//!
//! ## Examples
//!
//! ```bash
//! llmaps scrape "La Jolla, CA"
//! llmaps build-store --clear
//! llmaps create-indexes
//! llmaps serve
//! curl -X POST localhost:8000/chat -H 'content-type: application/json' \
//!      -d '{"question": "Which Vons is closest to La Jolla?"}'
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use llmaps::{chat, config, indexes, ingest, logging, products, scrape, server};

/// LLMaps: ask questions about grocery stores near a location.
///
/// Settings come from the TOML file given by `--config`, then `.env` and
/// the environment (`STORE_URI`, `DB_NAME`, `COLLECTION_NAME`,
/// `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `LLMAPS_BIND`).
#[derive(Parser)]
#[command(
    name = "llmaps",
    about = "LLMaps: store-locator question answering over scraped store pages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/llmaps.toml`. A missing file means built-in
    /// defaults plus environment overrides.
    #[arg(long, global = true, default_value = "./config/llmaps.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save store-locator result pages for a location as PDFs.
    ///
    /// Visits every configured store site in headless Chromium. A store
    /// that fails is reported and skipped.
    Scrape {
        /// Location to search for stores (e.g. "La Jolla, CA").
        location: String,
    },

    /// Build the vector store from the PDFs in a directory.
    BuildStore {
        /// Delete every stored chunk before inserting.
        #[arg(long)]
        clear: bool,

        /// Delete every stored chunk and stop.
        #[arg(long)]
        clear_only: bool,

        /// Directory of PDFs to ingest (default: raw-documents).
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
    },

    /// Create the vector and full-text search indexes.
    ///
    /// Safe to run repeatedly: an index that already exists is reported
    /// and left alone.
    CreateIndexes,

    /// Start the HTTP chat API on `[server].bind`.
    Serve,

    /// Interactive question answering in the terminal.
    Chat,

    /// Extract product titles and prices from a PDF into CSV.
    Extract {
        /// PDF to read (default: "raw-documents/Milk _ Target.pdf").
        #[arg(long)]
        pdf: Option<PathBuf>,

        /// CSV file to write (default: output.csv).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Scrape { location } => {
            scrape::run_scrape(&cfg, &location).await?;
        }
        Commands::BuildStore {
            clear,
            clear_only,
            pdf_dir,
        } => {
            ingest::run_build(&cfg, clear, clear_only, pdf_dir).await?;
        }
        Commands::CreateIndexes => {
            indexes::run_create_indexes(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat => {
            chat::run_chat(&cfg).await?;
        }
        Commands::Extract { pdf, output } => {
            products::run_extract(&cfg, pdf, output).await?;
        }
    }

    Ok(())
}
