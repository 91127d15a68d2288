//! Document ingestion.
//!
//! Turns a directory of store-page PDFs into embedded chunks in the
//! collection: PDF → text → recursive chunks → embeddings → one bulk
//! insert. Local inputs are validated before any store or network work;
//! any later failure aborts the run.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::extract;
use crate::models::{EmbeddedChunk, TextChunk};
use crate::store::sqlite::SqliteStore;
use crate::store::DocumentStore;

/// Default directory holding the PDFs to ingest.
pub const DEFAULT_PDF_DIR: &str = "raw-documents";

/// Counts reported by a build run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub cleared: Option<u64>,
    pub chunks: usize,
    pub inserted: usize,
}

/// List the `*.pdf` files directly inside `dir`, sorted by file name.
///
/// Fails if the directory is missing or holds no PDFs.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("PDF directory not found: {}", dir.display());
    }

    let mut pdfs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();

    if pdfs.is_empty() {
        bail!("No PDF files found in {}", dir.display());
    }
    Ok(pdfs)
}

/// Extract and split every PDF. Each chunk is tagged with its file name.
pub fn load_chunks(pdfs: &[PathBuf], splitter: &TextSplitter) -> Result<Vec<TextChunk>> {
    let mut chunks = Vec::new();
    for path in pdfs {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("invalid PDF path: {}", path.display()))?;

        let text = extract::pdf_to_text(path)
            .with_context(|| format!("failed to extract {}", path.display()))?;
        let file_chunks = splitter.split_documents(&text, &source);
        tracing::info!(file = %source, chunks = file_chunks.len(), "split PDF");
        chunks.extend(file_chunks);
    }
    Ok(chunks)
}

/// Embed `chunks` and insert them into `store`, optionally replacing the
/// collection's contents.
///
/// Every embedding is computed before the store is touched, and a clear is
/// applied together with the insert, so a failed run leaves the collection
/// as it was.
pub async fn ingest_chunks(
    store: &dyn DocumentStore,
    embedder: &dyn Embedder,
    chunks: Vec<TextChunk>,
    batch_size: usize,
    clear: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        chunks: chunks.len(),
        ..Default::default()
    };

    if chunks.is_empty() {
        tracing::warn!("no text extracted; nothing to insert");
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedding::embed_batched(embedder, &texts, batch_size).await?;

    let embedded: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedChunk {
            text: chunk.text,
            metadata: chunk.metadata,
            embedding,
        })
        .collect();

    if clear {
        let (removed, ids) = store
            .replace_chunks(&embedded)
            .await
            .context("failed to replace store contents")?;
        tracing::info!(removed, "cleared collection");
        report.cleared = Some(removed);
        report.inserted = ids.len();
    } else if !embedded.is_empty() {
        let ids = store.insert_chunks(&embedded).await?;
        report.inserted = ids.len();
    }
    Ok(report)
}

/// `llmaps build-store`.
pub async fn run_build(
    config: &Config,
    clear: bool,
    clear_only: bool,
    pdf_dir: Option<PathBuf>,
) -> Result<()> {
    if clear_only {
        let store = SqliteStore::open(&config.store).await?;
        store.ping().await?;
        let removed = store.clear().await?;
        store.close().await;
        tracing::info!(removed, "cleared collection");
        println!("Vector store cleared successfully!");
        return Ok(());
    }

    let dir = pdf_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_PDF_DIR));
    let pdfs = list_pdfs(&dir)?;
    tracing::info!(count = pdfs.len(), dir = %dir.display(), "found PDFs");

    let splitter = TextSplitter::from_config(&config.chunking);
    let chunks = load_chunks(&pdfs, &splitter)?;

    let store = SqliteStore::open(&config.store).await?;
    store.ping().await.context("store is not reachable")?;
    let embedder = embedding::create_embedder(&config.embedding)?;

    let report = ingest_chunks(
        &store,
        embedder.as_ref(),
        chunks,
        config.embedding.batch_size,
        clear,
    )
    .await;
    store.close().await;
    let report = report?;

    println!("build-store {}", config.store.namespace());
    println!("  files: {}", pdfs.len());
    if let Some(removed) = report.cleared {
        println!("  cleared: {}", removed);
    }
    println!("  chunks inserted: {}", report.inserted);
    println!("Vector store updated successfully!");
    Ok(())
}
