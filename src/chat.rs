//! Interactive terminal chat over the question-answering pipeline.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::embedding::{self, embed_query};
use crate::llm::OpenAIChat;
use crate::pipeline::RagPipeline;
use crate::search::HybridParams;
use crate::server::preview;
use crate::store::sqlite::SqliteStore;
use crate::store::DocumentStore;

const EXIT_WORDS: &[&str] = &["quit", "exit", "bye"];

/// One-result vector search used as a startup smoke test. Failures are
/// logged, never returned.
pub async fn self_test(pipeline: &RagPipeline) -> Option<usize> {
    let result = async {
        let vector = embed_query(pipeline.embedder().as_ref(), "test query").await?;
        pipeline
            .store()
            .vector_search(&pipeline.params().vector_index, &vector, 1)
            .await
    }
    .await;

    match result {
        Ok(hits) => {
            tracing::info!(found = hits.len(), "vector store test");
            Some(hits.len())
        }
        Err(e) => {
            tracing::warn!("vector store test failed: {:#}", e);
            None
        }
    }
}

/// Read questions from `input` until EOF or an exit word, answering each
/// on `out`. Pipeline errors are reported and the loop continues.
pub async fn run_repl<R, W>(pipeline: &RagPipeline, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(
        out,
        "Welcome to LLMaps! I can help you find information about stores and locations."
    )?;
    writeln!(out, "Type 'quit' to exit.\n")?;

    let mut lines = input.lines();
    loop {
        write!(out, "You: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();

        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            writeln!(out, "Goodbye!")?;
            break;
        }
        if question.is_empty() {
            continue;
        }

        match pipeline.invoke(question).await {
            Ok(state) => {
                writeln!(out, "\nBot: {}", state.answer)?;
                writeln!(out, "\nSources used:")?;
                for chunk in &state.context {
                    writeln!(out, "---")?;
                    writeln!(out, "From: {}", chunk.metadata.source)?;
                    writeln!(out, "{}", preview(&chunk.text))?;
                }
                writeln!(out)?;
            }
            Err(e) => {
                writeln!(out, "\nError: {:#}", e)?;
                writeln!(out, "Please try again.\n")?;
            }
        }
    }
    Ok(())
}

/// `llmaps chat`.
pub async fn run_chat(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.store).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let embedder = embedding::create_embedder(&config.embedding)?;
    let llm = Arc::new(OpenAIChat::for_chat(&config.llm)?);
    let pipeline = RagPipeline::new(
        store,
        embedder,
        llm,
        HybridParams::from_config(&config.retrieval),
    );

    println!("Initializing the RAG chatbot...");
    match self_test(&pipeline).await {
        Some(found) => println!("Vector store test: found {} documents", found),
        None => println!("Vector store test failed (see log)"),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    run_repl(&pipeline, stdin, &mut stdout).await
}
