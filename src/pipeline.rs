//! Two-step question answering: retrieve, then generate.
//!
//! Every question gets its own [`QueryState`]. The retrieve step fills
//! `context` through hybrid search; a retrieval failure is logged and
//! leaves the context empty so the model still answers. The generate step
//! fills a fixed prompt template with the joined context and the question.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{QueryState, ScoredChunk};
use crate::search::{hybrid_search, HybridParams};
use crate::store::DocumentStore;

/// Question-answering prompt. `{question}` and `{context}` are filled in.
pub const RAG_PROMPT: &str = "You are an assistant for question-answering tasks. Use the following pieces of retrieved context to answer the question. If you don't know the answer, just say that you don't know. Use three sentences maximum and keep the answer concise.\nQuestion: {question} \nContext: {context} \nAnswer:";

/// Join retrieved chunk texts with blank lines.
pub fn format_context(context: &[ScoredChunk]) -> String {
    context
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fill [`RAG_PROMPT`]. Both slots are filled in one pass, so placeholder
/// text inside the question or context is kept as written.
pub fn build_prompt(question: &str, context: &str) -> String {
    let mut prompt = String::with_capacity(RAG_PROMPT.len() + question.len() + context.len());
    let mut rest = RAG_PROMPT;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start..];
        let (value, slot_len) = if tail.starts_with("{question}") {
            (question, "{question}".len())
        } else if tail.starts_with("{context}") {
            (context, "{context}".len())
        } else {
            prompt.push_str(&rest[..=start]);
            rest = &rest[start + 1..];
            continue;
        };
        prompt.push_str(&rest[..start]);
        prompt.push_str(value);
        rest = &tail[slot_len..];
    }
    prompt.push_str(rest);
    prompt
}

/// Retrieval-augmented generation over a document store.
///
/// Holds shared handles only, so one pipeline serves concurrent requests.
#[derive(Clone)]
pub struct RagPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    params: HybridParams,
}

impl RagPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        params: HybridParams,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            params,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn params(&self) -> &HybridParams {
        &self.params
    }

    /// Fill `state.context`. Never fails.
    pub async fn retrieve(&self, mut state: QueryState) -> QueryState {
        match hybrid_search(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &state.question,
            &self.params,
        )
        .await
        {
            Ok(context) => {
                tracing::debug!(chunks = context.len(), "retrieved context");
                state.context = context;
            }
            Err(e) => {
                tracing::warn!("retrieval failed, answering without context: {:#}", e);
                state.context = Vec::new();
            }
        }
        state
    }

    /// Ask the chat model and fill `state.answer`.
    pub async fn generate(&self, mut state: QueryState) -> Result<QueryState> {
        let prompt = build_prompt(&state.question, &format_context(&state.context));
        state.answer = self.llm.complete(&[ChatMessage::user(prompt)]).await?;
        Ok(state)
    }

    /// Answer `question`: retrieve, then generate.
    pub async fn invoke(&self, question: &str) -> Result<QueryState> {
        let state = self.retrieve(QueryState::new(question)).await;
        self.generate(state).await
    }
}
