//! End-to-end question answering over the SQLite store with fake model
//! backends: ingest → create indexes → POST /chat.

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use llmaps::config::Config;
use llmaps::embedding::Embedder;
use llmaps::indexes::create_indexes;
use llmaps::ingest::ingest_chunks;
use llmaps::llm::{ChatMessage, ChatModel, JsonSchema};
use llmaps::models::{ChunkMetadata, TextChunk};
use llmaps::pipeline::RagPipeline;
use llmaps::search::HybridParams;
use llmaps::server::{build_router, ChatResponse};
use llmaps::store::sqlite::SqliteStore;
use llmaps::store::DocumentStore;

const DIMS: usize = 4;

/// Bag-of-keywords embedder: one axis per grocery topic.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let mut v = vec![0.0f32; DIMS];
                for (i, word) in ["milk", "bread", "pharmacy", "hours"].iter().enumerate() {
                    if t.contains(word) {
                        v[i] = 1.0;
                    }
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    v.iter_mut().for_each(|x| *x /= norm);
                }
                v
            })
            .collect())
    }
}

/// Answers with the first dollar amount found in the prompt's context.
struct PriceReader;

#[async_trait]
impl ChatModel for PriceReader {
    fn model_name(&self) -> &str {
        "price-reader"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = &messages[0].content;
        let context = prompt.split("Context: ").nth(1).unwrap_or("");
        match context.find('$') {
            Some(start) => {
                let amount: String = context[start + 1..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                Ok(format!("The price of milk is ${}.", amount))
            }
            None => Ok("I don't know.".to_string()),
        }
    }
    async fn complete_json(
        &self,
        _messages: &[ChatMessage],
        _schema: &JsonSchema,
    ) -> Result<serde_json::Value> {
        bail!("not used")
    }
}

struct UnreachableEmbedder;

#[async_trait]
impl Embedder for UnreachableEmbedder {
    fn model_name(&self) -> &str {
        "unreachable"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused")
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.store.uri = tmp.path().join("data").display().to_string();
    config.embedding.dims = DIMS;
    config
}

fn chunk(text: &str, source: &str) -> TextChunk {
    TextChunk {
        text: text.to_string(),
        metadata: ChunkMetadata::store_data(source),
    }
}

async fn seeded_store(config: &Config) -> SqliteStore {
    let store = SqliteStore::open(&config.store).await.unwrap();
    ingest_chunks(
        &store,
        &KeywordEmbedder,
        vec![
            chunk("Milk: $3.99 at Target", "Milk _ Target.pdf"),
            chunk("Fresh bread baked daily at Ralphs", "ralphs_la_jolla_ca.pdf"),
            chunk("Vons pharmacy hours: 9am to 9pm", "vons_la_jolla_ca.pdf"),
        ],
        16,
        true,
    )
    .await
    .unwrap();
    store
}

#[tokio::test]
async fn test_provisioning_twice_never_fails() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;

    let first = create_indexes(&store, &config).await;
    assert!(first.vector.is_created());
    assert!(first.fulltext.is_created());

    let second = create_indexes(&store, &config).await;
    assert!(!second.vector.is_created());
    assert!(!second.fulltext.is_created());

    // indexes from the first run still answer
    let hits = store.fulltext_search("search_index", "milk", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_chat_answers_milk_price_with_source() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;
    create_indexes(&store, &config).await;

    let pipeline = RagPipeline::new(
        Arc::new(store),
        Arc::new(KeywordEmbedder),
        Arc::new(PriceReader),
        HybridParams::from_config(&config.retrieval),
    );
    let static_dir = tmp.path().join("static");
    std::fs::create_dir_all(&static_dir).unwrap();
    let app = build_router(Arc::new(pipeline), &static_dir);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"question": "What is the price of milk?"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: ChatResponse = serde_json::from_slice(&bytes).unwrap();

    assert!(body.answer.contains("$3.99"), "answer: {}", body.answer);
    assert_eq!(body.sources[0].source, "Milk _ Target.pdf");
    assert!(body.sources.len() <= config.retrieval.top_k);
    for pair in body.sources.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_missing_indexes_answer_without_context() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;

    let pipeline = RagPipeline::new(
        Arc::new(store),
        Arc::new(KeywordEmbedder),
        Arc::new(PriceReader),
        HybridParams::from_config(&config.retrieval),
    );

    let state = pipeline.invoke("What is the price of milk?").await.unwrap();
    assert!(state.context.is_empty());
    assert_eq!(state.answer, "I don't know.");
}

#[tokio::test]
async fn test_rebuild_with_clear_replaces_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;
    create_indexes(&store, &config).await;

    let report = ingest_chunks(
        &store,
        &KeywordEmbedder,
        vec![chunk("Milk: $4.29 at Vons", "vons_milk.pdf")],
        16,
        true,
    )
    .await
    .unwrap();
    assert_eq!(report.cleared, Some(3));
    assert_eq!(store.count().await.unwrap(), 1);

    let hits = store.fulltext_search("search_index", "milk", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata.source, "vons_milk.pdf");
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;
    create_indexes(&store, &config).await;

    let result = ingest_chunks(
        &store,
        &UnreachableEmbedder,
        vec![chunk("Milk: $4.29 at Vons", "vons_milk.pdf")],
        16,
        true,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(store.count().await.unwrap(), 3);

    let hits = store.fulltext_search("search_index", "milk", 5).await.unwrap();
    assert_eq!(hits[0].metadata.source, "Milk _ Target.pdf");
}
