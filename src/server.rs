//! HTTP question-answering service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question with retrieved sources |
//! | `GET`  | `/health` | Liveness check |
//! | `GET`  | `/` | Chat page (`<static_dir>/index.html`) |
//! | `GET`  | `/static/*` | Files under `static_dir` |
//!
//! # Error Contract
//!
//! Failures answer with a JSON body carrying a single message:
//!
//! ```json
//! { "detail": "OpenAI returned 401 Unauthorized: ..." }
//! ```
//!
//! Pipeline errors are `500`; a request body that is not
//! `{"question": string}` is `422`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the chat page can be
//! served from anywhere.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::embedding;
use crate::llm::OpenAIChat;
use crate::models::ScoredChunk;
use crate::pipeline::RagPipeline;
use crate::search::HybridParams;
use crate::store::sqlite::SqliteStore;
use crate::store::DocumentStore;

/// Characters of chunk text echoed back per source.
const SOURCE_PREVIEW_CHARS: usize = 200;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceRef {
    pub content: String,
    pub source: String,
    pub score: f64,
}

impl From<&ScoredChunk> for SourceRef {
    fn from(chunk: &ScoredChunk) -> Self {
        let source = if chunk.metadata.source.is_empty() {
            "Unknown source".to_string()
        } else {
            chunk.metadata.source.clone()
        };
        Self {
            content: preview(&chunk.text),
            source,
            score: chunk.score,
        }
    }
}

/// First [`SOURCE_PREVIEW_CHARS`] characters of `text` followed by `...`.
pub fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(SOURCE_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Build the router over a ready pipeline.
pub fn build_router(pipeline: Arc<RagPipeline>, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline })
}

/// `llmaps serve`: wire the SQLite store, embedder and chat model into a
/// pipeline and serve it on `[server].bind` until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.store).await?;
    store.ping().await?;
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let embedder = embedding::create_embedder(&config.embedding)?;
    let llm = Arc::new(OpenAIChat::for_chat(&config.llm)?);

    let pipeline = RagPipeline::new(
        store,
        embedder,
        llm,
        HybridParams::from_config(&config.retrieval),
    );
    let app = build_router(Arc::new(pipeline), &config.server.static_dir);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("LLMaps API listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("chat request failed: {:#}", err);
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{:#}", err),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

// ============ Handlers ============

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload?;
    let result = state.pipeline.invoke(&request.question).await?;

    Ok(Json(ChatResponse {
        answer: result.answer,
        sources: result.context.iter().map(SourceRef::from).collect(),
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
