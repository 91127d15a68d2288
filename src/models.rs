//! Core data models shared by ingestion, retrieval and the HTTP layer.

use serde::{Deserialize, Serialize};

/// `type` tag carried by every chunk ingested from a store page.
pub const STORE_DATA: &str = "store_data";

/// Metadata stored alongside every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name of the source PDF. Never empty.
    pub source: String,
    #[serde(rename = "type")]
    pub doc_type: String,
}

impl ChunkMetadata {
    pub fn store_data(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            doc_type: STORE_DATA.to_string(),
        }
    }
}

/// A chunk of extracted text, before embedding.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Insert payload: a chunk together with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A stored chunk returned by one search leg with that leg's raw score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Storage-assigned key.
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub raw_score: f64,
}

/// A chunk after hybrid fusion.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Fused reciprocal-rank score.
    pub score: f64,
    /// Contribution of the vector leg (absent if the chunk was not a vector hit).
    pub vector_score: Option<f64>,
    /// Contribution of the full-text leg.
    pub fulltext_score: Option<f64>,
}

/// Request-scoped state threaded through the retrieve and generate steps.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub question: String,
    pub context: Vec<ScoredChunk>,
    pub answer: String,
}

impl QueryState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// A store-locator site the scraper visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSite {
    pub name: &'static str,
    pub url: &'static str,
    /// DOM id of the location search input.
    pub search_id: &'static str,
}
