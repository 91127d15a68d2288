//! Document store abstraction.
//!
//! The [`DocumentStore`] trait covers everything the ingester, the index
//! provisioner and the retriever need from the chunk collection, so the
//! pipeline runs unchanged against SQLite ([`sqlite::SqliteStore`]) or the
//! in-memory store used in tests ([`memory::InMemoryStore`]).
//!
//! Search indexes are named and created explicitly, the way a hosted
//! document database does it: a vector index fixes the embedding
//! dimensionality and similarity function, a full-text index makes the
//! `text` field searchable. Searching through an index that was never
//! created is an error.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding;
use crate::models::{EmbeddedChunk, SearchHit};

/// Similarity function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Similarity {
    Cosine,
    #[default]
    DotProduct,
}

impl Similarity {
    /// Score `candidate` against `query`, mapped into `[0, 1]` as
    /// `(1 + similarity) / 2`.
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f64 {
        let raw = match self {
            Similarity::Cosine => embedding::cosine_similarity(query, candidate),
            Similarity::DotProduct => embedding::dot_product(query, candidate),
        };
        (1.0 + raw as f64) / 2.0
    }
}

/// Definition of a vector similarity index over the `embedding` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexDefinition {
    pub name: String,
    pub path: String,
    pub dims: usize,
    pub similarity: Similarity,
}

impl VectorIndexDefinition {
    pub fn new(name: impl Into<String>, dims: usize, similarity: Similarity) -> Self {
        Self {
            name: name.into(),
            path: "embedding".to_string(),
            dims,
            similarity,
        }
    }
}

/// Definition of a full-text index over the `text` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulltextIndexDefinition {
    pub name: String,
    pub path: String,
}

impl FulltextIndexDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "text".to_string(),
        }
    }
}

/// Kind of a search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Vector,
    Fulltext,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Vector => "vectorSearch",
            IndexKind::Fulltext => "search",
        }
    }
}

/// Abstract chunk collection with named search indexes.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](DocumentStore::ping) | Verify the connection |
/// | [`insert_chunks`](DocumentStore::insert_chunks) | Bulk insert, returns assigned keys |
/// | [`clear`](DocumentStore::clear) | Delete every chunk |
/// | [`replace_chunks`](DocumentStore::replace_chunks) | Clear and insert as one atomic step |
/// | [`count`](DocumentStore::count) | Number of stored chunks |
/// | [`create_vector_index`](DocumentStore::create_vector_index) | Create a vector index; fails if the name exists |
/// | [`create_fulltext_index`](DocumentStore::create_fulltext_index) | Create a full-text index; fails if the name exists |
/// | [`vector_search`](DocumentStore::vector_search) | Top chunks by vector similarity |
/// | [`fulltext_search`](DocumentStore::fulltext_search) | Top chunks by text relevance |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Insert all chunks atomically. Returns the storage-assigned keys in
    /// input order.
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>>;

    /// Delete every chunk in the collection. Returns the number deleted.
    async fn clear(&self) -> Result<u64>;

    /// Delete every chunk and insert `chunks` atomically: on error the
    /// collection is left as it was. Returns the number deleted and the new
    /// keys.
    async fn replace_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<(u64, Vec<String>)>;

    async fn count(&self) -> Result<u64>;

    async fn create_vector_index(&self, def: &VectorIndexDefinition) -> Result<()>;

    async fn create_fulltext_index(&self, def: &FulltextIndexDefinition) -> Result<()>;

    /// Up to `limit` chunks ordered by descending similarity to `query_vec`.
    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Up to `limit` chunks ordered by descending text relevance to `query`.
    async fn fulltext_search(&self, index: &str, query: &str, limit: usize)
        -> Result<Vec<SearchHit>>;
}

/// Check the invariants every inserted chunk must satisfy.
pub fn validate_chunk(chunk: &EmbeddedChunk, expected_dims: Option<usize>) -> Result<()> {
    if chunk.metadata.source.trim().is_empty() {
        bail!("chunk metadata must carry a non-empty source");
    }
    if chunk.embedding.is_empty() {
        bail!(
            "chunk from '{}' has an empty embedding",
            chunk.metadata.source
        );
    }
    if let Some(dims) = expected_dims {
        if chunk.embedding.len() != dims {
            bail!(
                "chunk from '{}' has {} dimensions, vector index expects {}",
                chunk.metadata.source,
                chunk.embedding.len(),
                dims
            );
        }
    }
    Ok(())
}

/// Split a free-text question into lowercase search terms. Punctuation and
/// other non-alphanumeric characters separate terms and are dropped.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
