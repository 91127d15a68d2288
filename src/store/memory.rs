//! In-memory [`DocumentStore`] implementation for tests.
//!
//! Chunks and index definitions live behind `std::sync::RwLock`. Vector
//! search is brute force over all stored embeddings; full-text relevance
//! is the number of query-term occurrences in the chunk text.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::{
    query_terms, validate_chunk, DocumentStore, FulltextIndexDefinition, VectorIndexDefinition,
};
use crate::models::{EmbeddedChunk, SearchHit};

enum IndexDef {
    Vector(VectorIndexDefinition),
    Fulltext(FulltextIndexDefinition),
}

struct StoredChunk {
    id: String,
    chunk: EmbeddedChunk,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
    indexes: RwLock<HashMap<String, IndexDef>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn vector_definition(&self, name: &str) -> Result<VectorIndexDefinition> {
        let indexes = self.indexes.read().map_err(lock_poisoned)?;
        match indexes.get(name) {
            Some(IndexDef::Vector(def)) => Ok(def.clone()),
            Some(IndexDef::Fulltext(_)) => bail!("index '{}' is not a vector index", name),
            None => bail!("no vectorSearch index named '{}'", name),
        }
    }

    fn require_fulltext(&self, name: &str) -> Result<()> {
        let indexes = self.indexes.read().map_err(lock_poisoned)?;
        match indexes.get(name) {
            Some(IndexDef::Fulltext(_)) => Ok(()),
            Some(IndexDef::Vector(_)) => bail!("index '{}' is not a full-text index", name),
            None => bail!("no search index named '{}'", name),
        }
    }

    fn insert_index(&self, name: &str, def: IndexDef) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(lock_poisoned)?;
        if indexes.contains_key(name) {
            bail!("search index '{}' already exists", name);
        }
        indexes.insert(name.to_string(), def);
        Ok(())
    }

    fn validate_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let vector_dims: Vec<usize> = {
            let indexes = self.indexes.read().map_err(lock_poisoned)?;
            indexes
                .values()
                .filter_map(|def| match def {
                    IndexDef::Vector(v) => Some(v.dims),
                    IndexDef::Fulltext(_) => None,
                })
                .collect()
        };

        for chunk in chunks {
            validate_chunk(chunk, None)?;
            for dims in &vector_dims {
                validate_chunk(chunk, Some(*dims))?;
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_chunks(stored: &mut Vec<StoredChunk>, chunks: &[EmbeddedChunk]) -> Vec<String> {
    let mut ids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let id = Uuid::new_v4().to_string();
        stored.push(StoredChunk {
            id: id.clone(),
            chunk: chunk.clone(),
        });
        ids.push(id);
    }
    ids
}

fn lock_poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

fn hit(stored: &StoredChunk, raw_score: f64) -> SearchHit {
    SearchHit {
        id: stored.id.clone(),
        text: stored.chunk.text.clone(),
        metadata: stored.chunk.metadata.clone(),
        raw_score,
    }
}

fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>> {
        self.validate_chunks(chunks)?;
        let mut stored = self.chunks.write().map_err(lock_poisoned)?;
        Ok(push_chunks(&mut stored, chunks))
    }

    async fn clear(&self) -> Result<u64> {
        let mut stored = self.chunks.write().map_err(lock_poisoned)?;
        let n = stored.len() as u64;
        stored.clear();
        Ok(n)
    }

    async fn replace_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<(u64, Vec<String>)> {
        self.validate_chunks(chunks)?;
        let mut stored = self.chunks.write().map_err(lock_poisoned)?;
        let n = stored.len() as u64;
        stored.clear();
        Ok((n, push_chunks(&mut stored, chunks)))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.chunks.read().map_err(lock_poisoned)?.len() as u64)
    }

    async fn create_vector_index(&self, def: &VectorIndexDefinition) -> Result<()> {
        if def.dims == 0 {
            bail!("vector index '{}' needs dims > 0", def.name);
        }
        {
            let stored = self.chunks.read().map_err(lock_poisoned)?;
            if stored.iter().any(|s| s.chunk.embedding.len() != def.dims) {
                bail!(
                    "stored chunks do not have {} dimensions; cannot create vector index '{}'",
                    def.dims,
                    def.name
                );
            }
        }
        self.insert_index(&def.name, IndexDef::Vector(def.clone()))
    }

    async fn create_fulltext_index(&self, def: &FulltextIndexDefinition) -> Result<()> {
        self.insert_index(&def.name, IndexDef::Fulltext(def.clone()))
    }

    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let def = self.vector_definition(index)?;
        if query_vec.len() != def.dims {
            bail!(
                "query vector has {} dimensions, index '{}' expects {}",
                query_vec.len(),
                index,
                def.dims
            );
        }

        let stored = self.chunks.read().map_err(lock_poisoned)?;
        let hits = stored
            .iter()
            .filter(|s| s.chunk.embedding.len() == def.dims)
            .map(|s| hit(s, def.similarity.score(query_vec, &s.chunk.embedding)))
            .collect();
        Ok(rank(hits, limit))
    }

    async fn fulltext_search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_fulltext(index)?;

        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.chunks.read().map_err(lock_poisoned)?;
        let hits = stored
            .iter()
            .filter_map(|s| {
                let words = query_terms(&s.chunk.text);
                let matches = words.iter().filter(|w| terms.contains(w)).count();
                (matches > 0).then(|| hit(s, matches as f64))
            })
            .collect();
        Ok(rank(hits, limit))
    }
}
