//! Hybrid retrieval: vector similarity and full-text relevance merged with
//! reciprocal rank fusion.
//!
//! Each leg returns its own top `top_k` chunks. A chunk at 0-based rank `r`
//! in a leg gets `1 / (r + penalty + 1)` from that leg; contributions are
//! summed per chunk, and the fused list is sorted by score (descending,
//! ties broken by chunk id) and cut to `top_k`. If one leg fails the other
//! leg's hits are used alone; the search fails only when both legs do.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::models::{ScoredChunk, SearchHit};
use crate::store::DocumentStore;

/// Parameters of one hybrid search.
#[derive(Debug, Clone)]
pub struct HybridParams {
    pub top_k: usize,
    pub vector_penalty: f64,
    pub fulltext_penalty: f64,
    pub vector_index: String,
    pub search_index: String,
}

impl HybridParams {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            vector_penalty: config.vector_penalty,
            fulltext_penalty: config.fulltext_penalty,
            vector_index: config.vector_index.clone(),
            search_index: config.search_index.clone(),
        }
    }
}

/// Run both search legs against `store` and fuse the results.
pub async fn hybrid_search(
    store: &dyn DocumentStore,
    embedder: &dyn Embedder,
    query: &str,
    params: &HybridParams,
) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() || params.top_k == 0 {
        return Ok(Vec::new());
    }

    let vector_leg = async {
        let query_vec = embed_query(embedder, query).await?;
        store
            .vector_search(&params.vector_index, &query_vec, params.top_k)
            .await
    };
    let fulltext_leg = store.fulltext_search(&params.search_index, query, params.top_k);

    let (vector_hits, fulltext_hits) = match tokio::join!(vector_leg, fulltext_leg) {
        (Ok(vector), Ok(fulltext)) => (vector, fulltext),
        (Ok(vector), Err(e)) => {
            tracing::warn!(
                index = %params.search_index,
                error = %format!("{:#}", e),
                "full-text leg failed; using vector results only"
            );
            (vector, Vec::new())
        }
        (Err(e), Ok(fulltext)) => {
            tracing::warn!(
                index = %params.vector_index,
                error = %format!("{:#}", e),
                "vector leg failed; using full-text results only"
            );
            (Vec::new(), fulltext)
        }
        (Err(vector_err), Err(fulltext_err)) => bail!(
            "both search legs failed: vector: {:#}; full-text: {:#}",
            vector_err,
            fulltext_err
        ),
    };

    tracing::debug!(
        vector = vector_hits.len(),
        fulltext = fulltext_hits.len(),
        "hybrid search legs returned"
    );

    Ok(fuse(vector_hits, fulltext_hits, params))
}

/// Reciprocal rank fusion of two ranked hit lists.
pub fn fuse(
    vector_hits: Vec<SearchHit>,
    fulltext_hits: Vec<SearchHit>,
    params: &HybridParams,
) -> Vec<ScoredChunk> {
    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        let contribution = rrf(rank, params.vector_penalty);
        let entry = merged.entry(hit.id.clone()).or_insert_with(|| empty(hit));
        entry.vector_score = Some(contribution);
        entry.score += contribution;
    }

    for (rank, hit) in fulltext_hits.into_iter().enumerate() {
        let contribution = rrf(rank, params.fulltext_penalty);
        let entry = merged.entry(hit.id.clone()).or_insert_with(|| empty(hit));
        entry.fulltext_score = Some(contribution);
        entry.score += contribution;
    }

    let mut results: Vec<ScoredChunk> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(params.top_k);
    results
}

fn rrf(rank: usize, penalty: f64) -> f64 {
    1.0 / (rank as f64 + penalty + 1.0)
}

fn empty(hit: SearchHit) -> ScoredChunk {
    ScoredChunk {
        id: hit.id,
        text: hit.text,
        metadata: hit.metadata,
        score: 0.0,
        vector_score: None,
        fulltext_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, EmbeddedChunk};
    use crate::store::memory::InMemoryStore;
    use crate::store::{FulltextIndexDefinition, Similarity, VectorIndexDefinition};
    use async_trait::async_trait;

    fn params(top_k: usize) -> HybridParams {
        HybridParams {
            top_k,
            vector_penalty: 50.0,
            fulltext_penalty: 50.0,
            vector_index: "vector_index".to_string(),
            search_index: "search_index".to_string(),
        }
    }

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata: ChunkMetadata::store_data(format!("{}.pdf", id)),
            raw_score: 0.0,
        }
    }

    fn ids(results: &[ScoredChunk]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_fuse_empty() {
        assert!(fuse(vec![], vec![], &params(5)).is_empty());
    }

    #[test]
    fn test_fuse_single_leg_keeps_order() {
        let results = fuse(vec![hit("a"), hit("b"), hit("c")], vec![], &params(5));
        assert_eq!(ids(&results), vec!["a", "b", "c"]);
        assert!((results[0].score - 1.0 / 51.0).abs() < 1e-12);
        assert!((results[1].score - 1.0 / 52.0).abs() < 1e-12);
        assert!(results[0].fulltext_score.is_none());
    }

    #[test]
    fn test_fuse_sums_contributions() {
        // "b" is second in both legs, "a" and "c" top one leg each
        let results = fuse(
            vec![hit("a"), hit("b")],
            vec![hit("c"), hit("b")],
            &params(5),
        );
        assert_eq!(results[0].id, "b");
        assert!((results[0].score - 2.0 / 52.0).abs() < 1e-12);
        assert_eq!(results[0].vector_score, Some(1.0 / 52.0));
        assert_eq!(results[0].fulltext_score, Some(1.0 / 52.0));
        // a and c tie at 1/51; broken by id
        assert_eq!(ids(&results[1..]), vec!["a", "c"]);
    }

    #[test]
    fn test_fuse_truncates_to_top_k() {
        let results = fuse(
            vec![hit("a"), hit("b"), hit("c")],
            vec![hit("d"), hit("e")],
            &params(2),
        );
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_penalty_weights_legs() {
        let mut p = params(5);
        p.vector_penalty = 0.0;
        let results = fuse(vec![hit("v")], vec![hit("f")], &p);
        assert_eq!(ids(&results), vec!["v", "f"]);
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn test_scores_non_increasing() {
        let results = fuse(
            vec![hit("a"), hit("b"), hit("c"), hit("d")],
            vec![hit("d"), hit("c"), hit("x")],
            &params(10),
        );
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("milk") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_vector_index(&VectorIndexDefinition::new("vector_index", 2, Similarity::DotProduct))
            .await
            .unwrap();
        store
            .create_fulltext_index(&FulltextIndexDefinition::new("search_index"))
            .await
            .unwrap();
        store
            .insert_chunks(&[
                EmbeddedChunk {
                    text: "Milk: $3.99 at Target".to_string(),
                    metadata: ChunkMetadata::store_data("Milk _ Target.pdf"),
                    embedding: vec![1.0, 0.0],
                },
                EmbeddedChunk {
                    text: "Bakery opens at 7am".to_string(),
                    metadata: ChunkMetadata::store_data("bakery.pdf"),
                    embedding: vec![0.0, 1.0],
                },
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_hybrid_search_prefers_chunk_in_both_legs() {
        let store = seeded_store().await;
        let results = hybrid_search(&store, &AxisEmbedder, "price of milk?", &params(5))
            .await
            .unwrap();
        assert_eq!(results[0].metadata.source, "Milk _ Target.pdf");
        assert!(results[0].vector_score.is_some());
        assert!(results[0].fulltext_score.is_some());
    }

    #[tokio::test]
    async fn test_hybrid_search_falls_back_to_working_leg() {
        let store = InMemoryStore::new();
        store
            .create_vector_index(&VectorIndexDefinition::new("vector_index", 2, Similarity::DotProduct))
            .await
            .unwrap();
        store
            .insert_chunks(&[EmbeddedChunk {
                text: "Milk: $3.99 at Target".to_string(),
                metadata: ChunkMetadata::store_data("Milk _ Target.pdf"),
                embedding: vec![1.0, 0.0],
            }])
            .await
            .unwrap();

        let results = hybrid_search(&store, &AxisEmbedder, "price of milk?", &params(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.source, "Milk _ Target.pdf");
        assert!(results[0].vector_score.is_some());
        assert!(results[0].fulltext_score.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_search_missing_index_errors() {
        let store = InMemoryStore::new();
        assert!(hybrid_search(&store, &AxisEmbedder, "milk", &params(5))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hybrid_search_blank_query() {
        let store = InMemoryStore::new();
        let results = hybrid_search(&store, &AxisEmbedder, "   ", &params(5))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
