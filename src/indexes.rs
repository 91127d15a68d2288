//! Search index provisioning.
//!
//! Creates the vector index and the full-text index the hybrid retriever
//! queries. Each index is attempted independently: a failure, including
//! "already exists" on a second run, is logged and does not stop the other
//! attempt or fail the command.

use anyhow::Result;

use crate::config::Config;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentStore, FulltextIndexDefinition, VectorIndexDefinition};

/// Result of one index creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    Failed(String),
}

impl IndexOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, IndexOutcome::Created)
    }
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub vector: IndexOutcome,
    pub fulltext: IndexOutcome,
}

/// Attempt to create both search indexes on `store`.
pub async fn create_indexes(store: &dyn DocumentStore, config: &Config) -> IndexReport {
    let vector_def = VectorIndexDefinition::new(
        config.retrieval.vector_index.clone(),
        config.embedding.dims,
        config.retrieval.similarity,
    );
    let vector = match store.create_vector_index(&vector_def).await {
        Ok(()) => {
            tracing::info!(index = %vector_def.name, dims = vector_def.dims, "vector index created");
            IndexOutcome::Created
        }
        Err(e) => {
            tracing::warn!(index = %vector_def.name, "error creating vector index: {:#}", e);
            IndexOutcome::Failed(format!("{:#}", e))
        }
    };

    let fulltext_def = FulltextIndexDefinition::new(config.retrieval.search_index.clone());
    let fulltext = match store.create_fulltext_index(&fulltext_def).await {
        Ok(()) => {
            tracing::info!(index = %fulltext_def.name, "full-text index created");
            IndexOutcome::Created
        }
        Err(e) => {
            tracing::warn!(index = %fulltext_def.name, "error creating full-text index: {:#}", e);
            IndexOutcome::Failed(format!("{:#}", e))
        }
    };

    IndexReport { vector, fulltext }
}

/// `llmaps create-indexes`: open the configured store and provision both
/// indexes. Only a failure to reach the store is an error.
pub async fn run_create_indexes(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.store).await?;
    store.ping().await?;

    let report = create_indexes(&store, config).await;
    store.close().await;

    println!("create-indexes {}", config.store.namespace());
    print_outcome(&config.retrieval.vector_index, &report.vector);
    print_outcome(&config.retrieval.search_index, &report.fulltext);
    Ok(())
}

fn print_outcome(name: &str, outcome: &IndexOutcome) {
    match outcome {
        IndexOutcome::Created => println!("  {}: created", name),
        IndexOutcome::Failed(reason) => println!("  {}: skipped ({})", name, reason),
    }
}
