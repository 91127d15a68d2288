//! SQLite-backed [`DocumentStore`].
//!
//! One SQLite file holds a database; a collection is a table in it. Search
//! indexes are recorded in a shared `search_indexes` catalogue:
//!
//! - a **vector index** is a catalogue entry fixing dimensionality and
//!   similarity; vector search scores every stored embedding in Rust,
//! - a **full-text index** is an FTS5 table (`<collection>__<index>`) kept
//!   in sync with the collection by insert/delete triggers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{
    query_terms, validate_chunk, DocumentStore, FulltextIndexDefinition, IndexKind,
    VectorIndexDefinition,
};
use crate::config::{validate_identifier, StoreConfig};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{ChunkMetadata, EmbeddedChunk, SearchHit};

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Connect to the configured database and make sure the collection
    /// table exists.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        Self::with_pool(pool, &config.collection).await
    }

    pub async fn with_pool(pool: SqlitePool, collection: &str) -> Result<Self> {
        validate_identifier("collection", collection)?;
        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            self.collection
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "idx_{0}_source" ON "{0}"(source)"#,
            self.collection
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_indexes (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                definition_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (collection, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn fts_table(&self, index: &str) -> String {
        format!("{}__{}", self.collection, index)
    }

    async fn find_index(&self, name: &str) -> Result<Option<(String, String)>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT kind, definition_json FROM search_indexes WHERE collection = ? AND name = ?",
        )
        .bind(&self.collection)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn indexes_of_kind(&self, kind: IndexKind) -> Result<Vec<String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, definition_json FROM search_indexes WHERE collection = ? AND kind = ?",
        )
        .bind(&self.collection)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name, _)| name).collect())
    }

    async fn vector_definitions(&self) -> Result<Vec<VectorIndexDefinition>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT definition_json FROM search_indexes WHERE collection = ? AND kind = ?",
        )
        .bind(&self.collection)
        .bind(IndexKind::Vector.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| {
                serde_json::from_str(&json).context("corrupt vector index definition")
            })
            .collect()
    }

    async fn require_index(&self, name: &str, kind: IndexKind) -> Result<String> {
        match self.find_index(name).await? {
            Some((found, json)) if found == kind.as_str() => Ok(json),
            Some((found, _)) => bail!(
                "index '{}' on {} is a {} index, not {}",
                name,
                self.collection,
                found,
                kind.as_str()
            ),
            None => bail!(
                "no {} index named '{}' on collection {}",
                kind.as_str(),
                name,
                self.collection
            ),
        }
    }

    async fn ensure_index_absent(&self, name: &str) -> Result<()> {
        validate_identifier("index name", name)?;
        if self.find_index(name).await?.is_some() {
            bail!(
                "search index '{}' already exists on collection {}",
                name,
                self.collection
            );
        }
        Ok(())
    }

    async fn validate_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let vector_dims: Vec<usize> = self
            .vector_definitions()
            .await?
            .iter()
            .map(|d| d.dims)
            .collect();

        for chunk in chunks {
            validate_chunk(chunk, None)?;
            for dims in &vector_dims {
                validate_chunk(chunk, Some(*dims))?;
            }
        }
        Ok(())
    }

    async fn insert_rows(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        chunks: &[EmbeddedChunk],
    ) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(chunks.len());

        let insert = format!(
            r#"
            INSERT INTO "{}" (id, text, source, doc_type, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            self.collection
        );

        for chunk in chunks {
            let id = Uuid::new_v4().to_string();
            sqlx::query(&insert)
                .bind(&id)
                .bind(&chunk.text)
                .bind(&chunk.metadata.source)
                .bind(&chunk.metadata.doc_type)
                .bind(vec_to_blob(&chunk.embedding))
                .bind(chunk.embedding.len() as i64)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn delete_rows(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        fulltext: &[String],
    ) -> Result<u64> {
        // Empty the FTS tables first so the delete triggers have nothing to scan.
        for name in fulltext {
            sqlx::query(&format!(r#"DELETE FROM "{}""#, self.fts_table(name)))
                .execute(&mut **tx)
                .await?;
        }

        let result = sqlx::query(&format!(r#"DELETE FROM "{}""#, self.collection))
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_hit(row: &sqlx::sqlite::SqliteRow, raw_score: f64) -> SearchHit {
    SearchHit {
        id: row.get("id"),
        text: row.get("text"),
        metadata: ChunkMetadata {
            source: row.get("source"),
            doc_type: row.get("doc_type"),
        },
        raw_score,
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>> {
        self.validate_chunks(chunks).await?;
        let mut tx = self.pool.begin().await?;
        let ids = self.insert_rows(&mut tx, chunks).await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn clear(&self) -> Result<u64> {
        let fulltext = self.indexes_of_kind(IndexKind::Fulltext).await?;
        let mut tx = self.pool.begin().await?;
        let removed = self.delete_rows(&mut tx, &fulltext).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn replace_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<(u64, Vec<String>)> {
        self.validate_chunks(chunks).await?;
        let fulltext = self.indexes_of_kind(IndexKind::Fulltext).await?;
        let mut tx = self.pool.begin().await?;
        let removed = self.delete_rows(&mut tx, &fulltext).await?;
        let ids = self.insert_rows(&mut tx, chunks).await?;
        tx.commit().await?;
        Ok((removed, ids))
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM "{}""#, self.collection))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn create_vector_index(&self, def: &VectorIndexDefinition) -> Result<()> {
        self.ensure_index_absent(&def.name).await?;
        if def.dims == 0 {
            bail!("vector index '{}' needs dims > 0", def.name);
        }

        let mismatched: i64 = sqlx::query_scalar(&format!(
            r#"SELECT COUNT(*) FROM "{}" WHERE dims != ?"#,
            self.collection
        ))
        .bind(def.dims as i64)
        .fetch_one(&self.pool)
        .await?;
        if mismatched > 0 {
            bail!(
                "{} stored chunks do not have {} dimensions; cannot create vector index '{}'",
                mismatched,
                def.dims,
                def.name
            );
        }

        sqlx::query(
            "INSERT INTO search_indexes (collection, name, kind, definition_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(&def.name)
        .bind(IndexKind::Vector.as_str())
        .bind(serde_json::to_string(def)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_fulltext_index(&self, def: &FulltextIndexDefinition) -> Result<()> {
        self.ensure_index_absent(&def.name).await?;
        if def.path != "text" {
            bail!("full-text indexes can only cover the text field, got '{}'", def.path);
        }

        let fts = self.fts_table(&def.name);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"CREATE VIRTUAL TABLE "{}" USING fts5(chunk_id UNINDEXED, text)"#,
            fts
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"INSERT INTO "{}" (chunk_id, text) SELECT id, text FROM "{}""#,
            fts, self.collection
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TRIGGER "{0}_ai" AFTER INSERT ON "{1}" BEGIN
                INSERT INTO "{0}" (chunk_id, text) VALUES (new.id, new.text);
            END
            "#,
            fts, self.collection
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TRIGGER "{0}_ad" AFTER DELETE ON "{1}" BEGIN
                DELETE FROM "{0}" WHERE chunk_id = old.id;
            END
            "#,
            fts, self.collection
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO search_indexes (collection, name, kind, definition_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(&def.name)
        .bind(IndexKind::Fulltext.as_str())
        .bind(serde_json::to_string(def)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let json = self.require_index(index, IndexKind::Vector).await?;
        let def: VectorIndexDefinition =
            serde_json::from_str(&json).context("corrupt vector index definition")?;

        if query_vec.len() != def.dims {
            bail!(
                "query vector has {} dimensions, index '{}' expects {}",
                query_vec.len(),
                index,
                def.dims
            );
        }

        let rows = sqlx::query(&format!(
            r#"SELECT id, text, source, doc_type, embedding FROM "{}" WHERE dims = ?"#,
            self.collection
        ))
        .bind(def.dims as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = def.similarity.score(query_vec, &blob_to_vec(&blob));
                row_to_hit(row, score)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fulltext_search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_index(index, IndexKind::Fulltext).await?;

        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let fts = self.fts_table(index);
        let rows = sqlx::query(&format!(
            r#"
            SELECT c.id AS id, c.text AS text, c.source AS source, c.doc_type AS doc_type,
                   m.rank AS rank
            FROM (
                SELECT chunk_id, rank FROM "{0}" WHERE "{0}" MATCH ? ORDER BY rank LIMIT ?
            ) AS m
            JOIN "{1}" AS c ON c.id = m.chunk_id
            ORDER BY m.rank
            "#,
            fts, self.collection
        ))
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                // bm25 rank is lower-is-better; negate so higher = better
                row_to_hit(row, -rank)
            })
            .collect())
    }
}
