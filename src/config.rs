//! Configuration loading.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. built-in defaults (the values the store-locator deployment runs with),
//! 2. an optional TOML file (`--config`, default `./config/llmaps.toml`),
//! 3. environment variables (a `.env` file is loaded by the binary first).
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `STORE_URI` | `store.uri` |
//! | `DB_NAME` | `store.database` |
//! | `COLLECTION_NAME` | `store.collection` |
//! | `OPENAI_BASE_URL` | `llm.base_url` and `embedding.url` for the OpenAI provider |
//! | `LLMAPS_BIND` | `server.bind` |
//!
//! API keys are never read from the file; providers look up
//! `OPENAI_API_KEY` themselves.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::Similarity;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

/// Document store location.
///
/// `uri` is the store root: a directory holding one SQLite file per
/// database name. The collection is a table inside that database.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_uri")]
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: default_store_uri(),
            database: default_database(),
            collection: default_collection(),
        }
    }
}

impl StoreConfig {
    /// Path of the SQLite file backing `database`.
    pub fn database_path(&self) -> PathBuf {
        let root = self.uri.strip_prefix("sqlite://").unwrap_or(&self.uri);
        Path::new(root).join(format!("{}.sqlite", self.database))
    }

    /// `database.collection`, as shown in logs.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

fn default_store_uri() -> String {
    "data".to_string()
}
fn default_database() -> String {
    "stores_db".to_string()
}
fn default_collection() -> String {
    "llmaps".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of the embeddings API. Provider-specific default when unset.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Sampling temperature for answering questions.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Sampling temperature for structured product extraction.
    #[serde(default)]
    pub extraction_temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: default_temperature(),
            extraction_temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            base_url: default_llm_base_url(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_penalty")]
    pub vector_penalty: f64,
    #[serde(default = "default_penalty")]
    pub fulltext_penalty: f64,
    #[serde(default = "default_vector_index")]
    pub vector_index: String,
    #[serde(default = "default_search_index")]
    pub search_index: String,
    #[serde(default)]
    pub similarity: Similarity,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vector_penalty: default_penalty(),
            fulltext_penalty: default_penalty(),
            vector_index: default_vector_index(),
            search_index: default_search_index(),
            similarity: Similarity::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_penalty() -> f64 {
    50.0
}
fn default_vector_index() -> String {
    "vector_index".to_string()
}
fn default_search_index() -> String {
    "search_index".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Fixed delay after submitting a location, for results to render.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// How long to wait for the search input to appear.
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            settle_secs: default_settle_secs(),
            element_timeout_secs: default_element_timeout_secs(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("raw-documents")
}
fn default_settle_secs() -> u64 {
    5
}
fn default_element_timeout_secs() -> u64 {
    10
}

/// Load configuration from `path` (if it exists), then apply environment
/// overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse the TOML file at `path`, or return defaults when it does not exist.
/// No environment overrides are applied.
pub fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Apply environment overrides using `lookup` (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("STORE_URI") {
            self.store.uri = v;
        }
        if let Some(v) = non_empty("DB_NAME") {
            self.store.database = v;
        }
        if let Some(v) = non_empty("COLLECTION_NAME") {
            self.store.collection = v;
        }
        if let Some(v) = non_empty("OPENAI_BASE_URL") {
            if self.embedding.provider == "openai" {
                self.embedding.url = Some(v.clone());
            }
            self.llm.base_url = v;
        }
        if let Some(v) = non_empty("LLMAPS_BIND") {
            self.server.bind = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("store.database", &self.store.database)?;
        validate_identifier("store.collection", &self.store.collection)?;
        validate_identifier("retrieval.vector_index", &self.retrieval.vector_index)?;
        validate_identifier("retrieval.search_index", &self.retrieval.search_index)?;

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.vector_penalty < 0.0 || self.retrieval.fulltext_penalty < 0.0 {
            bail!("retrieval penalties must be >= 0");
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai or ollama.",
                other
            ),
        }

        Ok(())
    }
}

/// Names end up inside SQL statements and file names, so only plain
/// identifiers are accepted.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        bail!(
            "{} must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*), got '{}'",
            field,
            value
        );
    }
    Ok(())
}
