//! # LLMaps
//!
//! Retrieval-augmented question answering over grocery store-locator pages.
//!
//! Store-locator result pages are printed to PDF, split into overlapping
//! chunks, embedded, and stored in a SQLite collection with a vector index
//! and a full-text index. Questions are answered by fusing both searches and
//! handing the top chunks to a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │ Scraper  │──▶│   Ingester   │──▶│   SQLite   │
//! │ Chromium │   │ Chunk+Embed  │   │ FTS5 + Vec │
//! └──────────┘   └──────────────┘   └─────┬──────┘
//!                                         │ hybrid search
//!                                   ┌─────▼──────┐
//!                                   │  Pipeline  │──▶ chat model
//!                                   └─────┬──────┘
//!                              ┌──────────┴─────────┐
//!                              ▼                    ▼
//!                         ┌─────────┐         ┌──────────┐
//!                         │  HTTP   │         │ Terminal │
//!                         │ (/chat) │         │  chat    │
//!                         └─────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`chunk`] | Recursive text splitting |
//! | [`extract`] | PDF text extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`db`] | Database connection |
//! | [`store`] | Document store trait, SQLite and in-memory stores |
//! | [`indexes`] | Search index provisioning |
//! | [`ingest`] | PDF directory ingestion |
//! | [`search`] | Hybrid search with reciprocal rank fusion |
//! | [`pipeline`] | Retrieve-then-generate question answering |
//! | [`server`] | HTTP API |
//! | [`chat`] | Terminal chat |
//! | [`scrape`] | Store-locator scraper |
//! | [`products`] | Product/price extraction to CSV |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod indexes;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod products;
pub mod scrape;
pub mod search;
pub mod server;
pub mod store;
