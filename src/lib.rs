//! # Grounding
//!
//! A mode-aware chunking, embedding, and similarity-retrieval engine for
//! conversational agents.
//!
//! Grounding ingests heterogeneous documents (plain text, source code,
//! spreadsheets, PDFs, markdown), splits them into retrievable chunks,
//! embeds each chunk through an external provider, and answers top-K
//! cosine-similarity queries against one persisted index per source.
//! Fingerprint-based deduplication makes re-ingestion idempotent, and the
//! index is written after every successful chunk so interrupted runs
//! resume where they stopped.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────┐   ┌────────────┐
//! │  Sources   │──▶│ Extract   │──▶│ Chunker │──▶│  Embedding │
//! │ file / dir │   │ txt/pdf/  │   │ 4 modes │   │  provider  │
//! └───────────┘   │ xlsx/md   │   └─────────┘   └─────┬──────┘
//!                 └──────────┘                        ▼
//!                                  ┌──────────────────────────┐
//!                                  │ EmbeddingStore (JSON idx) │
//!                                  └─────────────┬────────────┘
//!                                                ▼
//!                                       top-K cosine search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`extract`] | File-format text extraction and mode inference |
//! | [`chunker`] | Mode-aware splitting, normalization, fingerprints |
//! | [`embedding`] | Embedding provider abstraction and retry policy |
//! | [`store`] | In-memory vector store with JSON persistence |
//! | [`ingest`] | Per-source ingestion pipeline |
//! | [`retrieval`] | Service facade: initialization and queries |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod store;
