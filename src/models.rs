//! Core data models used throughout the grounding pipeline.
//!
//! These types represent the documents, chunks, and indexed records that
//! flow from extraction through chunking and embedding into the persisted
//! index, plus the search results returned to callers.

use serde::{Deserialize, Serialize};

/// How a document's text is split into chunks.
///
/// Chosen per file by [`crate::extract::mode_for_extension`]; also usable
/// directly when chunking text that never touched the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Sliding window over whitespace tokens. The default for prose.
    Words,
    /// One chunk per non-blank line. For row-oriented tabular sources.
    Lines,
    /// Blank-line-delimited blocks, kept whole when small enough.
    Code,
    /// Sections cut at `##`/`###` headings, prefixed with their `##` title.
    Markdown,
}

impl Default for ChunkMode {
    fn default() -> Self {
        ChunkMode::Words
    }
}

/// A document produced by extraction, ready for chunking.
///
/// Ephemeral: consumed by the chunker, never persisted.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Extracted plain text.
    pub text: String,
    /// Splitting mode inferred from the file extension.
    pub mode: ChunkMode,
    /// Display name of the origin (file name).
    pub source: String,
}

/// A candidate retrievable unit produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Sequence number within one split call. Not globally stable.
    pub id: i64,
    /// Post-split text as shown to users (pre-normalization).
    pub text: String,
    /// Hex SHA-256 of the normalized text. The dedup identity.
    pub fingerprint: String,
}

/// A chunk plus its embedding — the unit of persistence.
///
/// Vectors are stored as `f32`, matching what embedding providers return;
/// JSON round-trips them exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVector {
    /// Ordinal position within the index, assigned on append.
    pub id: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub fingerprint: String,
}

/// On-disk form of one source's index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// The source path this index was built from.
    pub source: String,
    /// Unix timestamp of the last write.
    pub built_at: i64,
    /// Ordered records, in append order.
    pub records: Vec<IndexedVector>,
}

/// A ranked passage returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
}

/// Counters for one source's ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Documents extracted (files that produced text).
    pub documents: usize,
    /// Chunks embedded and appended in this run.
    pub chunks_appended: usize,
    /// Candidates skipped because their fingerprint was already indexed.
    pub chunks_duplicate: usize,
    /// Chunks dropped after exhausting embedding retries.
    pub chunks_failed: usize,
    /// Total records in the index after the run.
    pub total_indexed: usize,
}
