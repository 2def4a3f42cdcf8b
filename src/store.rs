//! In-memory embedding store with JSON persistence.
//!
//! An [`EmbeddingStore`] holds one source's indexed vectors in append
//! order and answers similarity queries with a brute-force cosine scan —
//! no approximate index, every query touches every record. The full store
//! round-trips losslessly through a JSON document on disk; vectors persist
//! as `f32`, the precision embedding providers deliver.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{Chunk, IndexedVector, PersistedIndex, SearchHit};

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or a zero-norm side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Ordered collection of (id, text, vector, fingerprint) records for one
/// ingested source.
///
/// The ingestion coordinator is the only writer; queries only read.
/// Fingerprint uniqueness is the caller's contract — [`append`](Self::append)
/// does not re-check it.
#[derive(Debug)]
pub struct EmbeddingStore {
    source: String,
    records: Vec<IndexedVector>,
}

/// Borrowed view serialized on save, so persisting after every append
/// does not clone the record list.
#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    source: &'a str,
    built_at: i64,
    records: &'a [IndexedVector],
}

impl EmbeddingStore {
    /// Create an empty store for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            records: Vec::new(),
        }
    }

    /// Rehydrate a store from a deserialized index document.
    pub fn from_persisted(index: PersistedIndex) -> Self {
        Self {
            source: index.source,
            records: index.records,
        }
    }

    /// The source path this store was built from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a chunk with its embedding. The persisted id is the record's
    /// ordinal position, not the chunk's split-local sequence number.
    pub fn append(&mut self, chunk: &Chunk, embedding: Vec<f32>) {
        self.records.push(IndexedVector {
            id: self.records.len() as i64,
            text: chunk.text.clone(),
            embedding,
            fingerprint: chunk.fingerprint.clone(),
        });
    }

    /// All fingerprints currently indexed. Seed set for deduplication.
    pub fn fingerprints(&self) -> HashSet<String> {
        self.records
            .iter()
            .map(|r| r.fingerprint.clone())
            .collect()
    }

    /// Exhaustive top-K cosine search.
    ///
    /// Scores every stored vector against `query`, keeps those at or above
    /// `min_score`, and returns them sorted descending, truncated to
    /// `top_k`. An empty store yields an empty result, never an error.
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .records
            .iter()
            .map(|r| SearchHit {
                text: r.text.clone(),
                score: cosine_similarity(&r.embedding, query),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    /// Write the full index to `path`, creating parent directories.
    ///
    /// Called after every successful append: a failed write voids the
    /// crash-resilience guarantee, so errors propagate to the caller.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create index directory {}", dir.display()))?;
        }

        let doc = PersistedIndexRef {
            source: &self.source,
            built_at: chrono::Utc::now().timestamp(),
            records: &self.records,
        };
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write index {}", path.display()))?;
        Ok(())
    }

    /// Load the index persisted at `path`, or start empty.
    ///
    /// A missing file is the normal first-run case; a malformed one is
    /// treated as empty with a warning — prior fingerprints are forgotten
    /// and previously seen chunks will be re-embedded.
    pub fn load(path: &Path, source: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no existing index, starting empty");
                return Self::new(source);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index unreadable, starting empty");
                return Self::new(source);
            }
        };

        match serde_json::from_str::<PersistedIndex>(&content) {
            Ok(index) => {
                info!(path = %path.display(), records = index.records.len(), "index loaded");
                Self::from_persisted(index)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index corrupt, starting empty");
                Self::new(source)
            }
        }
    }
}
