//! Retrieval facade: multi-source initialization and the query API.
//!
//! A [`RetrievalService`] owns the embedding provider handle and one
//! [`EmbeddingStore`] per ingested source — there is no process-wide
//! state. Initialization is an explicit awaited call that reports
//! per-source outcomes; a failing source never aborts the others.
//!
//! Queries embed the text once and fan out across every loaded store,
//! merge-ranking the combined hits. Provider failures degrade to an empty
//! result so the conversational layer sees "no relevant context found"
//! instead of a transport error.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::ingest;
use crate::models::{IngestStats, SearchHit};
use crate::store::EmbeddingStore;

/// Result of ingesting one configured source.
pub struct SourceOutcome {
    pub source: PathBuf,
    pub outcome: Result<IngestStats>,
}

/// Per-source outcomes of one initialization pass.
pub struct InitSummary {
    pub sources: Vec<SourceOutcome>,
}

impl InitSummary {
    /// Chunks appended across all successful sources.
    pub fn total_appended(&self) -> usize {
        self.sources
            .iter()
            .filter_map(|s| s.outcome.as_ref().ok())
            .map(|stats| stats.chunks_appended)
            .sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.outcome.is_err()).count()
    }
}

/// The engine facade consumed by the conversational layer.
pub struct RetrievalService {
    config: Config,
    provider: Box<dyn EmbeddingProvider>,
    stores: Vec<EmbeddingStore>,
}

impl RetrievalService {
    pub fn new(config: Config, provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            provider,
            stores: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loaded stores, one per source with a usable index.
    pub fn stores(&self) -> &[EmbeddingStore] {
        &self.stores
    }

    /// Ingest every configured source, sequentially, in config order.
    ///
    /// Invalid exclusion globs fail fast; anything that goes wrong with an
    /// individual source is captured in its [`SourceOutcome`] and logged,
    /// and the remaining sources still run.
    pub async fn initialize(&mut self) -> Result<InitSummary> {
        let exclude = ingest::build_globset(&self.config.sources.exclude_globs)?;
        let paths = self.config.sources.paths.clone();

        let mut summary = InitSummary {
            sources: Vec::new(),
        };

        for source in paths {
            let result =
                ingest::ingest_source(&self.config, self.provider.as_ref(), &source, &exclude)
                    .await;
            match result {
                Ok((store, stats)) => {
                    self.upsert_store(store);
                    summary.sources.push(SourceOutcome {
                        source,
                        outcome: Ok(stats),
                    });
                }
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "source ingestion failed");
                    summary.sources.push(SourceOutcome {
                        source,
                        outcome: Err(e),
                    });
                }
            }
        }

        info!(
            appended = summary.total_appended(),
            failed_sources = summary.failed_sources(),
            "initialization finished"
        );
        Ok(summary)
    }

    /// Load the persisted indices for all configured sources without
    /// re-ingesting. Returns the number of non-empty stores loaded.
    ///
    /// For query-only process lifecycles; sources whose index is absent or
    /// corrupt simply contribute nothing.
    pub fn open(&mut self) -> usize {
        for source in self.config.sources.paths.clone() {
            let path = ingest::index_path_for(&self.config.index.dir, &source);
            let store = EmbeddingStore::load(&path, source.display().to_string().as_str());
            if !store.is_empty() {
                self.upsert_store(store);
            }
        }
        self.stores.len()
    }

    /// Top-K similarity search across all loaded stores.
    ///
    /// Embeds the query once, searches every store, merges the hits,
    /// re-sorts by score descending, and truncates to `top_k`. Empty
    /// stores and provider failures both yield an empty result — the
    /// latter with a warning, never an error.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f32) -> Vec<SearchHit> {
        if query.trim().is_empty() || self.stores.iter().all(|s| s.is_empty()) {
            return Vec::new();
        }

        let query_vec = match self.provider.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, returning no context");
                return Vec::new();
            }
        };

        let mut hits: Vec<SearchHit> = self
            .stores
            .iter()
            .flat_map(|store| store.search(&query_vec, top_k, min_score))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    fn upsert_store(&mut self, store: EmbeddingStore) {
        self.stores.retain(|s| s.source() != store.source());
        self.stores.push(store);
    }
}
