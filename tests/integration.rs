//! End-to-end pipeline tests driven through the library API with a
//! deterministic in-test embedding provider and temporary source trees.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use grounding::chunker;
use grounding::config::{Config, EmbeddingConfig, IndexConfig, SourcesConfig};
use grounding::embedding::EmbeddingProvider;
use grounding::ingest;
use grounding::models::PersistedIndex;
use grounding::retrieval::RetrievalService;

/// Deterministic pseudo-embedding: identical normalized text yields an
/// identical vector, distinct text yields an unrelated one.
fn embed_deterministic(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(chunker::normalize(text).as_bytes());
    digest[..16]
        .iter()
        .map(|b| (f32::from(*b) - 127.5) / 127.5)
        .collect()
}

/// Provider that records every call and optionally fails whenever the
/// text contains a marker substring.
struct TestProvider {
    fail_marker: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl TestProvider {
    fn boxed(calls: Arc<Mutex<Vec<String>>>, fail_marker: Option<&str>) -> Box<Self> {
        Box::new(Self {
            fail_marker: fail_marker.map(str::to_string),
            calls,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for TestProvider {
    fn model_name(&self) -> &str {
        "test-embed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker) {
                bail!("simulated provider outage");
            }
        }
        Ok(embed_deterministic(text))
    }
}

fn test_config(tmp: &TempDir, paths: Vec<PathBuf>, exclude_globs: Vec<String>) -> Config {
    Config {
        index: IndexConfig {
            dir: tmp.path().join("data"),
        },
        chunking: Default::default(),
        retrieval: Default::default(),
        embedding: EmbeddingConfig {
            retry_base_ms: 1,
            ..Default::default()
        },
        sources: SourcesConfig {
            paths,
            exclude_globs,
        },
    }
}

fn read_index(config: &Config, source: &Path) -> PersistedIndex {
    let path = ingest::index_path_for(&config.index.dir, source);
    let content = std::fs::read_to_string(&path).expect("index file must exist");
    serde_json::from_str(&content).expect("index file must parse")
}

const GUIDE_MD: &str = "\
## Install Steps

run the installer and follow the prompts carefully

## Configuration

edit the settings file before the first launch
";

fn write_guide_tree(tmp: &TempDir) -> PathBuf {
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(docs.join("nested")).unwrap();
    std::fs::write(docs.join("guide.md"), GUIDE_MD).unwrap();
    std::fs::write(
        docs.join("nested").join("notes.log"),
        "forbidden log content that must never reach the index",
    )
    .unwrap();
    std::fs::write(
        docs.join("secret.txt"),
        "forbidden secret content that must never reach the index",
    )
    .unwrap();
    docs
}

#[tokio::test]
async fn end_to_end_markdown_directory_with_exclusions() {
    let tmp = TempDir::new().unwrap();
    let docs = write_guide_tree(&tmp);
    let config = test_config(
        &tmp,
        vec![docs.clone()],
        vec!["**/*.log".to_string(), "secret*".to_string()],
    );

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service = RetrievalService::new(config.clone(), TestProvider::boxed(calls, None));
    let summary = service.initialize().await.unwrap();

    assert_eq!(summary.failed_sources(), 0);
    assert_eq!(summary.total_appended(), 2);

    let index = read_index(&config, &docs);
    assert_eq!(index.records.len(), 2);
    let texts: Vec<&str> = index.records.iter().map(|r| r.text.as_str()).collect();
    assert!(texts.iter().any(|t| t.starts_with("Install Steps\n\n")));
    assert!(texts.iter().any(|t| t.starts_with("Configuration\n\n")));
    for text in &texts {
        assert!(!text.contains("forbidden"));
    }
    for (i, record) in index.records.iter().enumerate() {
        assert_eq!(record.id, i as i64);
    }
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let docs = write_guide_tree(&tmp);
    let config = test_config(&tmp, vec![docs.clone()], vec!["**/*.log".to_string()]);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    service.initialize().await.unwrap();
    let first = read_index(&config, &docs);

    // Fresh service, same sources: nothing new to embed.
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    let summary = service.initialize().await.unwrap();
    assert_eq!(summary.total_appended(), 0);

    let second = read_index(&config, &docs);
    assert_eq!(first.records.len(), second.records.len());
    let fp = |idx: &PersistedIndex| {
        let mut f: Vec<String> = idx.records.iter().map(|r| r.fingerprint.clone()).collect();
        f.sort();
        f
    };
    assert_eq!(fp(&first), fp(&second));
}

#[tokio::test]
async fn retry_exhaustion_drops_the_chunk_and_run_completes() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("mixed.md"),
        "## Good Section\n\nthis section embeds fine and lands in the index\n\n\
         ## Broken Section\n\npoison marker forces the provider to fail every attempt\n",
    )
    .unwrap();
    let config = test_config(&tmp, vec![docs.clone()], Vec::new());

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service = RetrievalService::new(
        config.clone(),
        TestProvider::boxed(calls.clone(), Some("poison")),
    );
    let summary = service.initialize().await.unwrap();

    assert_eq!(summary.failed_sources(), 0);
    let stats = summary.sources[0].outcome.as_ref().unwrap();
    assert_eq!(stats.chunks_appended, 1);
    assert_eq!(stats.chunks_failed, 1);

    let index = read_index(&config, &docs);
    assert_eq!(index.records.len(), 1);
    assert!(index.records[0].text.contains("embeds fine"));
    let poisoned = chunker::fingerprint(
        "Broken Section\n\npoison marker forces the provider to fail every attempt",
    );
    assert!(index.records.iter().all(|r| r.fingerprint != poisoned));

    // Three attempts for the failing chunk, one for the good one.
    let poison_calls = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.contains("poison"))
        .count();
    assert_eq!(poison_calls, 3);
}

#[tokio::test]
async fn interrupted_run_resumes_without_reembedding() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("mixed.md"),
        "## Good Section\n\nthis section embeds fine and lands in the index\n\n\
         ## Broken Section\n\npoison marker forces the provider to fail every attempt\n",
    )
    .unwrap();
    let config = test_config(&tmp, vec![docs.clone()], Vec::new());
    let calls = Arc::new(Mutex::new(Vec::new()));

    // First run: the provider is down for one chunk.
    let mut service = RetrievalService::new(
        config.clone(),
        TestProvider::boxed(calls.clone(), Some("poison")),
    );
    service.initialize().await.unwrap();
    assert_eq!(read_index(&config, &docs).records.len(), 1);

    // Second run: provider recovered. Only the dropped chunk is embedded.
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    let summary = service.initialize().await.unwrap();
    assert_eq!(summary.total_appended(), 1);
    assert_eq!(read_index(&config, &docs).records.len(), 2);

    let good_calls = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.contains("embeds fine"))
        .count();
    assert_eq!(good_calls, 1, "already-persisted chunk must not re-embed");
}

#[tokio::test]
async fn corrupt_index_recovers_as_a_fresh_run() {
    let tmp = TempDir::new().unwrap();
    let docs = write_guide_tree(&tmp);
    let config = test_config(&tmp, vec![docs.clone()], vec!["**/*.log".to_string()]);

    let index_path = ingest::index_path_for(&config.index.dir, &docs);
    std::fs::create_dir_all(index_path.parent().unwrap()).unwrap();
    std::fs::write(&index_path, "{ definitely not an index").unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service = RetrievalService::new(config.clone(), TestProvider::boxed(calls, None));
    let summary = service.initialize().await.unwrap();

    assert_eq!(summary.failed_sources(), 0);
    assert_eq!(summary.total_appended(), 3);
    assert_eq!(read_index(&config, &docs).records.len(), 3);
}

#[tokio::test]
async fn failing_source_does_not_abort_the_others() {
    let tmp = TempDir::new().unwrap();
    let docs = write_guide_tree(&tmp);
    let missing = tmp.path().join("does-not-exist");
    let config = test_config(
        &tmp,
        vec![missing.clone(), docs.clone()],
        vec!["**/*.log".to_string(), "secret*".to_string()],
    );

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service = RetrievalService::new(config.clone(), TestProvider::boxed(calls, None));
    let summary = service.initialize().await.unwrap();

    assert_eq!(summary.failed_sources(), 1);
    assert!(summary.sources[0].outcome.is_err());
    assert_eq!(summary.total_appended(), 2);
    assert_eq!(read_index(&config, &docs).records.len(), 2);
}

#[tokio::test]
async fn search_merges_across_sources_and_honors_thresholds() {
    let tmp = TempDir::new().unwrap();
    let alpha = tmp.path().join("alpha");
    let beta = tmp.path().join("beta");
    std::fs::create_dir_all(&alpha).unwrap();
    std::fs::create_dir_all(&beta).unwrap();
    std::fs::write(
        alpha.join("a.txt"),
        "the alpha corpus talks about orchard irrigation systems",
    )
    .unwrap();
    std::fs::write(
        beta.join("b.txt"),
        "the beta corpus covers submarine navigation procedures",
    )
    .unwrap();
    let config = test_config(&tmp, vec![alpha, beta], Vec::new());

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    service.initialize().await.unwrap();

    // Exact-text query embeds to the identical vector: cosine 1.0.
    let hits = service
        .search(
            "the beta corpus covers submarine navigation procedures",
            5,
            0.9,
        )
        .await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("submarine"));
    assert!(hits[0].score > 0.99);

    // With no threshold both corpora rank, best first, never ascending.
    let hits = service
        .search("the alpha corpus talks about orchard irrigation systems", 5, -1.0)
        .await;
    assert_eq!(hits.len(), 2);
    assert!(hits[0].text.contains("orchard"));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    // Degraded provider: empty result, not an error.
    let mut service = RetrievalService::new(
        config.clone(),
        TestProvider::boxed(calls, Some("outage-query")),
    );
    assert!(service.open() >= 2);
    let hits = service.search("outage-query text", 5, 0.0).await;
    assert!(hits.is_empty());
}

#[tokio::test]
async fn query_only_open_loads_persisted_indices() {
    let tmp = TempDir::new().unwrap();
    let docs = write_guide_tree(&tmp);
    let config = test_config(
        &tmp,
        vec![docs.clone()],
        vec!["**/*.log".to_string(), "secret*".to_string()],
    );

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    service.initialize().await.unwrap();
    drop(service);

    // A fresh process: open without ingesting, then query.
    let mut service =
        RetrievalService::new(config.clone(), TestProvider::boxed(calls.clone(), None));
    assert_eq!(service.open(), 1);

    let query = "Install Steps run the installer and follow the prompts carefully";
    let hits = service.search(query, 5, 0.9).await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.starts_with("Install Steps"));

    // Ingestion must not have been triggered by open/search: each chunk
    // text (distinguished from the query by its heading separator) was
    // embedded exactly once, during the first run.
    let ingest_calls = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.contains("\n\n"))
        .count();
    assert_eq!(ingest_calls, 2);
}
