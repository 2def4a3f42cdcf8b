//! Ingestion pipeline orchestration.
//!
//! Drives one run per source: resolve file vs directory, extract
//! documents, chunk per mode, deduplicate against everything already
//! indexed, and acquire embeddings with bounded retry. The index is
//! persisted after every successful append, so an interrupted run loses at
//! most the chunk in flight and resumes via fingerprint dedup on the next
//! invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker;
use crate::config::Config;
use crate::embedding::{embed_with_retry, EmbeddingProvider};
use crate::extract;
use crate::models::{ExtractedDocument, IngestStats};
use crate::store::EmbeddingStore;

/// Compile exclusion patterns into a matcher. Invalid patterns fail the
/// whole run up front rather than silently not excluding.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Deterministic index file location for a source path.
///
/// Derived from the source's base name (non-filename characters mapped to
/// `_`), so two configured sources must not share a base name.
pub fn index_path_for(index_dir: &Path, source: &Path) -> PathBuf {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    index_dir.join(format!("{}.json", sanitized))
}

/// Ingest one source into its persisted index.
///
/// Returns the up-to-date store plus run counters. Extraction failures
/// and exhausted embedding retries are logged skips; persistence failures
/// propagate because they void the crash-resilience guarantee.
pub async fn ingest_source(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    source: &Path,
    exclude: &GlobSet,
) -> Result<(EmbeddingStore, IngestStats)> {
    info!(source = %source.display(), "ingestion started");

    let documents = collect_documents(source, exclude)?;
    let index_path = index_path_for(&config.index.dir, source);
    let mut store = EmbeddingStore::load(&index_path, source.display().to_string().as_str());
    let mut existing = store.fingerprints();

    let mut stats = IngestStats {
        documents: documents.len(),
        ..Default::default()
    };
    let base_delay = Duration::from_millis(config.embedding.retry_base_ms);

    for doc in &documents {
        let chunks = chunker::split(
            &doc.text,
            config.chunking.chunk_size,
            config.chunking.overlap,
            doc.mode,
        );
        let candidates = chunks.len();
        let unique = chunker::deduplicate(chunks, &existing);
        stats.chunks_duplicate += candidates - unique.len();

        for chunk in unique {
            // A document can repeat itself; re-check against what this run
            // has appended since the dedup pass.
            if existing.contains(&chunk.fingerprint) {
                stats.chunks_duplicate += 1;
                continue;
            }

            match embed_with_retry(
                provider,
                &chunk.text,
                config.embedding.max_retries,
                base_delay,
            )
            .await
            {
                Ok(vector) => {
                    store.append(&chunk, vector);
                    store.save(&index_path)?;
                    existing.insert(chunk.fingerprint.clone());
                    stats.chunks_appended += 1;
                }
                Err(e) => {
                    warn!(
                        source = %doc.source,
                        chunk = chunk.id,
                        error = %e,
                        "dropping chunk after exhausted retries"
                    );
                    stats.chunks_failed += 1;
                }
            }
        }
    }

    store.save(&index_path)?;
    stats.total_indexed = store.len();

    info!(
        source = %source.display(),
        documents = stats.documents,
        appended = stats.chunks_appended,
        duplicates = stats.chunks_duplicate,
        failed = stats.chunks_failed,
        total = stats.total_indexed,
        "ingestion finished"
    );

    Ok((store, stats))
}

/// Resolve a source path into extracted documents.
///
/// A file yields at most one document; a directory is walked recursively,
/// excluded relative paths are dropped, and the remainder is sorted so
/// runs are deterministic.
fn collect_documents(source: &Path, exclude: &GlobSet) -> Result<Vec<ExtractedDocument>> {
    if !source.exists() {
        bail!("source path does not exist: {}", source.display());
    }

    if source.is_file() {
        return Ok(extract_logged(source).into_iter().collect());
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(source) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(source).unwrap_or(path);
        if exclude.is_match(relative) {
            debug!(path = %path.display(), "skipping excluded path");
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();

    Ok(paths.iter().filter_map(|p| extract_logged(p)).collect())
}

fn extract_logged(path: &Path) -> Option<ExtractedDocument> {
    match extract::extract_file(path) {
        Ok(Some(doc)) => Some(doc),
        Ok(None) => {
            debug!(path = %path.display(), "unsupported file format, skipping");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "extraction failed, skipping file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_derive_from_source_base_name() {
        let dir = Path::new("/var/idx");
        assert_eq!(
            index_path_for(dir, Path::new("/home/user/docs")),
            Path::new("/var/idx/docs.json")
        );
        assert_eq!(
            index_path_for(dir, Path::new("./fnp.pdf")),
            Path::new("/var/idx/fnp.pdf.json")
        );
        assert_eq!(
            index_path_for(dir, Path::new("/tmp/weird name?.txt")),
            Path::new("/var/idx/weird_name_.txt.json")
        );
    }

    #[test]
    fn globset_rejects_invalid_patterns() {
        assert!(build_globset(&["**/*.log".to_string()]).is_ok());
        assert!(build_globset(&["a{".to_string()]).is_err());
    }

    #[test]
    fn missing_source_is_an_error() {
        let exclude = build_globset(&[]).unwrap();
        assert!(collect_documents(Path::new("/definitely/not/here"), &exclude).is_err());
    }
}
