//! Mode-aware text chunker.
//!
//! Splits document text into candidate [`Chunk`]s according to a
//! [`ChunkMode`], drops candidates that fail validation, and fingerprints
//! the survivors with a SHA-256 hash of their *normalized* text. Two
//! chunks that differ only in casing, punctuation, or whitespace collapse
//! to the same fingerprint, which is what makes deduplication and
//! idempotent re-ingestion work.
//!
//! Splitting never fails on well-formed input; everything here is pure
//! except for diagnostic logging.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{Chunk, ChunkMode};

/// Minimum normalized length for a chunk to be worth indexing.
const MIN_CHUNK_CHARS: usize = 10;
/// Maximum normalized length; anything larger is a splitting bug upstream.
const MAX_CHUNK_CHARS: usize = 10_000;
/// Divisor in the code-block token estimate (chars per token for dense code).
const CODE_CHARS_PER_TOKEN: usize = 50;

/// Normalize text for validation and fingerprinting: keep only letters,
/// digits, and whitespace (Unicode-aware), collapse whitespace runs to
/// single spaces, trim, and lower-case.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A chunk is valid when its normalized form is between 10 and 10000
/// characters and contains at least one Latin/Cyrillic letter or digit.
pub fn is_valid(text: &str) -> bool {
    let clean = normalize(text);
    let len = clean.chars().count();
    (MIN_CHUNK_CHARS..=MAX_CHUNK_CHARS).contains(&len)
        && clean.chars().any(is_latin_cyrillic_alnum)
}

fn is_latin_cyrillic_alnum(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('а'..='я').contains(&c) || ('А'..='Я').contains(&c) || c == 'ё' || c == 'Ё'
}

/// Hex-encoded SHA-256 of the normalized text. Deterministic across runs;
/// the deduplication identity of a chunk.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `text` into validated, fingerprinted chunks.
///
/// `chunk_size` and `overlap` are word counts; they only apply to
/// [`ChunkMode::Words`] windows (including the oversized-block fallback in
/// [`ChunkMode::Code`]). Invalid candidates are dropped silently.
/// Surviving chunks are numbered `0..n` in input order.
pub fn split(text: &str, chunk_size: usize, overlap: usize, mode: ChunkMode) -> Vec<Chunk> {
    let raw = match mode {
        ChunkMode::Words => split_words(text, chunk_size, overlap),
        ChunkMode::Lines => split_lines(text),
        ChunkMode::Code => split_code(text, chunk_size, overlap),
        ChunkMode::Markdown => split_markdown(text),
    };

    let candidates = raw.len();
    let mut chunks = Vec::new();
    for raw_text in raw {
        if is_valid(&raw_text) {
            chunks.push(Chunk {
                id: chunks.len() as i64,
                fingerprint: fingerprint(&raw_text),
                text: raw_text,
            });
        }
    }

    debug!(
        mode = ?mode,
        candidates,
        kept = chunks.len(),
        chunk_size,
        overlap,
        "split text into chunks"
    );

    chunks
}

/// Drop chunks whose fingerprint is already present. Order-preserving.
pub fn deduplicate(chunks: Vec<Chunk>, existing: &HashSet<String>) -> Vec<Chunk> {
    let before = chunks.len();
    let unique: Vec<Chunk> = chunks
        .into_iter()
        .filter(|c| !existing.contains(&c.fingerprint))
        .collect();
    debug!(before, after = unique.len(), "deduplicated chunks");
    unique
}

/// Sliding window of `chunk_size` words stepping back `overlap` words.
/// The last window may be shorter; the walk stops once a window reaches
/// the end of input.
fn split_words(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    // Config validation already enforces overlap < chunk_size; clamp so a
    // bad caller cannot stall the window.
    let step_back = overlap.min(chunk_size - 1);

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        out.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start = end - step_back;
    }
    out
}

/// One candidate per non-blank trimmed line.
fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Blank-line-delimited blocks. Blocks small enough to fit `2 × chunk_size`
/// estimated tokens are kept whole (preserving function/class boundaries);
/// oversized blocks degrade to the words-mode window.
fn split_code(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }

    let mut out = Vec::new();
    for block in blocks {
        if estimated_tokens(&block) <= 2 * chunk_size {
            out.push(block);
        } else {
            out.extend(split_words(&block, chunk_size, overlap));
        }
    }
    out
}

/// Word count plus a char-count correction for code density.
fn estimated_tokens(block: &str) -> usize {
    block.split_whitespace().count() + block.chars().count() / CODE_CHARS_PER_TOKEN
}

/// Split at `##`/`###` heading boundaries. Every section is prefixed with
/// the nearest preceding `##` title so a chunk stays interpretable out of
/// context; `###` heading lines remain in their section body. Preamble
/// before the first heading becomes an unprefixed candidate.
fn split_markdown(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    // Title governing the section currently being accumulated.
    let mut section_title: Option<String> = None;
    // Most recent ## title seen, inherited by following ### sections.
    let mut current_h2: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            flush_section(&mut out, &section_title, &mut body);
            current_h2 = Some(title.trim().to_string());
            section_title = current_h2.clone();
        } else if line.starts_with("### ") {
            flush_section(&mut out, &section_title, &mut body);
            section_title = current_h2.clone();
            body.push(line);
        } else {
            body.push(line);
        }
    }
    flush_section(&mut out, &section_title, &mut body);
    out
}

fn flush_section(out: &mut Vec<String>, title: &Option<String>, body: &mut Vec<&str>) {
    let joined = body.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        match title {
            Some(t) => out.push(format!("{}\n\n{}", t, trimmed)),
            None => out.push(trimmed.to_string()),
        }
    }
    body.clear();
}
