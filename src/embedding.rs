//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two concrete backends:
//!
//! - **[`OllamaProvider`]** — calls a local Ollama server's
//!   `POST /api/embeddings` endpoint (the default, `nomic-embed-text`).
//! - **[`OpenAiProvider`]** — calls the OpenAI embeddings API; requires
//!   the `OPENAI_API_KEY` environment variable.
//!
//! Providers are single-shot: one call, one vector, transient failures
//! surface as errors. The bounded-retry policy lives in
//! [`embed_with_retry`], which the ingestion coordinator drives per chunk
//! (up to 3 attempts by default, sleeping `base × 2^attempt` between them).

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::EmbeddingConfig;

/// A black-box `text → vector` collaborator.
///
/// Implementations must return vectors of a fixed dimensionality per
/// model; the engine never inspects dimensions beyond cosine arithmetic.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Embed a single text. May fail transiently (network, model load).
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Instantiate the provider selected by configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Acquire an embedding with bounded retry and exponential backoff.
///
/// Attempts up to `max_retries` calls; after a failed attempt `n`
/// (1-based) sleeps `base_delay × 2^n` before the next one. Returns the
/// last error once attempts are exhausted — the caller decides whether
/// that drops a chunk or fails a query.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<Vec<f32>> {
    let attempts = max_retries.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match provider.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(e) => {
                warn!(
                    attempt,
                    max = attempts,
                    error = %e,
                    "embedding attempt failed"
                );
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed")))
}

// ============ Ollama ============

/// Embedding provider backed by a local Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.host))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let parsed: OllamaEmbeddingResponse = response.json().await?;
        if parsed.embedding.is_empty() {
            bail!("Ollama returned an empty embedding");
        }
        Ok(parsed.embedding)
    }
}

// ============ OpenAI ============

/// Embedding provider backed by the OpenAI embeddings API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingRecord>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingRecord {
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let parsed: OpenAiEmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|r| r.embedding)
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                bail!("transient failure {}", call);
            }
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let provider = FlakyProvider {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let vector = embed_with_retry(&provider, "text", 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_returns_last_error() {
        let provider = FlakyProvider {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = embed_with_retry(&provider, "text", 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transient failure"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "other".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
