// Embeddings module
// Wraps the external embedding service behind a fixed-dimension adapter


pub mod ollama;
pub mod vector;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use ollama::OllamaClient;
pub use vector::Embedding;

/// Text embedded once at startup to learn the model's output dimension
pub const PROBE_TEXT: &str = "test";
/// Stand-in for empty or whitespace-only input
pub const EMPTY_TEXT_PLACEHOLDER: &str = "empty document";
pub const DEFAULT_MAX_EMBEDDING_CHARS: usize = 10_000;
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("embedding service returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("embedding service returned an empty vector")]
    Empty,
    #[error("embedding contains a non-finite value at position {position}")]
    NonFinite { position: usize },
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding task failed: {0}")]
    TaskFailed(String),
}

/// Anything that can turn text into a raw embedding vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Return at most the first `max_chars` characters of `text`
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text.get(..byte_index).unwrap_or(text),
        None => text,
    }
}

/// Store-facing embedding adapter with a fixed output dimension
///
/// The dimension is learned from a probe embedding at construction time and
/// every later embedding is truncated or zero-padded to it.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    max_chars: usize,
    timeout: Duration,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("dimension", &self.dimension)
            .field("max_chars", &self.max_chars)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Build an embedder whose dimension comes from probing `provider`.
    ///
    /// If the probe fails, `fallback_dimension` is used instead.
    #[inline]
    pub async fn probe(
        provider: Arc<dyn EmbeddingProvider>,
        fallback_dimension: usize,
        timeout: Duration,
    ) -> Self {
        let probed = match tokio::time::timeout(timeout, provider.embed(PROBE_TEXT)).await {
            Ok(Ok(values)) => Embedding::new(values).map(|e| e.dimension()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EmbeddingError::Timeout(timeout)),
        };

        let dimension = match probed {
            Ok(dimension) => {
                info!("Embedding model reports {} dimensions", dimension);
                dimension
            }
            Err(e) => {
                warn!(
                    "Dimension probe failed ({}), falling back to {} dimensions",
                    e, fallback_dimension
                );
                fallback_dimension
            }
        };

        Self {
            provider,
            dimension,
            max_chars: DEFAULT_MAX_EMBEDDING_CHARS,
            timeout,
        }
    }

    /// Build an embedder with a known dimension, skipping the probe
    #[inline]
    pub fn with_dimension(provider: Arc<dyn EmbeddingProvider>, dimension: usize) -> Self {
        Self {
            provider,
            dimension,
            max_chars: DEFAULT_MAX_EMBEDDING_CHARS,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Bound the wait for each embedding; see [`Embedder::embed`]
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Apply the placeholder and length policies to raw input
    #[inline]
    pub fn prepare_text<'a>(&self, text: &'a str) -> &'a str {
        if text.trim().is_empty() {
            EMPTY_TEXT_PLACEHOLDER
        } else {
            truncate_chars(text, self.max_chars)
        }
    }

    /// Embed `text` and reconcile the result to the store dimension
    ///
    /// The timeout only bounds how long this call waits. A provider that
    /// works on the blocking pool (such as `OllamaClient`, including its
    /// retries and backoff sleeps) keeps running there until it finishes on
    /// its own, so size `timeout_seconds` and `retry_attempts` together.
    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let prepared = self.prepare_text(text);
        debug!("Embedding text (chars: {})", prepared.chars().count());

        let values = tokio::time::timeout(self.timeout, self.provider.embed(prepared))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))??;

        Ok(self.reconcile(Embedding::new(values)?))
    }

    /// Embed `text`, substituting a zero vector on any failure
    #[inline]
    pub async fn embed_or_zero(&self, text: &str) -> Embedding {
        match self.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding failed, using zero vector: {}", e);
                Embedding::zeros(self.dimension)
            }
        }
    }

    /// Truncate or pad to the store dimension, flagging any mismatch
    #[inline]
    pub fn reconcile(&self, embedding: Embedding) -> Embedding {
        if embedding.dimension() != self.dimension {
            warn!(
                "Embedding dimension mismatch: service returned {}, store expects {}",
                embedding.dimension(),
                self.dimension
            );
        }
        embedding.reconcile(self.dimension)
    }
}
