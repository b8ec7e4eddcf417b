//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and [`HostedProvider`], which
//! serves both hosted backends:
//! - **Voyage AI** `/v1/embeddings`, with separate `document` and `query`
//!   input types.
//! - **OpenAI** `/v1/embeddings`; queries are embedded as one-element
//!   batches.
//!
//! Also provides vector utilities used by the stores:
//! - [`cosine_similarity`] and [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! # Provider Selection
//!
//! [`create_provider`] picks the backend from `embedding.provider` in the
//! configuration. Callers only ever see `Arc<dyn EmbeddingProvider>`.
//!
//! # Retry Strategy
//!
//! Every HTTP attempt resolves to an [`Attempt`]: success, retryable
//! failure, or fatal failure. [`RetryPolicy::run`] is the single bounded
//! loop around those attempts:
//! - timeouts, connection errors, HTTP 408/429/5xx → retry
//! - HTTP 401/403 → authentication failure, no retry
//! - other HTTP 4xx and malformed bodies → fail immediately
//! - backoff: 1s, 2s, 4s (base 1s, factor 2, `max_retries` = 3 by default)

mod hosted;

pub use hosted::HostedProvider;

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Converts text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input
/// order, each of length [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short backend name, e.g. `"voyage"`.
    fn provider_name(&self) -> &str;
    /// Model identifier, e.g. `"voyage-2"`.
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Largest number of texts sent in one request.
    fn max_batch_size(&self) -> usize;

    /// Embed document passages. Inputs larger than
    /// [`max_batch_size`](EmbeddingProvider::max_batch_size) are split
    /// into several requests.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Build the provider named by `config.provider`.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Ok(Arc::new(HostedProvider::new(config)?))
}

/// Output dimension of well-known hosted models.
pub fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "voyage-2" => Some(1024),
        "voyage-large-2" => Some(1536),
        "voyage-code-2" => Some(1536),
        "voyage-3" => Some(1024),
        "voyage-3-lite" => Some(512),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

pub(crate) fn resolve_dims(config: &EmbeddingConfig) -> Result<usize, EmbeddingError> {
    config
        .dims
        .or_else(|| known_dimension(config.model()))
        .ok_or_else(|| {
            EmbeddingError::Configuration(format!(
                "embedding.dims required for unknown model '{}'",
                config.model()
            ))
        })
}

/// API key read from the environment at construction. A missing key is
/// reported on the first request, so commands that never embed still work.
pub(crate) struct ApiKey {
    var: String,
    value: Option<String>,
}

impl ApiKey {
    pub(crate) fn from_env(config: &EmbeddingConfig) -> Self {
        let var = config.api_key_env().to_string();
        let value = std::env::var(&var)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self { var, value }
    }

    pub(crate) fn get(&self) -> Result<&str, EmbeddingError> {
        self.value.as_deref().ok_or_else(|| {
            EmbeddingError::Configuration(format!("{} environment variable not set", self.var))
        })
    }
}

pub(crate) fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbeddingError::Configuration(format!("failed to build HTTP client: {}", e)))
}

// ============ Retry ============

/// Outcome of a single provider request.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(EmbeddingError),
    Fatal(EmbeddingError),
}

/// Bounded exponential backoff around provider requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(retry.saturating_sub(1))
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retryable(err) => {
                    if retry >= self.max_retries {
                        tracing::warn!(provider, retries = retry, error = %err, "embedding retries exhausted");
                        return Err(err);
                    }
                    retry += 1;
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        provider,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying embedding request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn status_failure<T>(provider: &str, status: u16, body: &str) -> Attempt<T> {
    let message = truncate(body, 300);
    match status {
        408 | 429 | 500..=599 => Attempt::Retryable(EmbeddingError::transient(
            provider,
            format!("HTTP {}: {}", status, message),
        )),
        401 | 403 => Attempt::Fatal(EmbeddingError::Authentication {
            provider: provider.to_string(),
            message: format!("HTTP {}: {}", status, message),
        }),
        _ => Attempt::Fatal(EmbeddingError::InvalidRequest {
            provider: provider.to_string(),
            status,
            message,
        }),
    }
}

/// Classify a transport-level failure.
pub(crate) fn transport_failure<T>(provider: &str, err: reqwest::Error) -> Attempt<T> {
    if err.is_decode() || err.is_builder() {
        Attempt::Fatal(EmbeddingError::malformed(provider, err.to_string()))
    } else {
        Attempt::Retryable(EmbeddingError::transient(provider, err.to_string()))
    }
}

/// POST an embeddings request and decode an OpenAI-shaped response body.
pub(crate) async fn post_embeddings(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Attempt<Vec<Vec<f32>>> {
    let response = match client.post(url).bearer_auth(api_key).json(body).send().await {
        Ok(response) => response,
        Err(e) => return transport_failure(provider, e),
    };

    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return transport_failure(provider, e),
    };

    if !status.is_success() {
        return status_failure(provider, status.as_u16(), &text);
    }

    match parse_embedding_response(provider, &text) {
        Ok(vectors) => Attempt::Success(vectors),
        Err(e) => Attempt::Fatal(e),
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

/// Parse `{"data": [{"embedding": [...], "index": n}, ...]}` and return
/// the vectors ordered by `index`.
pub(crate) fn parse_embedding_response(
    provider: &str,
    body: &str,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::malformed(provider, format!("invalid JSON body: {}", e)))?;

    parsed.data.sort_by_key(|d| d.index);
    for (expected, datum) in parsed.data.iter().enumerate() {
        if datum.index != expected {
            return Err(EmbeddingError::malformed(
                provider,
                format!("response indices are not contiguous at {}", expected),
            ));
        }
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

/// Check that a response holds one vector of `dims` length per input.
pub(crate) fn check_vectors(
    provider: &str,
    expected_count: usize,
    dims: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::malformed(
            provider,
            format!("expected {} vectors, got {}", expected_count, vectors.len()),
        ));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
        return Err(EmbeddingError::malformed(
            provider,
            format!("vector {} has {} dimensions, expected {}", i, v.len(), dims),
        ));
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use paper_index::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
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

    (dot / denom).clamp(-1.0, 1.0)
}

/// Cosine distance `1 - cos(θ)`, in `[0.0, 2.0]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}
