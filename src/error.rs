//! Error types for the indexing and retrieval pipeline.
//!
//! Each stage has its own enum so callers can tell a transient embedding
//! outage from a duplicate paper without string matching. The binary wraps
//! all of them in `anyhow` at the edge.

use thiserror::Error;

/// Chunker input errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("cannot chunk empty text")]
    EmptyText,

    #[error("invalid chunking parameters: chunk_size_tokens={chunk_size}, overlap_tokens={overlap}")]
    InvalidParameters { chunk_size: usize, overlap: usize },
}

/// Embedding provider failures, classified by whether a retry can help.
#[derive(Debug, Error, Clone)]
pub enum EmbeddingError {
    /// Timeouts, dropped connections, rate limits, 5xx.
    #[error("{provider}: transient failure: {message}")]
    Transient { provider: String, message: String },

    #[error("{provider}: authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider}: request rejected with status {status}: {message}")]
    InvalidRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider}: malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("embedding configuration error: {0}")]
    Configuration(String),
}

impl EmbeddingError {
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("collection '{collection}' stores {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid vector record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("corrupt vector store entry '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("paper catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique identifier is already held by another live paper.
    #[error("paper '{paper_id}' conflicts with an existing record: {reason}")]
    Conflict { paper_id: String, reason: String },

    #[error("corrupt paper record '{paper_id}': {reason}")]
    Corrupt { paper_id: String, reason: String },
}

/// Which external identifier matched during duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKey {
    Doi,
    ArxivId,
}

impl std::fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateKey::Doi => f.write_str("DOI"),
            DuplicateKey::ArxivId => f.write_str("arXiv id"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Not fatal: the paper is already indexed under `existing_id`.
    #[error("paper duplicates '{existing_id}' by {matched_on}")]
    Duplicate {
        existing_id: String,
        matched_on: DuplicateKey,
    },

    #[error("paper not found: {0}")]
    NotFound(String),

    #[error("paper '{0}' has been removed")]
    Removed(String),

    #[error("ingestion of paper '{0}' was cancelled")]
    Cancelled(String),

    #[error("ingestion worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] VectorStoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl IngestError {
    /// The id of the already-indexed paper when this is a duplicate rejection.
    pub fn existing_paper_id(&self) -> Option<&str> {
        match self {
            IngestError::Duplicate { existing_id, .. } => Some(existing_id),
            _ => None,
        }
    }
}

/// Why a retrieval produced nothing. Only surfaced by `Retriever::try_search`.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector store unavailable: {0}")]
    Unavailable(#[from] VectorStoreError),

    #[error("query embedding failed: {0}")]
    QueryEmbedding(#[from] EmbeddingError),
}
