//! Query-time retrieval: embed the query, rank stored chunks, assemble a
//! [`ContextBundle`].
//!
//! # Scoring
//!
//! The store ranks by cosine distance `d ∈ [0, 2]`. Bundles expose a
//! relevance score in `[0, 1]`:
//!
//! ```text
//! score = clamp(1 - d / 2, 0, 1)
//! ```
//!
//! so identical direction scores 1, orthogonal 0.5, opposite 0. The same
//! mapping applies to every provider.
//!
//! # Failure policy
//!
//! [`Retriever::search`] never fails: an unreachable store, a failed query
//! embedding, or an empty index all produce an empty bundle and a warning
//! in the log. [`Retriever::try_search`] returns the underlying error.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::models::{ContextBundle, ContextChunk};
use crate::store::{Filter, QueryHit, VectorStore};

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Top `k` chunks for `query`, restricted to one paper when `paper_id`
    /// is given. Degrades to an empty bundle on any failure.
    pub async fn search(&self, query: &str, k: usize, paper_id: Option<&str>) -> ContextBundle {
        match self.try_search(query, k, paper_id).await {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::warn!(error = %e, paper_id, "retrieval degraded to empty context");
                ContextBundle::empty()
            }
        }
    }

    pub async fn try_search(
        &self,
        query: &str,
        k: usize,
        paper_id: Option<&str>,
    ) -> Result<ContextBundle, RetrievalError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(ContextBundle::empty());
        }

        let vector = self.embedder.embed_query(query).await?;
        let filter = paper_id.map(Filter::paper);
        let hits = self.store.query(&vector, k, filter.as_ref()).await?;

        if hits.is_empty() {
            tracing::debug!(paper_id, "no stored chunks matched the query");
        }
        Ok(assemble(hits, k))
    }

    /// Paper-scoped question answering; uses `retrieval.paper_k`.
    pub async fn search_paper(&self, paper_id: &str, query: &str) -> ContextBundle {
        self.search(query, self.config.paper_k, Some(paper_id)).await
    }

    /// Cross-library synthesis; uses `retrieval.library_k`.
    pub async fn search_library(&self, query: &str) -> ContextBundle {
        self.search(query, self.config.library_k, None).await
    }

    /// [`search`](Self::search) with `k` defaulting by scope when `limit`
    /// is `None`: `paper_k` within one paper, `library_k` across the library.
    pub async fn search_scoped(
        &self,
        query: &str,
        limit: Option<usize>,
        paper_id: Option<&str>,
    ) -> ContextBundle {
        match (limit, paper_id) {
            (Some(k), _) => self.search(query, k, paper_id).await,
            (None, Some(paper_id)) => self.search_paper(paper_id, query).await,
            (None, None) => self.search_library(query).await,
        }
    }

    /// Prompt-ready context text for `query`. Empty when nothing matched.
    pub async fn context_for_query(
        &self,
        query: &str,
        limit: Option<usize>,
        paper_id: Option<&str>,
    ) -> String {
        self.search_scoped(query, limit, paper_id).await.render()
    }
}

/// Map a cosine distance to a relevance score in `[0, 1]`.
pub fn relevance_score(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Dedup by chunk id, order by score desc then id asc, keep `k`.
fn assemble(hits: Vec<QueryHit>, k: usize) -> ContextBundle {
    let mut seen = HashSet::new();
    let mut chunks: Vec<ContextChunk> = hits
        .into_iter()
        .filter(|hit| seen.insert(hit.id.clone()))
        .map(|hit| ContextChunk {
            paper_id: hit
                .metadata_str("paper_id")
                .map(String::from)
                .unwrap_or_default(),
            title: hit.metadata_str("title").map(String::from),
            score: relevance_score(hit.distance),
            chunk_id: hit.id,
            text: hit.text,
        })
        .collect();

    chunks.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    chunks.truncate(k);
    ContextBundle { chunks }
}
