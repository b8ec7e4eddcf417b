//! Paper ingestion and re-indexing.
//!
//! The [`IngestionCoordinator`] owns each paper's indexing lifecycle:
//!
//! ```text
//! PaperInput ──▶ dedup check ──▶ chunk ──▶ embed (batched) ──▶ upsert ──▶ drop stale ids
//!                    │                                              │
//!                    ▼                                              ▼
//!               Duplicate error                             status = indexed
//! ```
//!
//! Re-indexing never empties a paper's slice of the index. New chunks are
//! embedded in full, written in one atomic upsert (chunk ids are
//! `{paper_id}:{index}`, so surviving positions are replaced in place), and
//! only then are ids from the previous run that no longer exist deleted.
//! Any failure before the upsert leaves the previous chunk set untouched
//! and marks the paper `failed`. A run only stores a paper's new title,
//! identifiers and text once their chunks are written, so a failed
//! re-ingest leaves the catalog describing what is actually indexed.
//!
//! A paper whose first run failed does not hold its DOI or arXiv id;
//! ingesting it again without an explicit id retries under the same record.
//!
//! Operations on one paper are serialized through a per-paper async mutex;
//! different papers proceed in parallel. Duplicate detection and first
//! registration share a second lock so two concurrent ingestions cannot
//! both claim the same DOI or arXiv id.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::catalog::PaperCatalog;
use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{ChunkingError, IngestError};
use crate::identifiers::{normalize_arxiv_id, normalize_doi};
use crate::models::{Chunk, IndexStatus, Paper, PaperInput};
use crate::store::{DeleteSelector, Filter, Metadata, VectorRecord, VectorStore};

/// Cooperative cancellation flag, checked between embedding batches and
/// before the store write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one successful indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub paper_id: String,
    pub chunks_written: usize,
    /// Chunks from the previous run that no longer exist.
    pub stale_removed: usize,
    pub reindexed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexSummary {
    pub total: usize,
    pub indexed: usize,
    pub total_chunks: usize,
    /// `(paper_id, error)` for every paper that failed.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub dimension: Option<usize>,
    pub model: String,
    pub total_chunks: usize,
    /// Papers per status name, tombstones included.
    pub papers_by_status: BTreeMap<String, usize>,
    /// Papers in the `indexed` state.
    pub indexed_papers: usize,
    /// Mean `chunk_count` over `indexed` papers.
    pub avg_chunks_per_paper: f64,
}

pub struct IngestionCoordinator {
    catalog: Arc<dyn PaperCatalog>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    paper_locks: DashMap<String, Arc<Mutex<()>>>,
    registration: Mutex<()>,
}

impl IngestionCoordinator {
    pub fn new(
        catalog: Arc<dyn PaperCatalog>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            embedder,
            chunking,
            paper_locks: DashMap::new(),
            registration: Mutex::new(()),
        }
    }

    /// Index a paper, or re-index it when `input.paper_id` is already live.
    pub async fn ingest(&self, input: PaperInput) -> Result<IngestReport, IngestError> {
        self.ingest_with_cancel(input, &CancelToken::new()).await
    }

    pub async fn ingest_with_cancel(
        &self,
        input: PaperInput,
        cancel: &CancelToken,
    ) -> Result<IngestReport, IngestError> {
        let doi = input.metadata.doi.as_deref().and_then(normalize_doi);
        let arxiv_id = input.metadata.arxiv_id.as_deref().and_then(normalize_arxiv_id);

        let paper_id = match input.paper_id.clone().filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => match self
                .catalog
                .find_unfinished(doi.as_deref(), arxiv_id.as_deref())
                .await?
            {
                Some(id) => {
                    tracing::info!(paper_id = %id, "retrying paper whose first run did not complete");
                    id
                }
                None => uuid::Uuid::new_v4().to_string(),
            },
        };

        let lock = self.paper_lock(&paper_id);
        let guard = lock.lock().await;
        let result = self
            .ingest_locked(&paper_id, input, doi, arxiv_id, cancel)
            .await;
        drop(guard);
        drop(lock);
        self.release_paper_lock(&paper_id);
        result
    }

    async fn ingest_locked(
        &self,
        paper_id: &str,
        input: PaperInput,
        doi: Option<String>,
        arxiv_id: Option<String>,
        cancel: &CancelToken,
    ) -> Result<IngestReport, IngestError> {
        let registration = self.registration.lock().await;

        if let Some((existing_id, matched_on)) = self
            .catalog
            .find_duplicate(doi.as_deref(), arxiv_id.as_deref(), paper_id)
            .await?
        {
            tracing::info!(paper_id, existing_id = %existing_id, %matched_on, "duplicate paper rejected");
            return Err(IngestError::Duplicate {
                existing_id,
                matched_on,
            });
        }

        let existing = self
            .catalog
            .get(paper_id)
            .await?
            .filter(|p| p.status != IndexStatus::Removed);
        let reindexed = existing.as_ref().is_some_and(|p| p.indexed_at.is_some());
        let now = now_ts();

        let chunks = match self.chunk(paper_id, &input.cleaned_text) {
            Ok(chunks) => chunks,
            Err(e) => {
                // A brand-new paper leaves no record behind.
                if let Some(paper) = existing {
                    self.mark_failed(paper, &e.to_string()).await;
                }
                return Err(e.into());
            }
        };

        let mut target = match existing.clone() {
            Some(mut paper) => {
                paper.title = input.title;
                paper.authors = input.metadata.authors;
                paper.year = input.metadata.year;
                paper.doi = doi;
                paper.arxiv_id = arxiv_id;
                paper.body = input.cleaned_text;
                paper
            }
            None => Paper {
                id: paper_id.to_string(),
                title: input.title,
                authors: input.metadata.authors,
                year: input.metadata.year,
                doi,
                arxiv_id,
                body: input.cleaned_text,
                status: IndexStatus::NotIndexed,
                chunk_count: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
                indexed_at: None,
            },
        };
        target.status = IndexStatus::Indexing;
        target.updated_at = now;

        // A paper with a completed run keeps its stored fields until the
        // new run succeeds. Anything else is saved as the new record so its
        // identifiers are reserved for the duration of the run.
        let start = match existing {
            Some(mut paper) if paper.indexed_at.is_some() => {
                paper.status = IndexStatus::Indexing;
                paper.updated_at = now;
                paper
            }
            _ => target.clone(),
        };
        self.catalog.save(&start).await?;
        drop(registration);

        tracing::info!(paper_id, chunks = chunks.len(), reindexed, "indexing paper");
        self.index_chunks(start, target, chunks, reindexed, cancel)
            .await
    }

    /// Re-index a live paper from its stored text, or from `new_text`.
    pub async fn reindex(
        &self,
        paper_id: &str,
        new_text: Option<String>,
    ) -> Result<IngestReport, IngestError> {
        self.reindex_with_cancel(paper_id, new_text, &CancelToken::new())
            .await
    }

    pub async fn reindex_with_cancel(
        &self,
        paper_id: &str,
        new_text: Option<String>,
        cancel: &CancelToken,
    ) -> Result<IngestReport, IngestError> {
        let lock = self.paper_lock(paper_id);
        let guard = lock.lock().await;
        let result = self.reindex_locked(paper_id, new_text, cancel).await;
        drop(guard);
        drop(lock);
        self.release_paper_lock(paper_id);
        result
    }

    async fn reindex_locked(
        &self,
        paper_id: &str,
        new_text: Option<String>,
        cancel: &CancelToken,
    ) -> Result<IngestReport, IngestError> {
        let paper = self
            .catalog
            .get(paper_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(paper_id.to_string()))?;
        if !paper.status.can_transition_to(IndexStatus::Indexing) {
            return Err(IngestError::Removed(paper_id.to_string()));
        }

        // Starting a run reserves the paper's identifiers again, so one that
        // gave them up must not collide with a paper that took them since.
        let registration = if paper.holds_identifiers() {
            None
        } else {
            let guard = self.registration.lock().await;
            if let Some((existing_id, matched_on)) = self
                .catalog
                .find_duplicate(paper.doi.as_deref(), paper.arxiv_id.as_deref(), paper_id)
                .await?
            {
                return Err(IngestError::Duplicate {
                    existing_id,
                    matched_on,
                });
            }
            Some(guard)
        };

        let text = new_text.as_deref().unwrap_or(&paper.body);
        let chunks = match self.chunk(paper_id, text) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.mark_failed(paper, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let mut start = paper;
        start.status = IndexStatus::Indexing;
        start.updated_at = now_ts();
        self.catalog.save(&start).await?;
        drop(registration);

        let mut target = start.clone();
        if let Some(text) = new_text {
            target.body = text;
        }

        tracing::info!(paper_id, chunks = chunks.len(), "re-indexing paper");
        self.index_chunks(start, target, chunks, true, cancel).await
    }

    /// Re-index every live paper in id order.
    pub async fn reindex_all(&self) -> Result<ReindexSummary, IngestError> {
        let papers = self.catalog.list(false).await?;
        let mut summary = ReindexSummary {
            total: papers.len(),
            ..ReindexSummary::default()
        };

        for paper in papers {
            match self.reindex(&paper.id, None).await {
                Ok(report) => {
                    summary.indexed += 1;
                    summary.total_chunks += report.chunks_written;
                }
                Err(e) => {
                    tracing::error!(paper_id = %paper.id, error = %e, "re-index failed");
                    summary.failed.push((paper.id, e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Purge a paper's chunks and tombstone it. Returns the number of
    /// chunks removed; deleting a removed paper is a no-op.
    pub async fn delete(&self, paper_id: &str) -> Result<usize, IngestError> {
        let lock = self.paper_lock(paper_id);
        let guard = lock.lock().await;
        let result = self.delete_locked(paper_id).await;
        drop(guard);
        drop(lock);
        self.release_paper_lock(paper_id);
        result
    }

    async fn delete_locked(&self, paper_id: &str) -> Result<usize, IngestError> {
        let mut paper = self
            .catalog
            .get(paper_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(paper_id.to_string()))?;
        if paper.status == IndexStatus::Removed {
            return Ok(0);
        }

        let removed = self
            .store
            .delete(&DeleteSelector::Filter(Filter::paper(paper_id)))
            .await?;

        paper.status = IndexStatus::Removed;
        paper.chunk_count = 0;
        paper.updated_at = now_ts();
        self.catalog.save(&paper).await?;

        tracing::info!(paper_id, chunks_removed = removed, "paper removed");
        Ok(removed)
    }

    pub async fn get_paper(&self, paper_id: &str) -> Result<Option<Paper>, IngestError> {
        Ok(self.catalog.get(paper_id).await?)
    }

    pub async fn list_papers(&self, include_removed: bool) -> Result<Vec<Paper>, IngestError> {
        Ok(self.catalog.list(include_removed).await?)
    }

    /// Mark papers left in `indexing` by an earlier process as `failed` so
    /// they can be retried. Returns how many were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, IngestError> {
        let mut recovered = 0;
        for mut paper in self.catalog.list(false).await? {
            if paper.status == IndexStatus::Indexing {
                tracing::warn!(paper_id = %paper.id, "recovering interrupted indexing run");
                paper.status = IndexStatus::Failed;
                paper.last_error = Some("indexing interrupted before completion".to_string());
                paper.updated_at = now_ts();
                self.catalog.save(&paper).await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    pub async fn stats(&self) -> Result<IndexStats, IngestError> {
        let papers = self.catalog.list(true).await?;
        let mut papers_by_status = BTreeMap::new();
        for status in IndexStatus::ALL {
            papers_by_status.insert(status.as_str().to_string(), 0);
        }
        for paper in &papers {
            *papers_by_status
                .entry(paper.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let total_chunks = self.store.count(None).await?;
        let (indexed_papers, indexed_chunks) = papers
            .iter()
            .filter(|p| p.status == IndexStatus::Indexed)
            .fold((0usize, 0usize), |(n, chunks), p| (n + 1, chunks + p.chunk_count));
        let avg_chunks_per_paper = if indexed_papers > 0 {
            indexed_chunks as f64 / indexed_papers as f64
        } else {
            0.0
        };

        Ok(IndexStats {
            collection: self.store.collection().to_string(),
            dimension: self.store.dimension().await?,
            model: self.embedder.model_name().to_string(),
            total_chunks,
            papers_by_status,
            indexed_papers,
            avg_chunks_per_paper,
        })
    }

    fn chunk(&self, paper_id: &str, text: &str) -> Result<Vec<Chunk>, ChunkingError> {
        chunk_text(
            paper_id,
            text,
            self.chunking.chunk_size_tokens,
            self.chunking.overlap_tokens,
        )
    }

    /// Embed, write, and swap in `chunks`.
    ///
    /// `start` is the record saved when the run began and `target` the
    /// record the run produces. Success saves `target`; failure records the
    /// error on `start`, so the catalog keeps describing what is indexed.
    async fn index_chunks(
        &self,
        start: Paper,
        mut target: Paper,
        chunks: Vec<Chunk>,
        reindexed: bool,
        cancel: &CancelToken,
    ) -> Result<IngestReport, IngestError> {
        let stale_removed = match self.write_chunks(&target, &chunks, cancel).await {
            Ok(stale_removed) => stale_removed,
            Err(e) => {
                self.mark_failed(start, &e.to_string()).await;
                return Err(e);
            }
        };

        let now = now_ts();
        target.status = IndexStatus::Indexed;
        target.chunk_count = chunks.len();
        target.last_error = None;
        target.indexed_at = Some(now);
        target.updated_at = now;
        if let Err(e) = self.catalog.save(&target).await {
            // e.g. a new DOI claimed by another paper while this run was
            // embedding. The next successful run reconciles the chunks.
            self.mark_failed(start, &e.to_string()).await;
            return Err(e.into());
        }

        tracing::info!(
            paper_id = %target.id,
            chunks = chunks.len(),
            stale_removed,
            "paper indexed"
        );
        Ok(IngestReport {
            paper_id: target.id,
            chunks_written: chunks.len(),
            stale_removed,
            reindexed,
        })
    }

    async fn write_chunks(
        &self,
        paper: &Paper,
        chunks: &[Chunk],
        cancel: &CancelToken,
    ) -> Result<usize, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch_size = self.embedder.max_batch_size().max(1);

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled(paper.id.clone()));
            }
            let embedded = self.embedder.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(crate::error::EmbeddingError::malformed(
                    self.embedder.provider_name(),
                    format!("expected {} vectors, got {}", batch.len(), embedded.len()),
                )
                .into());
            }
            vectors.extend(embedded);
        }
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled(paper.id.clone()));
        }

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                text: chunk.text.clone(),
                metadata: chunk_metadata(paper, chunk),
            })
            .collect();

        let filter = Filter::paper(&paper.id);
        let previous = self.store.ids(Some(&filter)).await?;

        self.store.upsert(&records).await?;

        let live: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !live.contains(id.as_str()))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete(&DeleteSelector::Ids(stale)).await?)
    }

    async fn mark_failed(&self, mut paper: Paper, error: &str) {
        paper.status = IndexStatus::Failed;
        paper.last_error = Some(error.to_string());
        paper.updated_at = now_ts();
        tracing::error!(paper_id = %paper.id, error, "indexing failed");
        if let Err(e) = self.catalog.save(&paper).await {
            tracing::error!(paper_id = %paper.id, error = %e, "failed to record indexing failure");
        }
    }

    fn paper_lock(&self, paper_id: &str) -> Arc<Mutex<()>> {
        self.paper_locks
            .entry(paper_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry once no task holds or waits on it.
    fn release_paper_lock(&self, paper_id: &str) {
        self.paper_locks
            .remove_if(paper_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn chunk_metadata(paper: &Paper, chunk: &Chunk) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("paper_id".into(), paper.id.clone().into());
    metadata.insert("chunk_index".into(), chunk.index.into());
    metadata.insert("token_count".into(), chunk.token_count.into());
    metadata.insert("title".into(), paper.title.clone().into());
    if let Some(year) = paper.year {
        metadata.insert("year".into(), year.into());
    }
    metadata
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_chunk_metadata_carries_paper_fields() {
        let paper = Paper {
            id: "p1".into(),
            title: "Attention Is All You Need".into(),
            authors: vec![],
            year: Some(2017),
            doi: None,
            arxiv_id: None,
            body: String::new(),
            status: IndexStatus::Indexing,
            chunk_count: 0,
            last_error: None,
            created_at: 0,
            updated_at: 0,
            indexed_at: None,
        };
        let chunk = Chunk {
            id: "p1:2".into(),
            paper_id: "p1".into(),
            index: 2,
            text: "text".into(),
            token_count: 1,
            overlap_tokens: 0,
            hash: String::new(),
        };
        let metadata = chunk_metadata(&paper, &chunk);
        assert_eq!(metadata["paper_id"], "p1");
        assert_eq!(metadata["chunk_index"], 2);
        assert_eq!(metadata["token_count"], 1);
        assert_eq!(metadata["title"], "Attention Is All You Need");
        assert_eq!(metadata["year"], 2017);
    }
}
