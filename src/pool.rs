//! Bounded worker pool for ingestion jobs.
//!
//! Each submitted paper runs on its own tokio task, but only `workers`
//! of them hold a permit at once, which caps concurrent embedding calls.
//! Per-paper ordering is enforced by the coordinator, not the pool.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::IngestError;
use crate::ingest::{CancelToken, IngestReport, IngestionCoordinator};
use crate::models::PaperInput;

/// Handle to one queued or running ingestion.
pub struct IngestJob {
    cancel: CancelToken,
    handle: JoinHandle<Result<IngestReport, IngestError>>,
}

impl IngestJob {
    /// Request cancellation. Takes effect at the next batch boundary; the
    /// paper's previous index is kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<IngestReport, IngestError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::Worker(e.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct IngestionPool {
    coordinator: Arc<IngestionCoordinator>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl IngestionPool {
    pub fn new(coordinator: Arc<IngestionCoordinator>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            coordinator,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn submit(&self, input: PaperInput) -> IngestJob {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let coordinator = self.coordinator.clone();
        let permits = self.permits.clone();

        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Worker(e.to_string()))?;
            if token.is_cancelled() {
                let id = input.paper_id.clone().unwrap_or_default();
                return Err(IngestError::Cancelled(id));
            }
            coordinator.ingest_with_cancel(input, &token).await
        });

        IngestJob { cancel, handle }
    }

    pub fn submit_reindex(&self, paper_id: String, new_text: Option<String>) -> IngestJob {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let coordinator = self.coordinator.clone();
        let permits = self.permits.clone();

        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Worker(e.to_string()))?;
            coordinator
                .reindex_with_cancel(&paper_id, new_text, &token)
                .await
        });

        IngestJob { cancel, handle }
    }

    /// Ingest every input and return the results in input order.
    pub async fn ingest_all(
        &self,
        inputs: Vec<PaperInput>,
    ) -> Vec<Result<IngestReport, IngestError>> {
        tracing::info!(papers = inputs.len(), workers = self.workers, "ingesting batch");
        let jobs: Vec<IngestJob> = inputs.into_iter().map(|input| self.submit(input)).collect();

        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(job.wait().await);
        }
        results
    }
}
