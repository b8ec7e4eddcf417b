//! Process-scoped handle over an on-disk paper index.
//!
//! [`PaperIndex::open`] connects to SQLite, applies migrations, opens the
//! configured collection, builds the embedding provider, and wires the
//! coordinator, worker pool, and retriever around them. [`PaperIndex::close`]
//! releases the connection pool. Nothing here is global; tests open as many
//! independent indexes as they like.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::catalog::{PaperCatalog, SqliteCatalog};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::ingest::IngestionCoordinator;
use crate::migrate;
use crate::pool::IngestionPool;
use crate::retriever::Retriever;
use crate::store::{SqliteVectorStore, VectorStore};

pub struct PaperIndex {
    db: SqlitePool,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    coordinator: Arc<IngestionCoordinator>,
    workers: IngestionPool,
    retriever: Retriever,
}

impl PaperIndex {
    /// Open with the provider named in `config.embedding`.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::open_with_provider(config, embedder).await
    }

    pub async fn open_with_provider(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let db = db::connect(config).await?;
        migrate::run_migrations(&db).await?;

        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(db.clone(), &config.db.collection).await?);
        let catalog: Arc<dyn PaperCatalog> = Arc::new(SqliteCatalog::new(db.clone()));

        if let Some(dimension) = store.dimension().await? {
            if dimension != embedder.dims() {
                tracing::warn!(
                    collection = %config.db.collection,
                    stored = dimension,
                    provider = embedder.dims(),
                    "embedding dimension differs from the stored collection; rebuild the index"
                );
            }
        }

        let coordinator = Arc::new(IngestionCoordinator::new(
            catalog,
            store.clone(),
            embedder.clone(),
            config.chunking.clone(),
        ));

        let recovered = coordinator.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted papers as failed");
        }

        let workers = IngestionPool::new(coordinator.clone(), config.ingestion.workers);
        let retriever = Retriever::new(store.clone(), embedder.clone(), config.retrieval.clone());

        tracing::debug!(
            db = %config.db.path.display(),
            collection = %config.db.collection,
            model = embedder.model_name(),
            "paper index opened"
        );

        Ok(Self {
            db,
            store,
            embedder,
            coordinator,
            workers,
            retriever,
        })
    }

    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    pub fn workers(&self) -> &IngestionPool {
        &self.workers
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub async fn close(self) {
        self.store.close().await;
        self.db.close().await;
    }
}

/// Create the database and schema without touching the embedding provider.
pub async fn init(config: &Config) -> Result<()> {
    let db = db::connect(config).await?;
    migrate::run_migrations(&db).await?;
    SqliteVectorStore::open(db.clone(), &config.db.collection).await?;
    db.close().await;
    Ok(())
}
