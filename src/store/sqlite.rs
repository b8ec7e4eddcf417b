//! SQLite-backed [`VectorStore`].
//!
//! Vectors live in the `vectors` table as little-endian `f32` BLOBs keyed by
//! `(collection, id)`. The owning paper id is copied out of the metadata
//! into an indexed column so per-paper filters and deletes do not scan the
//! whole collection. Ranking is brute-force cosine distance in Rust.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{
    check_query, check_records, rank, DeleteSelector, Filter, Metadata, QueryHit, VectorRecord,
    VectorStore,
};
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::VectorStoreError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    /// Open `collection`, registering it on first use. The schema must
    /// already exist (see [`run_migrations`](crate::migrate::run_migrations)).
    pub async fn open(pool: SqlitePool, collection: &str) -> Result<Self, VectorStoreError> {
        sqlx::query(
            "INSERT INTO collections (name, dimension, created_at) VALUES (?, NULL, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(collection)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    /// Rows of this collection, pre-filtered on `paper_id` when the filter
    /// names one, then on the remaining fields.
    async fn load_rows(&self, filter: Option<&Filter>) -> Result<Vec<LoadedRow>, VectorStoreError> {
        let rows = match filter.and_then(Filter::paper_id) {
            Some(paper_id) => {
                sqlx::query(
                    "SELECT id, text, metadata_json, embedding FROM vectors \
                     WHERE collection = ? AND paper_id = ?",
                )
                .bind(&self.collection)
                .bind(paper_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, text, metadata_json, embedding FROM vectors WHERE collection = ?",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata =
                serde_json::from_str(&metadata_json).map_err(|e| VectorStoreError::Corrupt {
                    id: id.clone(),
                    reason: format!("metadata is not a JSON object: {}", e),
                })?;

            if filter.map_or(true, |f| f.matches(&metadata)) {
                let blob: Vec<u8> = row.get("embedding");
                loaded.push(LoadedRow {
                    id,
                    text: row.get("text"),
                    metadata,
                    vector: blob_to_vec(&blob),
                });
            }
        }
        Ok(loaded)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize, VectorStoreError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM vectors WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }
}

struct LoadedRow {
    id: String,
    text: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from the start.
        // An error below drops `tx`, which rolls this back.
        let proposed = records[0].vector.len() as i64;
        sqlx::query("UPDATE collections SET dimension = COALESCE(dimension, ?) WHERE name = ?")
            .bind(proposed)
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        let current: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_one(&mut *tx)
                .await?;
        check_records(&self.collection, current.map(|d| d as usize), records)?;

        let now = chrono::Utc::now().timestamp();
        for record in records {
            let paper_id = record
                .metadata
                .get("paper_id")
                .and_then(serde_json::Value::as_str);
            let metadata_json = serde_json::Value::Object(record.metadata.clone()).to_string();

            sqlx::query(
                r#"
                INSERT INTO vectors (collection, id, paper_id, text, metadata_json,
                                     embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    paper_id = excluded.paper_id,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.collection)
            .bind(&record.id)
            .bind(paper_id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            collection = %self.collection,
            records = records.len(),
            "upserted vectors"
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        check_query(&self.collection, self.dimension().await?, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let hits = self
            .load_rows(filter)
            .await?
            .into_iter()
            .map(|row| QueryHit {
                distance: cosine_distance(vector, &row.vector),
                id: row.id,
                text: row.text,
                metadata: row.metadata,
            })
            .collect();

        Ok(rank(hits, k))
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize, VectorStoreError> {
        match selector {
            DeleteSelector::Ids(ids) => self.delete_ids(ids).await,
            DeleteSelector::Filter(filter) => {
                if let Some(paper_id) = filter.only_paper_id() {
                    let result =
                        sqlx::query("DELETE FROM vectors WHERE collection = ? AND paper_id = ?")
                            .bind(&self.collection)
                            .bind(paper_id)
                            .execute(&self.pool)
                            .await?;
                    Ok(result.rows_affected() as usize)
                } else {
                    let ids = self.ids(Some(filter)).await?;
                    self.delete_ids(&ids).await
                }
            }
        }
    }

    async fn ids(&self, filter: Option<&Filter>) -> Result<Vec<String>, VectorStoreError> {
        let mut ids: Vec<String> = self
            .load_rows(filter)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<usize, VectorStoreError> {
        match filter {
            None => {
                let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
                    .bind(&self.collection)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(n as usize)
            }
            Some(filter) => Ok(self.load_rows(Some(filter)).await?.len()),
        }
    }

    async fn dimension(&self) -> Result<Option<usize>, VectorStoreError> {
        let dimension: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        Ok(dimension.map(|d| d as usize))
    }

    async fn reset(&self) -> Result<(), VectorStoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE collections SET dimension = NULL WHERE name = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
