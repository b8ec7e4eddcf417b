//! In-memory [`VectorStore`] for tests and ephemeral indexes.
//!
//! A single `parking_lot::RwLock` guards the whole collection, so each
//! upsert or delete is atomic with respect to concurrent queries. Search is
//! brute-force cosine distance over every stored vector.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    check_query, check_records, rank, DeleteSelector, Filter, Metadata, QueryHit, VectorRecord,
    VectorStore,
};
use crate::embedding::cosine_distance;
use crate::error::VectorStoreError;

struct StoredEntry {
    vector: Vec<f32>,
    text: String,
    metadata: Metadata,
}

#[derive(Default)]
struct Collection {
    dimension: Option<usize>,
    entries: BTreeMap<String, StoredEntry>,
}

pub struct InMemoryStore {
    name: String,
    inner: RwLock<Collection>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Collection::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("papers")
    }
}

fn selected(filter: Option<&Filter>, entry: &StoredEntry) -> bool {
    filter.map_or(true, |f| f.matches(&entry.metadata))
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError> {
        let mut inner = self.inner.write();
        inner.dimension = check_records(&self.name, inner.dimension, records)?;
        for record in records {
            inner.entries.insert(
                record.id.clone(),
                StoredEntry {
                    vector: record.vector.clone(),
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError> {
        let inner = self.inner.read();
        check_query(&self.name, inner.dimension, vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let hits = inner
            .entries
            .iter()
            .filter(|(_, entry)| selected(filter, entry))
            .map(|(id, entry)| QueryHit {
                id: id.clone(),
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(vector, &entry.vector),
            })
            .collect();

        Ok(rank(hits, k))
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize, VectorStoreError> {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        match selector {
            DeleteSelector::Ids(ids) => {
                for id in ids {
                    inner.entries.remove(id);
                }
            }
            DeleteSelector::Filter(filter) => {
                inner.entries.retain(|_, entry| !filter.matches(&entry.metadata));
            }
        }
        Ok(before - inner.entries.len())
    }

    async fn ids(&self, filter: Option<&Filter>) -> Result<Vec<String>, VectorStoreError> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .iter()
            .filter(|(_, entry)| selected(filter, entry))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<usize, VectorStoreError> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .values()
            .filter(|entry| selected(filter, entry))
            .count())
    }

    async fn dimension(&self) -> Result<Option<usize>, VectorStoreError> {
        Ok(self.inner.read().dimension)
    }

    async fn reset(&self) -> Result<(), VectorStoreError> {
        *self.inner.write() = Collection::default();
        Ok(())
    }

    async fn close(&self) {}
}
