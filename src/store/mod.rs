//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the similarity index behind ingestion and
//! retrieval: `(id, vector, text, metadata)` records ranked by cosine
//! distance, with equality filters over metadata.
//!
//! Backends:
//! - [`SqliteVectorStore`](sqlite::SqliteVectorStore): persistent, vectors
//!   stored as BLOBs and ranked brute-force on read.
//! - [`InMemoryStore`](memory::InMemoryStore): tests and ephemeral use.
//!
//! Every collection fixes its vector dimension on the first write. Writes
//! with any other dimension fail with
//! [`VectorStoreError::DimensionMismatch`] and leave the store unchanged.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::VectorStoreError;

pub use memory::InMemoryStore;
pub use sqlite::SqliteVectorStore;

/// Per-record metadata.
pub type Metadata = serde_json::Map<String, Value>;

/// A record to insert or replace.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A nearest-neighbor match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine distance in `[0, 2]`, smaller is closer.
    pub distance: f64,
}

impl QueryHit {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Conjunction of `field == value` conditions over record metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the chunks of one paper.
    pub fn paper(paper_id: &str) -> Self {
        Self::new().with("paper_id", paper_id)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn paper_id(&self) -> Option<&str> {
        self.fields.get("paper_id").and_then(Value::as_str)
    }

    /// The paper id when it is the filter's only condition.
    pub fn only_paper_id(&self) -> Option<&str> {
        if self.fields.len() == 1 {
            self.paper_id()
        } else {
            None
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.fields
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Which records a delete removes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(Filter),
}

/// Persistent similarity index over text records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by id, atomically |
/// | [`query`](VectorStore::query) | `k` nearest records by cosine distance |
/// | [`delete`](VectorStore::delete) | Remove by id list or filter |
/// | [`ids`](VectorStore::ids) | Ids of matching records, sorted |
/// | [`count`](VectorStore::count) | Number of matching records |
/// | [`dimension`](VectorStore::dimension) | Vector size fixed by the first write |
/// | [`reset`](VectorStore::reset) | Drop every record and the fixed dimension |
///
/// Writes are visible to subsequent reads from the same process.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// Insert or replace `records`. Either all are written or none are.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), VectorStoreError>;

    /// Up to `k` records ordered by ascending distance, ties by ascending id.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryHit>, VectorStoreError>;

    /// Returns the number of records removed.
    async fn delete(&self, selector: &DeleteSelector) -> Result<usize, VectorStoreError>;

    async fn ids(&self, filter: Option<&Filter>) -> Result<Vec<String>, VectorStoreError>;

    async fn count(&self, filter: Option<&Filter>) -> Result<usize, VectorStoreError>;

    async fn dimension(&self) -> Result<Option<usize>, VectorStoreError>;

    async fn reset(&self) -> Result<(), VectorStoreError>;

    async fn close(&self);
}

/// Validate a write batch against the collection's dimension and return
/// the dimension the collection has after the write.
pub(crate) fn check_records(
    collection: &str,
    current: Option<usize>,
    records: &[VectorRecord],
) -> Result<Option<usize>, VectorStoreError> {
    let mut dimension = current;
    for record in records {
        if record.id.is_empty() {
            return Err(VectorStoreError::InvalidRecord {
                id: record.id.clone(),
                reason: "empty id".to_string(),
            });
        }
        if record.vector.is_empty() {
            return Err(VectorStoreError::InvalidRecord {
                id: record.id.clone(),
                reason: "empty vector".to_string(),
            });
        }
        match dimension {
            Some(expected) if expected != record.vector.len() => {
                return Err(VectorStoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected,
                    actual: record.vector.len(),
                });
            }
            Some(_) => {}
            None => dimension = Some(record.vector.len()),
        }
    }
    Ok(dimension)
}

/// Reject queries whose vector size differs from the collection's.
pub(crate) fn check_query(
    collection: &str,
    current: Option<usize>,
    vector: &[f32],
) -> Result<(), VectorStoreError> {
    match current {
        Some(expected) if expected != vector.len() => Err(VectorStoreError::DimensionMismatch {
            collection: collection.to_string(),
            expected,
            actual: vector.len(),
        }),
        _ => Ok(()),
    }
}

/// Sort by ascending distance then id, and keep the first `k`.
pub(crate) fn rank(mut hits: Vec<QueryHit>, k: usize) -> Vec<QueryHit> {
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, distance: f64) -> QueryHit {
        QueryHit {
            id: id.to_string(),
            text: String::new(),
            metadata: Metadata::new(),
            distance,
        }
    }

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            text: String::new(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_rank_orders_by_distance_then_id() {
        let ranked = rank(
            vec![hit("c", 0.5), hit("b", 0.1), hit("a", 0.5), hit("d", 1.5)],
            3,
        );
        let ids: Vec<_> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_filter_matches_all_fields() {
        let mut metadata = Metadata::new();
        metadata.insert("paper_id".into(), "p1".into());
        metadata.insert("chunk_index".into(), 3.into());

        assert!(Filter::new().matches(&metadata));
        assert!(Filter::paper("p1").matches(&metadata));
        assert!(!Filter::paper("p2").matches(&metadata));
        assert!(Filter::paper("p1").with("chunk_index", 3).matches(&metadata));
        assert!(!Filter::paper("p1").with("chunk_index", 4).matches(&metadata));
        assert!(!Filter::new().with("title", "x").matches(&metadata));
        assert_eq!(Filter::paper("p1").paper_id(), Some("p1"));
        assert_eq!(Filter::paper("p1").only_paper_id(), Some("p1"));
        assert_eq!(Filter::paper("p1").with("chunk_index", 3).only_paper_id(), None);
    }

    #[test]
    fn test_check_records_fixes_dimension() {
        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])];
        assert_eq!(check_records("c", None, &records).unwrap(), Some(2));
        assert_eq!(check_records("c", Some(2), &records).unwrap(), Some(2));
        assert!(matches!(
            check_records("c", Some(3), &records),
            Err(VectorStoreError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn test_check_records_rejects_mixed_batch() {
        let records = vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0, 0.0])];
        assert!(matches!(
            check_records("c", None, &records),
            Err(VectorStoreError::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
        assert!(check_records("c", None, &[record("", vec![1.0])]).is_err());
        assert!(check_records("c", None, &[record("x", vec![])]).is_err());
    }
}
