//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paper_index::catalog::InMemoryCatalog;
use paper_index::config::ChunkingConfig;
use paper_index::embedding::EmbeddingProvider;
use paper_index::error::EmbeddingError;
use paper_index::ingest::IngestionCoordinator;
use paper_index::store::InMemoryStore;

pub const DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lowercased word is hashed
/// into one of `DIMS` buckets and the counts are L2-normalized. Texts that
/// share vocabulary land close together.
pub struct HashEmbedder {
    batch_size: usize,
    delay: Option<Duration>,
    fail: AtomicBool,
    batch_calls: AtomicUsize,
    query_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            batch_size: 16,
            delay: None,
            fail: AtomicBool::new(false),
            batch_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every subsequent call fail with a transient error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Most `embed_batch` calls ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self) -> Result<(), EmbeddingError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(EmbeddingError::transient("test", "provider unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn provider_name(&self) -> &str {
        "test"
    }
    fn model_name(&self) -> &str {
        "hash-64"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.pause().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.check()?;
        Ok(texts.iter().map(|t| embed_words(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(embed_words(text))
    }
}

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    for word in text.split_whitespace() {
        let word: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if word.is_empty() {
            continue;
        }
        vector[bucket(&word)] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// FNV-1a, stable across runs and platforms.
fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

/// `n` distinct words drawn from `vocabulary`, cycled, as one paragraph.
pub fn paragraph(vocabulary: &[&str], n: usize) -> String {
    (0..n)
        .map(|i| vocabulary[i % vocabulary.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn transformer_text() -> String {
    let vocabulary = [
        "transformer", "attention", "layers", "heads", "encoder", "decoder",
        "self-attention", "positional", "encoding", "softmax", "tokens", "model",
    ];
    [paragraph(&vocabulary, 300), paragraph(&vocabulary[3..], 300)].join("\n\n")
}

pub fn botany_text() -> String {
    let vocabulary = [
        "photosynthesis", "chlorophyll", "leaves", "roots", "stomata", "xylem",
        "phloem", "pollen", "flowering", "plants", "seeds", "soil",
    ];
    [paragraph(&vocabulary, 300), paragraph(&vocabulary[2..], 300)].join("\n\n")
}

pub struct Harness {
    pub coordinator: Arc<IngestionCoordinator>,
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<HashEmbedder>,
}

pub fn memory_harness(embedder: HashEmbedder, chunking: ChunkingConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new("papers"));
    let embedder = Arc::new(embedder);
    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::new(InMemoryCatalog::new()),
        store.clone(),
        embedder.clone(),
        chunking,
    ));
    Harness {
        coordinator,
        store,
        embedder,
    }
}

pub fn small_chunks() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size_tokens: 100,
        overlap_tokens: 10,
    }
}
