//! Core data models used throughout the paper index.
//!
//! These types represent the papers, chunks, and context bundles that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bibliographic metadata supplied by the extraction step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaperMetadata {
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub arxiv_id: Option<String>,
}

/// A paper handed to the coordinator for indexing.
///
/// When `paper_id` is absent the coordinator assigns a fresh UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperInput {
    #[serde(default)]
    pub paper_id: Option<String>,
    pub title: String,
    pub cleaned_text: String,
    #[serde(default)]
    pub metadata: PaperMetadata,
}

impl PaperInput {
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            paper_id: Some(paper_id.into()),
            title: title.into(),
            cleaned_text: text.into(),
            metadata: PaperMetadata::default(),
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.metadata.doi = Some(doi.into());
        self
    }

    pub fn with_arxiv_id(mut self, arxiv_id: impl Into<String>) -> Self {
        self.metadata.arxiv_id = Some(arxiv_id.into());
        self
    }
}

/// Indexing lifecycle of a paper.
///
/// ```text
/// not_indexed ──▶ indexing ──▶ indexed
///                   │  ▲          │
///                   ▼  └──────────┘ (re-index)
///                 failed ──▶ indexing (retry)
///
/// any state ──▶ removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotIndexed,
    Indexing,
    Indexed,
    Failed,
    Removed,
}

impl IndexStatus {
    pub const ALL: [IndexStatus; 5] = [
        IndexStatus::NotIndexed,
        IndexStatus::Indexing,
        IndexStatus::Indexed,
        IndexStatus::Failed,
        IndexStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::NotIndexed => "not_indexed",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Failed => "failed",
            IndexStatus::Removed => "removed",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `indexing → indexing` is allowed so a run interrupted by a crash can
    /// be restarted without first passing through `failed`.
    pub fn can_transition_to(self, next: IndexStatus) -> bool {
        use IndexStatus::*;
        match (self, next) {
            (_, Removed) => self != Removed,
            (NotIndexed | Indexed | Failed | Indexing, Indexing) => true,
            (Indexing, Indexed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown index status: {}", s))
    }
}

/// A registered paper as tracked by the catalog.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    /// Normalized DOI.
    pub doi: Option<String>,
    /// Normalized arXiv id, version suffix stripped.
    pub arxiv_id: Option<String>,
    #[serde(skip)]
    pub body: String,
    pub status: IndexStatus,
    /// Chunks in the live index for this paper.
    pub chunk_count: usize,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub indexed_at: Option<i64>,
}

impl Paper {
    /// Whether this record reserves its DOI and arXiv id for deduplication.
    ///
    /// A paper mid-run or with a completed run behind it does. Tombstones
    /// and papers whose first run never finished do not, so a failed first
    /// ingestion can be retried.
    pub fn holds_identifiers(&self) -> bool {
        match self.status {
            IndexStatus::Indexing | IndexStatus::Indexed => true,
            IndexStatus::Failed => self.indexed_at.is_some(),
            IndexStatus::NotIndexed | IndexStatus::Removed => false,
        }
    }
}

/// A chunk of a paper's cleaned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `{paper_id}:{index}`.
    pub id: String,
    pub paper_id: String,
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    /// Leading tokens repeated from the previous chunk.
    pub overlap_tokens: usize,
    pub hash: String,
}

/// One ranked passage in a [`ContextBundle`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub paper_id: String,
    pub title: Option<String>,
    pub text: String,
    /// Relevance in `[0, 1]`, higher is better.
    pub score: f64,
}

/// Ordered retrieval result handed to downstream generators.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContextBundle {
    pub chunks: Vec<ContextChunk>,
}

impl ContextBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Render as prompt context: one `[Paper id: title]` block per chunk,
    /// separated by `---` lines.
    pub fn render(&self) -> String {
        self.chunks
            .iter()
            .map(|c| {
                let title = c.title.as_deref().unwrap_or("Unknown");
                format!("[Paper {}: {}]\n{}\n", c.paper_id, title, c.text)
            })
            .collect::<Vec<_>>()
            .join("\n---\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_names() {
        for status in IndexStatus::ALL {
            assert_eq!(status.as_str().parse::<IndexStatus>().unwrap(), status);
        }
        assert!("done".parse::<IndexStatus>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use IndexStatus::*;
        assert!(NotIndexed.can_transition_to(Indexing));
        assert!(Indexing.can_transition_to(Indexed));
        assert!(Indexing.can_transition_to(Failed));
        assert!(Indexed.can_transition_to(Indexing));
        assert!(Failed.can_transition_to(Indexing));
        assert!(Indexed.can_transition_to(Removed));
        assert!(!NotIndexed.can_transition_to(Indexed));
        assert!(!Failed.can_transition_to(Indexed));
        assert!(!Removed.can_transition_to(Indexing));
        assert!(!Removed.can_transition_to(Removed));
    }

    #[test]
    fn test_only_started_or_indexed_papers_hold_identifiers() {
        let mut paper = Paper {
            id: "p1".into(),
            title: "T".into(),
            authors: vec![],
            year: None,
            doi: Some("10.1/a".into()),
            arxiv_id: None,
            body: String::new(),
            status: IndexStatus::Indexing,
            chunk_count: 0,
            last_error: None,
            created_at: 0,
            updated_at: 0,
            indexed_at: None,
        };
        assert!(paper.holds_identifiers());

        paper.status = IndexStatus::Failed;
        assert!(!paper.holds_identifiers());

        paper.indexed_at = Some(1);
        assert!(paper.holds_identifiers());

        paper.status = IndexStatus::Removed;
        assert!(!paper.holds_identifiers());
    }

    #[test]
    fn test_render_context() {
        let bundle = ContextBundle {
            chunks: vec![
                ContextChunk {
                    chunk_id: "a:0".into(),
                    paper_id: "a".into(),
                    title: Some("Attention".into()),
                    text: "first".into(),
                    score: 0.9,
                },
                ContextChunk {
                    chunk_id: "b:3".into(),
                    paper_id: "b".into(),
                    title: None,
                    text: "second".into(),
                    score: 0.5,
                },
            ],
        };
        assert_eq!(
            bundle.render(),
            "[Paper a: Attention]\nfirst\n\n---\n[Paper b: Unknown]\nsecond\n"
        );
        assert_eq!(ContextBundle::empty().render(), "");
    }
}
