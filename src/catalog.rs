//! Paper registry backing deduplication and re-indexing.
//!
//! The catalog keeps just enough about each paper to find duplicates by
//! normalized DOI or arXiv id, to re-index from the stored cleaned text,
//! and to report lifecycle status. Removed papers stay as tombstones and
//! no longer count for duplicate detection; neither do papers whose first
//! indexing run never completed (see [`Paper::holds_identifiers`]).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::error::{CatalogError, DuplicateKey};
use crate::models::{IndexStatus, Paper};

/// SQL form of [`Paper::holds_identifiers`]. Shared with the partial unique
/// indexes so the catalog and the schema agree on who owns an identifier.
pub(crate) const HOLDS_IDENTIFIERS: &str =
    "(status IN ('indexing', 'indexed') OR (status = 'failed' AND indexed_at IS NOT NULL))";

#[async_trait]
pub trait PaperCatalog: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Paper>, CatalogError>;

    /// A paper other than `exclude_id` that holds either identifier.
    /// DOI matches are reported before arXiv matches.
    async fn find_duplicate(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        exclude_id: &str,
    ) -> Result<Option<(String, DuplicateKey)>, CatalogError>;

    /// A non-removed paper carrying either identifier whose first run never
    /// completed. Ingesting the same paper again retries under its id.
    async fn find_unfinished(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Result<Option<String>, CatalogError>;

    /// Insert or fully replace the record for `paper.id`.
    async fn save(&self, paper: &Paper) -> Result<(), CatalogError>;

    /// All papers ordered by id, tombstones included when asked.
    async fn list(&self, include_removed: bool) -> Result<Vec<Paper>, CatalogError>;
}

// ============ SQLite ============

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn paper_from_row(row: &SqliteRow) -> Result<Paper, CatalogError> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let status = status
        .parse::<IndexStatus>()
        .map_err(|reason| CatalogError::Corrupt {
            paper_id: id.clone(),
            reason,
        })?;
    let authors_json: String = row.get("authors_json");
    let authors: Vec<String> =
        serde_json::from_str(&authors_json).map_err(|e| CatalogError::Corrupt {
            paper_id: id.clone(),
            reason: format!("authors_json: {}", e),
        })?;
    let chunk_count: i64 = row.get("chunk_count");

    Ok(Paper {
        id,
        title: row.get("title"),
        authors,
        year: row.get::<Option<i64>, _>("year").map(|y| y as i32),
        doi: row.get("doi"),
        arxiv_id: row.get("arxiv_id"),
        body: row.get("body"),
        status,
        chunk_count: chunk_count.max(0) as usize,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        indexed_at: row.get("indexed_at"),
    })
}

#[async_trait]
impl PaperCatalog for SqliteCatalog {
    async fn get(&self, id: &str) -> Result<Option<Paper>, CatalogError> {
        let row = sqlx::query("SELECT * FROM papers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(paper_from_row).transpose()
    }

    async fn find_duplicate(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        exclude_id: &str,
    ) -> Result<Option<(String, DuplicateKey)>, CatalogError> {
        let lookups = [
            (doi, DuplicateKey::Doi, "doi"),
            (arxiv_id, DuplicateKey::ArxivId, "arxiv_id"),
        ];
        for (value, key, column) in lookups {
            let Some(value) = value else { continue };
            let sql = format!(
                "SELECT id FROM papers WHERE {} = ? AND {} AND id != ? \
                 ORDER BY created_at, id LIMIT 1",
                column, HOLDS_IDENTIFIERS
            );
            let existing: Option<String> = sqlx::query_scalar(&sql)
                .bind(value)
                .bind(exclude_id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(existing) = existing {
                return Ok(Some((existing, key)));
            }
        }
        Ok(None)
    }

    async fn find_unfinished(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Result<Option<String>, CatalogError> {
        for (value, column) in [(doi, "doi"), (arxiv_id, "arxiv_id")] {
            let Some(value) = value else { continue };
            let sql = format!(
                "SELECT id FROM papers WHERE {} = ? AND status != 'removed' AND NOT {} \
                 ORDER BY created_at, id LIMIT 1",
                column, HOLDS_IDENTIFIERS
            );
            let existing: Option<String> = sqlx::query_scalar(&sql)
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;
            if existing.is_some() {
                return Ok(existing);
            }
        }
        Ok(None)
    }

    async fn save(&self, paper: &Paper) -> Result<(), CatalogError> {
        let authors_json = serde_json::to_string(&paper.authors).unwrap_or_else(|_| "[]".into());

        let result = sqlx::query(
            r#"
            INSERT INTO papers (id, title, authors_json, year, doi, arxiv_id, body, status,
                                chunk_count, last_error, created_at, updated_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                authors_json = excluded.authors_json,
                year = excluded.year,
                doi = excluded.doi,
                arxiv_id = excluded.arxiv_id,
                body = excluded.body,
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                last_error = excluded.last_error,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&paper.id)
        .bind(&paper.title)
        .bind(&authors_json)
        .bind(paper.year.map(|y| y as i64))
        .bind(&paper.doi)
        .bind(&paper.arxiv_id)
        .bind(&paper.body)
        .bind(paper.status.as_str())
        .bind(paper.chunk_count as i64)
        .bind(&paper.last_error)
        .bind(paper.created_at)
        .bind(paper.updated_at)
        .bind(paper.indexed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(CatalogError::Conflict {
                    paper_id: paper.id.clone(),
                    reason: e.message().to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, include_removed: bool) -> Result<Vec<Paper>, CatalogError> {
        let sql = if include_removed {
            "SELECT * FROM papers ORDER BY id"
        } else {
            "SELECT * FROM papers WHERE status != 'removed' ORDER BY id"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(paper_from_row).collect()
    }
}

// ============ In-memory ============

/// Catalog held in process memory, for tests and ephemeral indexes.
#[derive(Default)]
pub struct InMemoryCatalog {
    papers: RwLock<BTreeMap<String, Paper>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest<'a>(
    papers: &'a BTreeMap<String, Paper>,
    matches: impl Fn(&Paper) -> bool,
) -> Option<&'a Paper> {
    papers
        .values()
        .filter(|p| matches(p))
        .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
}

fn find_holder<'a>(
    papers: &'a BTreeMap<String, Paper>,
    exclude_id: &str,
    matches: impl Fn(&Paper) -> bool,
) -> Option<&'a Paper> {
    oldest(papers, |p| p.holds_identifiers() && p.id != exclude_id && matches(p))
}

#[async_trait]
impl PaperCatalog for InMemoryCatalog {
    async fn get(&self, id: &str) -> Result<Option<Paper>, CatalogError> {
        Ok(self.papers.read().get(id).cloned())
    }

    async fn find_duplicate(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
        exclude_id: &str,
    ) -> Result<Option<(String, DuplicateKey)>, CatalogError> {
        let papers = self.papers.read();
        if let Some(doi) = doi {
            if let Some(p) = find_holder(&papers, exclude_id, |p| p.doi.as_deref() == Some(doi)) {
                return Ok(Some((p.id.clone(), DuplicateKey::Doi)));
            }
        }
        if let Some(arxiv_id) = arxiv_id {
            if let Some(p) = find_holder(&papers, exclude_id, |p| {
                p.arxiv_id.as_deref() == Some(arxiv_id)
            }) {
                return Ok(Some((p.id.clone(), DuplicateKey::ArxivId)));
            }
        }
        Ok(None)
    }

    async fn find_unfinished(
        &self,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Result<Option<String>, CatalogError> {
        let papers = self.papers.read();
        let unfinished = |p: &Paper| p.status != IndexStatus::Removed && !p.holds_identifiers();
        let by_doi = doi.and_then(|doi| {
            oldest(&papers, |p| unfinished(p) && p.doi.as_deref() == Some(doi))
        });
        let found = by_doi.or_else(|| {
            arxiv_id.and_then(|arxiv_id| {
                oldest(&papers, |p| unfinished(p) && p.arxiv_id.as_deref() == Some(arxiv_id))
            })
        });
        Ok(found.map(|p| p.id.clone()))
    }

    async fn save(&self, paper: &Paper) -> Result<(), CatalogError> {
        let mut papers = self.papers.write();
        if paper.holds_identifiers() {
            let clash = find_holder(&papers, &paper.id, |p| {
                (paper.doi.is_some() && p.doi == paper.doi)
                    || (paper.arxiv_id.is_some() && p.arxiv_id == paper.arxiv_id)
            });
            if let Some(existing) = clash {
                return Err(CatalogError::Conflict {
                    paper_id: paper.id.clone(),
                    reason: format!("identifier held by '{}'", existing.id),
                });
            }
        }
        papers.insert(paper.id.clone(), paper.clone());
        Ok(())
    }

    async fn list(&self, include_removed: bool) -> Result<Vec<Paper>, CatalogError> {
        Ok(self
            .papers
            .read()
            .values()
            .filter(|p| include_removed || p.status != IndexStatus::Removed)
            .cloned()
            .collect())
    }
}
