//! Paper maintenance commands: `ingest`, `reindex`, `delete`, `status`,
//! and `papers`.
//!
//! Ingest reads one JSON file per paper in the [`PaperInput`] shape:
//!
//! ```json
//! {
//!   "paper_id": "attention",
//!   "title": "Attention Is All You Need",
//!   "cleaned_text": "...",
//!   "metadata": { "authors": ["Vaswani"], "year": 2017, "arxiv_id": "1706.03762v5" }
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::IngestError;
use crate::index::PaperIndex;
use crate::models::PaperInput;
use crate::pool::IngestionPool;
use crate::stats::format_ts;

pub fn read_paper_file(path: &Path) -> Result<PaperInput> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read paper file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse paper file: {}", path.display()))
}

/// Ingest every file through the worker pool. Duplicates are reported and
/// skipped; any other failure makes the command exit non-zero.
pub async fn run_ingest(config: &Config, files: &[PathBuf], workers: Option<usize>) -> Result<()> {
    let inputs = files
        .iter()
        .map(|path| read_paper_file(path))
        .collect::<Result<Vec<_>>>()?;

    let index = PaperIndex::open(config).await?;
    let pool = match workers {
        Some(n) => IngestionPool::new(index.coordinator().clone(), n),
        None => index.workers().clone(),
    };
    let results = pool.ingest_all(inputs).await;
    index.close().await;

    let mut indexed = 0;
    let mut duplicates = 0;
    let mut failed = 0;
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(report) => {
                indexed += 1;
                println!(
                    "indexed {} ({} chunks) from {}",
                    report.paper_id,
                    report.chunks_written,
                    path.display()
                );
            }
            Err(IngestError::Duplicate {
                existing_id,
                matched_on,
            }) => {
                duplicates += 1;
                println!(
                    "skipped {}: same {} as {}",
                    path.display(),
                    matched_on,
                    existing_id
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("Error: {}: {}", path.display(), e);
            }
        }
    }

    println!();
    println!("ingest");
    println!("  indexed: {}", indexed);
    println!("  duplicates: {}", duplicates);
    println!("  failed: {}", failed);

    if failed > 0 {
        bail!("{} of {} papers failed to index", failed, files.len());
    }
    Ok(())
}

pub async fn run_reindex(config: &Config, paper_id: &str, text_file: Option<PathBuf>) -> Result<()> {
    let new_text = match text_file {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?,
        ),
        None => None,
    };

    let index = PaperIndex::open(config).await?;
    let result = index.coordinator().reindex(paper_id, new_text).await;
    index.close().await;

    let report = result?;
    println!("reindex {}", report.paper_id);
    println!("  chunks written: {}", report.chunks_written);
    println!("  stale removed: {}", report.stale_removed);
    Ok(())
}

/// Re-index every live paper. With `rebuild`, the collection is emptied
/// first so a new model with a different dimension can take over.
pub async fn run_reindex_all(config: &Config, rebuild: bool) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    if rebuild {
        index.store().reset().await?;
        println!("reindex --all: cleared collection '{}'", index.store().collection());
    }
    let summary = index.coordinator().reindex_all().await;
    index.close().await;

    let summary = summary?;
    println!("reindex --all");
    println!("  papers: {}", summary.total);
    println!("  indexed: {}", summary.indexed);
    println!("  chunks: {}", summary.total_chunks);
    println!("  failed: {}", summary.failed.len());
    for (paper_id, error) in &summary.failed {
        eprintln!("Error: {}: {}", paper_id, error);
    }

    if !summary.failed.is_empty() {
        bail!("{} of {} papers failed to re-index", summary.failed.len(), summary.total);
    }
    Ok(())
}

pub async fn run_delete(config: &Config, paper_id: &str) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    let removed = index.coordinator().delete(paper_id).await;
    index.close().await;

    println!("deleted {} ({} chunks removed)", paper_id, removed?);
    Ok(())
}

pub async fn run_status(config: &Config, paper_id: &str) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    let paper = index.coordinator().get_paper(paper_id).await;
    index.close().await;

    let paper = match paper? {
        Some(p) => p,
        None => bail!("paper not found: {}", paper_id),
    };

    println!("--- Paper ---");
    println!("id:          {}", paper.id);
    println!("title:       {}", paper.title);
    if !paper.authors.is_empty() {
        println!("authors:     {}", paper.authors.join(", "));
    }
    if let Some(year) = paper.year {
        println!("year:        {}", year);
    }
    if let Some(ref doi) = paper.doi {
        println!("doi:         {}", doi);
    }
    if let Some(ref arxiv_id) = paper.arxiv_id {
        println!("arxiv_id:    {}", arxiv_id);
    }
    println!("status:      {}", paper.status);
    println!("chunks:      {}", paper.chunk_count);
    println!("created_at:  {}", format_ts(paper.created_at));
    println!("updated_at:  {}", format_ts(paper.updated_at));
    if let Some(ts) = paper.indexed_at {
        println!("indexed_at:  {}", format_ts(ts));
    }
    if let Some(ref error) = paper.last_error {
        println!("last_error:  {}", error);
    }
    Ok(())
}

pub async fn run_papers(config: &Config, include_removed: bool) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    let papers = index.coordinator().list_papers(include_removed).await;
    index.close().await;

    let papers = papers?;
    if papers.is_empty() {
        println!("No papers.");
        return Ok(());
    }

    println!("{:<36} {:<12} {:>7}  TITLE", "ID", "STATUS", "CHUNKS");
    println!("{}", "-".repeat(76));
    for paper in &papers {
        println!(
            "{:<36} {:<12} {:>7}  {}",
            paper.id, paper.status, paper.chunk_count, paper.title
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_paper_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.json");
        std::fs::write(
            &path,
            r#"{"title": "T", "cleaned_text": "body", "metadata": {"year": 2020}}"#,
        )
        .unwrap();

        let input = read_paper_file(&path).unwrap();
        assert_eq!(input.paper_id, None);
        assert_eq!(input.title, "T");
        assert_eq!(input.metadata.year, Some(2020));
    }

    #[test]
    fn test_read_paper_file_rejects_missing_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.json");
        std::fs::write(&path, r#"{"title": "T"}"#).unwrap();
        assert!(read_paper_file(&path).is_err());
    }
}
