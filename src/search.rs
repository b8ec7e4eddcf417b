//! `paperx search` and `paperx context`.
//!
//! Both go through [`Retriever`](crate::retriever::Retriever), so a missing
//! API key or an unreachable provider prints `No results.` rather than
//! failing; the cause is logged on stderr.

use anyhow::Result;

use crate::config::Config;
use crate::index::PaperIndex;

/// Run a search and print ranked chunks, or a JSON bundle with `--json`.
pub async fn run_search(
    config: &Config,
    query: &str,
    paper_id: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = PaperIndex::open(config).await?;
    let bundle = index
        .retriever()
        .search_scoped(query, limit, paper_id.as_deref())
        .await;
    index.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
        return Ok(());
    }

    if bundle.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in bundle.chunks.iter().enumerate() {
        let title_display = chunk.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {}", i + 1, chunk.score, title_display);
        println!("    paper: {}", chunk.paper_id);
        println!("    chunk: {}", chunk.chunk_id);
        println!("    excerpt: \"{}\"", excerpt(&chunk.text, 240));
        println!();
    }

    Ok(())
}

/// Print the prompt-ready context block for `query`.
pub async fn run_context(
    config: &Config,
    query: &str,
    paper_id: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    let context = index
        .retriever()
        .context_for_query(query, limit, paper_id.as_deref())
        .await;
    index.close().await;

    if context.is_empty() {
        println!("No results.");
    } else {
        println!("{}", context);
    }
    Ok(())
}

/// Single-line preview of `text`, cut at a char boundary.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\nb", 10), "a b");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("  ünï  ", 3), "ünï");
    }
}
