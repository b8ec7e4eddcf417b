//! Index statistics and health overview.
//!
//! Summarizes what is indexed: papers per lifecycle state, stored chunks,
//! the collection's vector dimension, and the database size on disk. Used
//! by `paperx stats` to confirm ingestion runs are landing.

use anyhow::Result;

use crate::config::Config;
use crate::index::PaperIndex;

/// Run the stats command: gather coordinator stats and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let index = PaperIndex::open(config).await?;
    let stats = index.coordinator().stats().await?;
    index.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Paper Index Stats");
    println!("=================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", stats.collection);
    println!("  Model:       {}", stats.model);
    println!(
        "  Dimension:   {}",
        stats
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(unset)".to_string())
    );
    println!();
    println!("  Papers:      {}", stats.indexed_papers);
    println!("  Chunks:      {}", stats.total_chunks);
    println!("  Avg chunks:  {:.1}", stats.avg_chunks_per_paper);
    println!();
    println!("  By status:");
    for (status, count) in &stats.papers_by_status {
        println!("    {:<12} {}", status, count);
    }
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM` UTC.
pub(crate) fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
