use anyhow::Result;
use sqlx::SqlitePool;

use crate::catalog::HOLDS_IDENTIFIERS;

/// Create the schema. Every statement is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per vector collection; dimension is fixed by the first write
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dimension INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            paper_id TEXT,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS papers (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            authors_json TEXT NOT NULL DEFAULT '[]',
            year INTEGER,
            doi TEXT,
            arxiv_id TEXT,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            indexed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_paper_id ON vectors(collection, paper_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_papers_status ON papers(status)")
        .execute(pool)
        .await?;

    // Identifiers are unique among papers that hold them. Tombstones and
    // papers whose first run never completed are left out.
    sqlx::query("DROP INDEX IF EXISTS idx_papers_doi")
        .execute(pool)
        .await?;
    sqlx::query("DROP INDEX IF EXISTS idx_papers_arxiv_id")
        .execute(pool)
        .await?;
    for column in ["doi", "arxiv_id"] {
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_papers_{col}_held ON papers({col}) \
             WHERE {col} IS NOT NULL AND {held}",
            col = column,
            held = HOLDS_IDENTIFIERS
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}
