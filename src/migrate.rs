//! Database schema migrations for the native (sqlite) vector/keyword backend.
//!
//! Creates `sources`, `document_chunks`, `code_examples`, and their FTS5
//! keyword-search mirrors. Idempotent — safe to run on every startup, the way
//! `ctx init` re-runs it without requiring a fresh database.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Runs the same migrations against an already-open pool — used directly by
/// store tests that spin up an in-memory database.
pub async fn run_migrations_on_pool(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id TEXT PRIMARY KEY,
            summary TEXT NOT NULL DEFAULT '',
            total_word_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            chunk_number INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            source_id TEXT NOT NULL,
            UNIQUE(url, chunk_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_examples (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            chunk_number INTEGER NOT NULL,
            code TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            source_id TEXT NOT NULL,
            UNIQUE(url, chunk_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_fts_if_missing(
        pool,
        "document_chunks_fts",
        "fts5(chunk_id UNINDEXED, url UNINDEXED, content)",
    )
    .await?;
    create_fts_if_missing(
        pool,
        "code_examples_fts",
        "fts5(code_id UNINDEXED, url UNINDEXED, code, summary)",
    )
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_document_chunks_url ON document_chunks(url)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_source_id ON document_chunks(source_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_code_examples_url ON code_examples(url)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_code_examples_source_id ON code_examples(source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_fts_if_missing(pool: &sqlx::SqlitePool, name: &str, definition: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    if !exists {
        sqlx::query(&format!("CREATE VIRTUAL TABLE {name} USING {definition}"))
            .execute(pool)
            .await?;
    }
    Ok(())
}
