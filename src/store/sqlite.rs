//! Native backend: sqlite + substring keyword search + brute-force cosine scan.
//!
//! Grounded in the reference's own sqlite ingest/search machinery — a single
//! local file, no external service. Vector search does a full table scan
//! computing cosine similarity in process; this is adequate at the scale a
//! single-operator crawl produces and keeps the native backend dependency-free
//! beyond sqlx itself.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::collections::HashSet;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{CodeExample, DocumentChunk, SearchHit, Source};

use super::{derive_id, KnowledgeStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        // Schema creation lives in `crate::migrate`; nothing left to do here.
        Ok(())
    }

    async fn add_document_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let urls: HashSet<&str> = chunks.iter().map(|c| c.url.as_str()).collect();
        let mut tx = self.pool.begin().await?;

        for url in &urls {
            sqlx::query("DELETE FROM document_chunks WHERE url = ?")
                .bind(url)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM document_chunks_fts WHERE url = ?")
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        for chunk in &chunks {
            let id = derive_id(&format!("{}#{}", chunk.url, chunk.chunk_number));
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            let embedding_blob = vec_to_blob(&chunk.embedding);
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, url, chunk_number, content, metadata_json, embedding, source_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&chunk.url)
            .bind(chunk.chunk_number)
            .bind(&chunk.content)
            .bind(&metadata_json)
            .bind(&embedding_blob)
            .bind(&chunk.source_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO document_chunks_fts (chunk_id, url, content) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(&chunk.url)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>> {
        let rows = if let Some(source_id) = source_filter {
            sqlx::query(
                "SELECT id, url, chunk_number, content, metadata_json, embedding, source_id FROM document_chunks WHERE source_id = ?",
            )
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, url, chunk_number, content, metadata_json, embedding, source_id FROM document_chunks",
            )
            .fetch_all(&self.pool)
            .await?
        };

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| row_to_hit(row, query_embedding))
            .filter(|hit| matches_metadata(hit, metadata_filter))
            .collect();

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(match_count);
        Ok(hits)
    }

    async fn search_documents_by_keyword(
        &self,
        query: &str,
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>> {
        let pattern = format!("%{}%", escape_like_pattern(query));
        let rows = sqlx::query(
            r#"
            SELECT id, url, chunk_number, content, metadata_json, embedding, source_id
            FROM document_chunks
            WHERE content LIKE ? ESCAPE '\'
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(match_count as i64 * 4)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter(|row| {
                source_filter
                    .map(|s| row.get::<String, _>("source_id") == s)
                    .unwrap_or(true)
            })
            .map(|row| row_to_hit(row, &[]))
            .filter(|hit| matches_metadata(hit, metadata_filter))
            .collect();
        hits.truncate(match_count);
        Ok(hits)
    }

    async fn get_documents_by_url(&self, url: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT id, url, chunk_number, content, metadata_json, embedding, source_id FROM document_chunks WHERE url = ? ORDER BY chunk_number",
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_chunk).collect()
    }

    async fn delete_documents_by_url(&self, url: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_chunks_fts WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM code_examples WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM code_examples_fts WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_code_examples(&self, examples: Vec<CodeExample>) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }
        let urls: HashSet<&str> = examples.iter().map(|e| e.url.as_str()).collect();
        let mut tx = self.pool.begin().await?;

        for url in &urls {
            sqlx::query("DELETE FROM code_examples WHERE url = ?")
                .bind(url)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM code_examples_fts WHERE url = ?")
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }

        for example in &examples {
            let id = derive_id(&format!("{}#code#{}", example.url, example.chunk_number));
            let metadata_json = serde_json::to_string(&example.metadata)?;
            let embedding_blob = vec_to_blob(&example.embedding);
            sqlx::query(
                r#"
                INSERT INTO code_examples (id, url, chunk_number, code, summary, metadata_json, embedding, source_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&example.url)
            .bind(example.chunk_number)
            .bind(&example.code)
            .bind(&example.summary)
            .bind(&metadata_json)
            .bind(&embedding_blob)
            .bind(&example.source_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO code_examples_fts (code_id, url, code, summary) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&example.url)
            .bind(&example.code)
            .bind(&example.summary)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let rows = if let Some(source_id) = source_filter {
            sqlx::query(
                "SELECT id, url, chunk_number, code AS content, metadata_json, embedding, source_id FROM code_examples WHERE source_id = ?",
            )
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, url, chunk_number, code AS content, metadata_json, embedding, source_id FROM code_examples",
            )
            .fetch_all(&self.pool)
            .await?
        };

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| row_to_hit(row, query_embedding))
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(match_count);
        Ok(hits)
    }

    async fn update_source_info(&self, source_id: &str, summary: &str, word_count_delta: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (source_id, summary, total_word_count, updated_at)
            VALUES (?, ?, ?, unixepoch())
            ON CONFLICT(source_id) DO UPDATE SET
                summary = excluded.summary,
                total_word_count = sources.total_word_count + excluded.total_word_count,
                updated_at = unixepoch()
            "#,
        )
        .bind(source_id)
        .bind(summary)
        .bind(word_count_delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT source_id, summary, total_word_count FROM sources ORDER BY source_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Source {
                source_id: row.get("source_id"),
                summary: row.get("summary"),
                total_word_count: row.get("total_word_count"),
            })
            .collect())
    }

    async fn search_sources(&self, query: &str) -> Result<Vec<Source>> {
        if query.trim().is_empty() {
            return self.get_sources().await;
        }
        let pattern = format!("%{}%", query.to_ascii_lowercase());
        let rows = sqlx::query(
            "SELECT source_id, summary, total_word_count FROM sources WHERE lower(source_id) LIKE ? OR lower(summary) LIKE ? ORDER BY source_id",
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Source {
                source_id: row.get("source_id"),
                summary: row.get("summary"),
                total_word_count: row.get("total_word_count"),
            })
            .collect())
    }
}

fn row_to_hit(row: sqlx::sqlite::SqliteRow, query_embedding: &[f32]) -> SearchHit {
    let embedding_blob: Option<Vec<u8>> = row.get("embedding");
    let embedding = embedding_blob.map(|b| blob_to_vec(&b)).unwrap_or_default();
    let similarity = if query_embedding.is_empty() {
        0.0
    } else {
        cosine_similarity(&embedding, query_embedding) as f64
    };
    let metadata_json: String = row.get("metadata_json");
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();

    SearchHit {
        id: row.get("id"),
        url: row.get("url"),
        chunk_number: row.get("chunk_number"),
        content: row.get("content"),
        metadata,
        source_id: row.get("source_id"),
        similarity,
        rerank_score: None,
    }
}

fn row_to_chunk(row: sqlx::sqlite::SqliteRow) -> Result<DocumentChunk> {
    let embedding_blob: Option<Vec<u8>> = row.get("embedding");
    let embedding = embedding_blob.map(|b| blob_to_vec(&b)).unwrap_or_default();
    let metadata_json: String = row.get("metadata_json");
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&metadata_json)?;

    Ok(DocumentChunk {
        id: row.get("id"),
        url: row.get("url"),
        chunk_number: row.get("chunk_number"),
        content: row.get("content"),
        metadata,
        embedding,
        source_id: row.get("source_id"),
    })
}

/// True if every key/value pair in `filter` is present and equal in the
/// hit's own metadata. `None` (no filter requested) always matches.
fn matches_metadata(hit: &SearchHit, filter: Option<&HashMap<String, Value>>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.iter().all(|(k, v)| hit.metadata.get(k) == Some(v)),
    }
}

/// Keyword search is a substring match on `content`, not FTS5 token matching
/// (FTS tokenizes on word boundaries, so a mid-word substring like `"wnership"`
/// would never match `"ownership"`). Escapes `LIKE`'s own wildcard characters
/// so the query is matched literally.
fn escape_like_pattern(query: &str) -> String {
    query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    async fn test_store() -> SqliteStore {
        let toml = r#"
[db]
path = ":memory:"
[server]
bind = "127.0.0.1:0"
[vector_store]
backend = "native"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations_on_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn chunk(url: &str, n: i64, content: &str, source_id: &str) -> DocumentChunk {
        DocumentChunk {
            id: String::new(),
            url: url.to_string(),
            chunk_number: n,
            content: content.to_string(),
            metadata: HashMap::new(),
            embedding: vec![1.0, 0.0, 0.0],
            source_id: source_id.to_string(),
        }
    }

    #[tokio::test]
    async fn reingesting_a_url_replaces_its_chunks() {
        let store = test_store().await;
        store
            .add_document_chunks(vec![chunk("https://a.test", 0, "first", "a.test")])
            .await
            .unwrap();
        store
            .add_document_chunks(vec![chunk("https://a.test", 0, "second", "a.test")])
            .await
            .unwrap();
        let chunks = store.get_documents_by_url("https://a.test").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "second");
    }

    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let store = test_store().await;
        store
            .add_document_chunks(vec![
                chunk("https://a.test", 0, "alpha", "a.test"),
                chunk("https://b.test", 0, "beta", "b.test"),
            ])
            .await
            .unwrap();
        let hits = store.search_documents(&[1.0, 0.0, 0.0], 5, None, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[tokio::test]
    async fn source_word_count_is_additive_across_reingests() {
        let store = test_store().await;
        store.update_source_info("a.test", "summary one", 100).await.unwrap();
        store.update_source_info("a.test", "summary two", 50).await.unwrap();
        let sources = store.get_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].total_word_count, 150);
        assert_eq!(sources[0].summary, "summary two");
    }
}
