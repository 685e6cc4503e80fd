//! Dual-store coordinator boundary (C7): the vector/keyword knowledge store.
//!
//! [`KnowledgeStore`] is implemented by two backends selected via
//! `vector_store.backend`: [`sqlite::SqliteStore`] (`"native"`) embeds
//! FTS5 keyword search and brute-force cosine similarity directly in the
//! local database; [`managed::ManagedStore`] (`"managed"`) delegates both to
//! an external HTTP service. Callers — the ingestion pipeline (C9) and the
//! retrieval engine (C10) — depend only on this trait.

pub mod managed;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{CodeExample, DocumentChunk, SearchHit, Source};

/// Derives a stable id from a natural key (e.g. `"{url}#{chunk_number}"`), so
/// re-ingesting the same URL produces the same chunk ids rather than minting
/// new ones every crawl.
pub fn derive_id(natural_key: &str) -> String {
    let digest = Sha256::digest(natural_key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Creates whatever schema/index the backend needs. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Replaces all chunks for every URL present in `chunks` before inserting
    /// the new set — a re-crawl of a URL never leaves stale chunks behind
    /// (§3 invariant: URL-scoped replace-all).
    async fn add_document_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<()>;

    async fn search_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>>;

    async fn search_documents_by_keyword(
        &self,
        query: &str,
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>>;

    async fn get_documents_by_url(&self, url: &str) -> Result<Vec<DocumentChunk>>;

    async fn delete_documents_by_url(&self, url: &str) -> Result<()>;

    /// Same replace-all-by-url semantics as [`KnowledgeStore::add_document_chunks`].
    async fn add_code_examples(&self, examples: Vec<CodeExample>) -> Result<()>;

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>>;

    /// Upserts a source's summary and adds `word_count_delta` to its running
    /// total. The additivity here is intentional: re-crawling the same URL
    /// still adds its word count again rather than replacing it (§9 Design
    /// Notes — known quirk carried over unchanged, not considered a bug).
    async fn update_source_info(&self, source_id: &str, summary: &str, word_count_delta: i64) -> Result<()>;

    async fn get_sources(&self) -> Result<Vec<Source>>;

    /// Keyword match over source id/summary; empty query returns every source.
    async fn search_sources(&self, query: &str) -> Result<Vec<Source>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic_and_key_sensitive() {
        let a = derive_id("https://a.test/doc#0");
        let b = derive_id("https://a.test/doc#0");
        let c = derive_id("https://a.test/doc#1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
