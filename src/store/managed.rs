//! Managed backend: delegates storage and search to an external HTTP service.
//!
//! Selected via `vector_store.backend = "managed"`. Every call is a single
//! JSON request/response round trip against `managed_endpoint`, retried with
//! [`RetryPolicy`] the same way the embedding batcher and context enricher
//! retry their own outbound calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{CodeExample, DocumentChunk, SearchHit, Source};
use crate::retry::RetryPolicy;

use super::KnowledgeStore;

pub struct ManagedStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl ManagedStore {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            policy: RetryPolicy::new(3, Duration::from_millis(500), 2),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.endpoint, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.policy
            .run(|| async {
                let response = self
                    .request(reqwest::Method::POST, path)
                    .json(body)
                    .send()
                    .await
                    .context("managed store request failed")?;
                if !response.status().is_success() {
                    anyhow::bail!(
                        "StoreUnavailable: managed backend returned HTTP {}",
                        response.status()
                    );
                }
                response
                    .json::<T>()
                    .await
                    .context("managed store returned an unparseable response")
            })
            .await
    }
}

#[async_trait]
impl KnowledgeStore for ManagedStore {
    async fn initialize(&self) -> Result<()> {
        let _: serde_json::Value = self.post("/v1/initialize", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn add_document_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .post("/v1/document_chunks", &serde_json::json!({ "chunks": chunks }))
            .await?;
        Ok(())
    }

    async fn search_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>> {
        let payload = serde_json::json!({
            "embedding": query_embedding,
            "match_count": match_count,
            "source_filter": source_filter,
            "metadata_filter": metadata_filter,
        });
        self.post("/v1/document_chunks/search", &payload).await
    }

    async fn search_documents_by_keyword(
        &self,
        query: &str,
        match_count: usize,
        source_filter: Option<&str>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchHit>> {
        let payload = serde_json::json!({
            "query": query,
            "match_count": match_count,
            "source_filter": source_filter,
            "metadata_filter": metadata_filter,
        });
        self.post("/v1/document_chunks/search_keyword", &payload).await
    }

    async fn get_documents_by_url(&self, url: &str) -> Result<Vec<DocumentChunk>> {
        self.post("/v1/document_chunks/by_url", &serde_json::json!({ "url": url }))
            .await
    }

    async fn delete_documents_by_url(&self, url: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post("/v1/document_chunks/delete_by_url", &serde_json::json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn add_code_examples(&self, examples: Vec<CodeExample>) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .post("/v1/code_examples", &serde_json::json!({ "examples": examples }))
            .await?;
        Ok(())
    }

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let payload = serde_json::json!({
            "embedding": query_embedding,
            "match_count": match_count,
            "source_filter": source_filter,
        });
        self.post("/v1/code_examples/search", &payload).await
    }

    async fn update_source_info(&self, source_id: &str, summary: &str, word_count_delta: i64) -> Result<()> {
        let payload = serde_json::json!({
            "source_id": source_id,
            "summary": summary,
            "word_count_delta": word_count_delta,
        });
        let _: serde_json::Value = self.post("/v1/sources/update", &payload).await?;
        Ok(())
    }

    async fn get_sources(&self) -> Result<Vec<Source>> {
        self.post("/v1/sources", &serde_json::json!({})).await
    }

    async fn search_sources(&self, query: &str) -> Result<Vec<Source>> {
        self.post("/v1/sources/search", &serde_json::json!({ "query": query }))
            .await
    }
}
