//! Tool dispatcher (C11): request framing, timeouts, cancellation, input
//! validation, and the typed error envelope every tool call completes with.
//!
//! [`Dispatcher`] is the single seam between the transports (`crate::mcp`,
//! `crate::server`) and the library internals (C9 ingestion, C10 retrieval,
//! C8 graph reads). Transports never touch `IngestionService`/`RetrievalEngine`
//! directly — they go through here so every call gets the same id/timeout/
//! error-envelope treatment regardless of which transport invoked it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ErrorKind, ServerError};
use crate::graph::GraphStore;
use crate::ingest::IngestionService;
use crate::retrieval::RetrievalEngine;
use crate::store::KnowledgeStore;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub operation: String,
    pub request_id: String,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct Dispatcher {
    pub ingestion: IngestionService,
    pub retrieval: RetrievalEngine,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub store: Arc<dyn KnowledgeStore>,
    pub config: Config,
}

fn random_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..8).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

fn non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("InvalidInput: '{field}' must not be empty");
    }
    Ok(())
}

fn positive(value: i64, field: &str) -> Result<()> {
    if value <= 0 {
        anyhow::bail!("InvalidInput: '{field}' must be a positive integer");
    }
    Ok(())
}

fn http_scheme(url: &str) -> Result<()> {
    match url::Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => anyhow::bail!("InvalidInput: '{url}' must be an http/https URL"),
    }
}

impl Dispatcher {
    /// Runs `fut` under the dispatcher's request framing: id generation,
    /// start/end logging, the configured outer timeout, and cooperative
    /// cancellation via `cancel`. Every outcome — success or failure —
    /// resolves to an `Envelope`, never a bare error.
    async fn run<T, Fut>(&self, operation: &str, cancel: CancellationToken, fut: Fut) -> Envelope
    where
        T: Serialize,
        Fut: Future<Output = Result<T>>,
    {
        let request_id = random_request_id();
        let start = Instant::now();
        info!(operation, request_id = %request_id, "start");

        let timeout = Duration::from_secs(self.config.dispatch.timeout_secs);
        let outcome: Result<T> = tokio::select! {
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(anyhow::Error::new(ServerError::InternalError(
                    format!("operation timed out after {}s", timeout.as_secs()),
                ))),
            },
            _ = cancel.cancelled() => Err(anyhow::Error::new(ServerError::Cancelled)),
        };

        let elapsed = start.elapsed().as_secs_f64();
        match outcome {
            Ok(value) => {
                info!(operation, request_id = %request_id, elapsed, outcome = "ok", "end");
                Envelope {
                    success: true,
                    operation: operation.to_string(),
                    request_id,
                    elapsed_seconds: elapsed,
                    result: serde_json::to_value(value).ok(),
                    error: None,
                }
            }
            Err(e) => {
                let server_err = ServerError::from_anyhow(&e);
                warn!(operation, request_id = %request_id, elapsed, kind = ?server_err.kind(), "end");
                Envelope {
                    success: false,
                    operation: operation.to_string(),
                    request_id,
                    elapsed_seconds: elapsed,
                    result: None,
                    error: Some(ErrorEnvelope {
                        kind: server_err.kind(),
                        message: server_err.sanitized_message(),
                        detail: None,
                    }),
                }
            }
        }
    }

    pub async fn scrape_urls(&self, cancel: CancellationToken, urls: Vec<String>) -> Envelope {
        if let Err(e) = validate_urls(&urls) {
            return self.run::<(), _>("scrape_urls", cancel, async { Err(e) }).await;
        }
        self.run("scrape_urls", cancel, async move { Ok(self.ingestion.scrape_urls(urls).await) })
            .await
    }

    pub async fn smart_crawl_url(
        &self,
        cancel: CancellationToken,
        url: String,
        max_depth: i64,
        max_concurrent: i64,
    ) -> Envelope {
        if let Err(e) = http_scheme(&url).and_then(|_| positive(max_depth, "max_depth")).and_then(|_| positive(max_concurrent, "max_concurrent")) {
            return self.run::<(), _>("smart_crawl_url", cancel, async { Err(e) }).await;
        }
        self.run("smart_crawl_url", cancel, async move {
            Ok(self
                .ingestion
                .smart_crawl_url(&url, max_depth as usize, max_concurrent as usize)
                .await)
        })
        .await
    }

    pub async fn search(
        &self,
        cancel: CancellationToken,
        query: String,
        num_results: i64,
        return_raw_markdown: bool,
    ) -> Envelope {
        if let Err(e) = non_empty(&query, "query").and_then(|_| positive(num_results, "num_results")) {
            return self.run::<(), _>("search", cancel, async { Err(e) }).await;
        }
        self.run("search", cancel, async move {
            self.ingestion
                .search(&query, num_results as usize, return_raw_markdown, &self.retrieval)
                .await
        })
        .await
    }

    pub async fn perform_rag_query(
        &self,
        cancel: CancellationToken,
        query: String,
        source: Option<String>,
        match_count: i64,
    ) -> Envelope {
        if let Err(e) = non_empty(&query, "query").and_then(|_| positive(match_count, "match_count")) {
            return self.run::<(), _>("perform_rag_query", cancel, async { Err(e) }).await;
        }
        self.run("perform_rag_query", cancel, async move {
            self.retrieval.rag_query(&query, source.as_deref(), match_count as usize).await
        })
        .await
    }

    pub async fn search_code_examples(
        &self,
        cancel: CancellationToken,
        query: String,
        source_id: Option<String>,
        match_count: i64,
    ) -> Envelope {
        if let Err(e) = non_empty(&query, "query").and_then(|_| positive(match_count, "match_count")) {
            return self.run::<(), _>("search_code_examples", cancel, async { Err(e) }).await;
        }
        // `validated_code_search` degrades to a passthrough per-hit (is_valid
        // true, neo4j_validated false) whenever the graph backend is absent,
        // so this is the right call regardless of the feature flag.
        self.run("search_code_examples", cancel, async move {
            self.retrieval
                .validated_code_search(&query, source_id.as_deref(), match_count as usize)
                .await
        })
        .await
    }

    pub async fn get_available_sources(&self, cancel: CancellationToken) -> Envelope {
        self.run("get_available_sources", cancel, async move {
            self.store.get_sources().await
        })
        .await
    }

    pub async fn parse_github_repository(&self, cancel: CancellationToken, repo_url: String) -> Envelope {
        if let Err(e) = non_empty(&repo_url, "repo_url") {
            return self.run::<(), _>("parse_github_repository", cancel, async { Err(e) }).await;
        }
        self.run("parse_github_repository", cancel, async move {
            self.ingestion.parse_github_repository(&repo_url).await
        })
        .await
    }

    pub async fn parse_repository_branch(&self, cancel: CancellationToken, repo_url: String, branch: String) -> Envelope {
        if let Err(e) = non_empty(&repo_url, "repo_url").and_then(|_| non_empty(&branch, "branch")) {
            return self.run::<(), _>("parse_repository_branch", cancel, async { Err(e) }).await;
        }
        self.run("parse_repository_branch", cancel, async move {
            self.ingestion.parse_repository_branch(&repo_url, &branch).await
        })
        .await
    }

    pub async fn update_parsed_repository(&self, cancel: CancellationToken, repo_url: String) -> Envelope {
        if let Err(e) = non_empty(&repo_url, "repo_url") {
            return self.run::<(), _>("update_parsed_repository", cancel, async { Err(e) }).await;
        }
        self.run("update_parsed_repository", cancel, async move {
            self.ingestion.update_parsed_repository(&repo_url).await
        })
        .await
    }

    pub async fn get_repository_info(&self, cancel: CancellationToken, repo_name: String) -> Envelope {
        if let Err(e) = non_empty(&repo_name, "repo_name") {
            return self.run::<(), _>("get_repository_info", cancel, async { Err(e) }).await;
        }
        self.run("get_repository_info", cancel, async move {
            let graph = self
                .graph
                .as_ref()
                .context("GraphUnavailable: no graph backend configured")?;
            let repos = graph.list_repositories().await?;
            repos
                .into_iter()
                .find(|r| r.name == repo_name)
                .context("InvalidInput: no such repository has been graph-ingested")
        })
        .await
    }

    /// Thin natural-language-ish dispatcher over C8's read operations
    /// (§4.10 supplement): extracts a quoted or bare repository/entity name
    /// from free text and falls back to `list_repositories()` when nothing
    /// is named.
    pub async fn query_knowledge_graph(&self, cancel: CancellationToken, query: String) -> Envelope {
        if let Err(e) = non_empty(&query, "query") {
            return self.run::<(), _>("query_knowledge_graph", cancel, async { Err(e) }).await;
        }
        self.run("query_knowledge_graph", cancel, async move {
            let graph = self
                .graph
                .as_ref()
                .context("GraphUnavailable: no graph backend configured")?;
            query_graph_free_text(graph.as_ref(), &query).await
        })
        .await
    }

    /// Best-effort static check (§6 supplement): parses `script_path` for
    /// call expressions and looks each up via C8's `find_method`/
    /// `find_function`/`find_class`, reporting unresolvable ones.
    pub async fn check_ai_script_hallucinations(&self, cancel: CancellationToken, script_path: String) -> Envelope {
        if let Err(e) = non_empty(&script_path, "script_path") {
            return self.run::<(), _>("check_ai_script_hallucinations", cancel, async { Err(e) }).await;
        }
        self.run("check_ai_script_hallucinations", cancel, async move {
            let graph = self
                .graph
                .as_ref()
                .context("GraphUnavailable: no graph backend configured")?;
            check_script_hallucinations(graph.as_ref(), &script_path).await
        })
        .await
    }
}

fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("InvalidInput: 'url' must be a non-empty string or non-empty list of strings");
    }
    for u in urls {
        http_scheme(u)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct HallucinationReport {
    script_path: String,
    calls_checked: usize,
    unresolved: Vec<String>,
}

async fn check_script_hallucinations(graph: &dyn GraphStore, script_path: &str) -> Result<HallucinationReport> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("InvalidInput: could not read script at '{script_path}'"))?;
    let calls = crate::graph::analyze::extract_call_names(&source);

    let mut unresolved = Vec::new();
    for call in &calls {
        let found = !graph.find_function(call, None).await?.is_empty()
            || !graph.find_method(call, None, None).await?.is_empty()
            || !graph.find_class(call, None).await?.is_empty();
        if !found {
            unresolved.push(call.clone());
        }
    }

    Ok(HallucinationReport {
        script_path: script_path.to_string(),
        calls_checked: calls.len(),
        unresolved,
    })
}

#[derive(Debug, Clone, Serialize)]
enum GraphQueryResult {
    Repositories(Vec<crate::models::Repository>),
    Classes(Vec<crate::models::ClassNode>),
    Methods(Vec<crate::models::MethodNode>),
    Functions(Vec<crate::models::FunctionNode>),
}

async fn query_graph_free_text(graph: &dyn GraphStore, query: &str) -> Result<GraphQueryResult> {
    let Some(entity) = extract_entity_name(query) else {
        return Ok(GraphQueryResult::Repositories(graph.list_repositories().await?));
    };

    let classes = graph.find_class(&entity, None).await?;
    if !classes.is_empty() {
        return Ok(GraphQueryResult::Classes(classes));
    }
    let methods = graph.find_method(&entity, None, None).await?;
    if !methods.is_empty() {
        return Ok(GraphQueryResult::Methods(methods));
    }
    let functions = graph.find_function(&entity, None).await?;
    Ok(GraphQueryResult::Functions(functions))
}

/// Crude keyword extraction: the last quoted substring if present, else the
/// last whitespace-delimited token containing no spaces — good enough for
/// "find the Foo class" / "what does process_batch do" style queries absent
/// a dedicated NL-to-Cypher layer.
fn extract_entity_name(query: &str) -> Option<String> {
    if let Some(start) = query.find(['"', '\'']) {
        let quote = query.as_bytes()[start] as char;
        if let Some(end) = query[start + 1..].find(quote) {
            return Some(query[start + 1..start + 1 + end].to_string());
        }
    }
    query
        .split_whitespace()
        .last()
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
        .filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_entity_name_over_trailing_token() {
        assert_eq!(extract_entity_name("find the class \"Widget\" please").as_deref(), Some("Widget"));
    }

    #[test]
    fn falls_back_to_trailing_token() {
        assert_eq!(extract_entity_name("what does process_batch do").as_deref(), Some("do"));
    }

    #[test]
    fn rejects_empty_and_non_positive_inputs() {
        assert!(non_empty("", "x").is_err());
        assert!(positive(0, "x").is_err());
        assert!(positive(-1, "x").is_err());
        assert!(positive(1, "x").is_ok());
    }
}
