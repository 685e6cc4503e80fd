//! Ingestion orchestrator (C9).
//!
//! Five entry points, all ultimately routing through the per-URL persistence
//! pipeline: C1 (classify) -> C2 (fetch) -> {C3 (chunk), C5 (code_extract)} ->
//! C4 (enrich, optional) -> C6 (embed) -> C7 (persist). Repository entry
//! points delegate to C8 instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::chunk;
use crate::code_extract;
use crate::config::Config;
use crate::embedding;
use crate::enrich;
use crate::fetch::{self, FetchConfig, FetchResult};
use crate::graph::repo_fetch;
use crate::graph::{analyze, AnalyzedFile, GraphStore};
use crate::models::{CodeExample, DocumentChunk};
use crate::planner;
use crate::retrieval::RetrievalEngine;
use crate::store::{derive_id, KnowledgeStore};

#[derive(Debug, Clone, Serialize)]
pub struct UrlOutcome {
    pub url: String,
    pub ok: bool,
    pub chunks_stored: usize,
    pub code_examples_stored: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub results: Vec<UrlOutcome>,
    pub total_chunks: usize,
    pub total_code_examples: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub ingest: IngestReport,
    pub raw_markdown: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryReport {
    pub repo_name: String,
    pub branch: Option<String>,
    pub files_analyzed: usize,
    pub classes: usize,
    pub methods: usize,
    pub functions: usize,
    pub code_examples_mined: usize,
}

pub struct IngestionService {
    pub store: Arc<dyn KnowledgeStore>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub http: reqwest::Client,
    pub config: Config,
}

impl IngestionService {
    pub async fn scrape_urls(&self, urls: Vec<String>) -> IngestReport {
        let start = Instant::now();
        let max_concurrent = self.config.features.max_concurrent_fetches;

        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<String> = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();

        let fetch_results = fetch::fetch_batch(&self.http, &deduped, max_concurrent, &FetchConfig::default()).await;

        let results = crate::batch::run_batched(fetch_results, max_concurrent, |result| async move {
            self.persist_fetch_result(result).await
        })
        .await;

        self.finish_report(results, start)
    }

    pub async fn smart_crawl_url(&self, start_url: &str, max_depth: usize, max_concurrent: usize) -> IngestReport {
        let urls = planner::plan_crawl(&self.http, start_url, max_depth, max_concurrent).await;
        self.scrape_urls(urls).await
    }

    /// Calls the external meta-search front-end for `num_results` URLs, then
    /// either returns their raw markdown or hands the query to the retrieval
    /// engine (§4.10), per `return_raw_markdown`.
    pub async fn search(
        &self,
        query: &str,
        num_results: usize,
        return_raw_markdown: bool,
        retrieval: &RetrievalEngine,
    ) -> Result<SearchReport> {
        let endpoint = self
            .config
            .meta_search
            .endpoint
            .as_deref()
            .context("InvalidInput: meta_search.endpoint is not configured")?;

        let response = self
            .http
            .get(endpoint)
            .query(&[("q", query), ("num_results", &num_results.to_string())])
            .send()
            .await
            .context("FetchFailed: meta-search request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("FetchFailed: meta-search returned HTTP {}", response.status());
        }

        let urls: Vec<String> = response
            .json::<MetaSearchResponse>()
            .await
            .context("FetchFailed: meta-search returned an unexpected response shape")?
            .results
            .into_iter()
            .map(|r| r.url)
            .collect();

        let ingest = self.scrape_urls(urls.clone()).await;

        if return_raw_markdown {
            let mut raw = HashMap::new();
            for url in &urls {
                if let Ok(chunks) = self.store.get_documents_by_url(url).await {
                    let joined = chunks.into_iter().map(|c| c.content).collect::<Vec<_>>().join("\n\n");
                    raw.insert(url.clone(), joined);
                }
            }
            Ok(SearchReport {
                ingest,
                raw_markdown: Some(raw),
            })
        } else {
            // Priming the cache here means a follow-up rag_query call for the
            // same query string is a cache hit.
            let _ = retrieval
                .rag_query(query, None, self.config.retrieval.default_match_count as usize)
                .await;
            Ok(SearchReport {
                ingest,
                raw_markdown: None,
            })
        }
    }

    pub async fn parse_github_repository(&self, clone_url: &str) -> Result<RepositoryReport> {
        self.parse_repository(clone_url, None).await
    }

    pub async fn parse_repository_branch(&self, clone_url: &str, branch: &str) -> Result<RepositoryReport> {
        self.parse_repository(clone_url, Some(branch)).await
    }

    /// Equivalent to a re-parse; the graph ingest protocol always clears
    /// before re-writing, so this is naturally idempotent.
    pub async fn update_parsed_repository(&self, clone_url: &str) -> Result<RepositoryReport> {
        self.parse_repository(clone_url, None).await
    }

    async fn parse_repository(&self, clone_url: &str, branch: Option<&str>) -> Result<RepositoryReport> {
        if !self.config.features.use_knowledge_graph {
            anyhow::bail!("InvalidInput: the knowledge graph feature is disabled");
        }
        let graph = self
            .graph
            .as_ref()
            .context("GraphUnavailable: no graph backend configured")?;

        let repo_name = repo_name_from_clone_url(clone_url);
        let cache_dir = self
            .config
            .graph_store
            .workspace_dir
            .as_deref()
            .map(|d| d.join(&repo_name))
            .unwrap_or_else(|| repo_fetch::default_cache_dir(&self.config.db.path, clone_url));

        let repo_dir = match branch {
            Some(b) => repo_fetch::clone_or_update(clone_url, b, &cache_dir)
                .context("FetchFailed: repository clone/update failed")?,
            None => clone_discovering_branch(clone_url, &cache_dir)?,
        };

        let repository = repo_fetch::repository_metadata(&repo_name, clone_url, &repo_dir);
        let branches = repo_fetch::list_branches(&repo_dir, repository.default_branch.as_deref());
        let tags = repo_fetch::list_tags(&repo_dir);
        let commits = repo_fetch::list_commits(&repo_dir, self.config.features.commit_history_limit);

        let files = analyzed_files(&repo_dir);

        graph
            .clear_repository(&repo_name)
            .await
            .context("GraphCleanupFailed: clear before ingest failed")?;
        graph
            .ingest_repository(&repository, &files, &branches, &tags, &commits)
            .await
            .context("GraphUnavailable: repository ingest failed")?;

        let (classes, methods, functions) = files.iter().fold((0, 0, 0), |(c, m, f), af| {
            (
                c + af.analysis.classes.len(),
                m + af.analysis.methods.len(),
                f + af.analysis.functions.len(),
            )
        });

        let mined = if self.config.features.use_agentic_rag {
            self.mine_and_store_code_examples(&repo_name, &files).await.unwrap_or_else(|e| {
                warn!(error = %e, "synthetic code example mining failed, continuing");
                0
            })
        } else {
            0
        };

        Ok(RepositoryReport {
            repo_name,
            branch: repository.default_branch,
            files_analyzed: files.len(),
            classes,
            methods,
            functions,
            code_examples_mined: mined,
        })
    }

    /// Mines synthetic CodeExamples straight from the just-ingested graph
    /// nodes: one per class (public-method stub listing, capped at 5) and one
    /// per public method/function (§4.8 supplement).
    async fn mine_and_store_code_examples(&self, repo_name: &str, files: &[AnalyzedFile]) -> Result<usize> {
        // Each tuple is (code, file_path, embedding_text).
        let mut mined: Vec<(String, String, String)> = Vec::new();

        for file in files {
            for class in &file.analysis.classes {
                let public_methods: Vec<_> = file
                    .analysis
                    .methods
                    .iter()
                    .filter(|m| m.class_name == class.qualified_name && !m.name.starts_with('_'))
                    .take(5)
                    .collect();
                if public_methods.is_empty() {
                    continue;
                }
                let listing = public_methods
                    .iter()
                    .map(|m| format!("def {}({}):", m.name, m.params_raw))
                    .collect::<Vec<_>>()
                    .join("\n");
                let embedding_text = format!("Class {} in {} with methods:\n{}", class.qualified_name, file.path, listing);
                mined.push((listing, file.path.clone(), embedding_text));
            }
            for method in file.analysis.methods.iter().filter(|m| !m.name.starts_with('_')) {
                let embedding_text = format!(
                    "Method {} on {} -> {}",
                    method.qualified_name,
                    method.class_name,
                    method.return_type.as_deref().unwrap_or("None")
                );
                let code = format!("def {}({}):", method.name, method.params_raw);
                mined.push((code, file.path.clone(), embedding_text));
            }
            for function in file.analysis.functions.iter().filter(|f| !f.name.starts_with('_')) {
                let embedding_text = format!(
                    "Function {} -> {}",
                    function.qualified_name,
                    function.return_type.as_deref().unwrap_or("None")
                );
                let code = format!("def {}({}):", function.name, function.params_raw);
                mined.push((code, file.path.clone(), embedding_text));
            }
        }

        if mined.is_empty() {
            return Ok(0);
        }

        let embed_inputs: Vec<String> = mined.iter().map(|(_, _, text)| text.clone()).collect();
        let embeddings = embedding::embed_texts(&self.config.embedding, &embed_inputs).await?;

        let mut code_examples = Vec::with_capacity(mined.len());
        for (i, (code, file_path, _)) in mined.into_iter().enumerate() {
            let url = format!("graph://{repo_name}/{file_path}");
            code_examples.push(CodeExample {
                id: derive_id(&format!("{url}#{i}")),
                url,
                chunk_number: i as i64,
                code,
                summary: "Synthetically mined from the code knowledge graph.".to_string(),
                metadata: HashMap::from([
                    ("source_id".to_string(), serde_json::Value::String(repo_name.to_string())),
                    ("synthetic".to_string(), serde_json::Value::Bool(true)),
                ]),
                embedding: embeddings[i].clone(),
                source_id: repo_name.to_string(),
            });
        }

        let count = code_examples.len();
        self.store.add_code_examples(code_examples).await?;
        Ok(count)
    }

    async fn persist_fetch_result(&self, result: FetchResult) -> UrlOutcome {
        let url = result.url.clone();
        match self.persist_one(result).await {
            Ok((chunks_stored, code_examples_stored)) => UrlOutcome {
                url,
                ok: true,
                chunks_stored,
                code_examples_stored,
                error: None,
            },
            Err(e) => UrlOutcome {
                url,
                ok: false,
                chunks_stored: 0,
                code_examples_stored: 0,
                error: Some(crate::error::ServerError::from_anyhow(&e).sanitized_message()),
            },
        }
    }

    async fn persist_one(&self, result: FetchResult) -> Result<(usize, usize)> {
        if !result.ok {
            anyhow::bail!("FetchFailed: {}", result.error.unwrap_or_else(|| "unknown error".to_string()));
        }
        if result.markdown.trim().is_empty() {
            anyhow::bail!("InvalidInput: fetched document was empty");
        }

        let source_id = source_id_from_url(&result.url)?;
        let word_count = result.markdown.split_whitespace().count() as i64;

        let chunk_texts = chunk::chunk(&result.markdown, self.config.chunking.chunk_size);

        let enriched = enrich::enrich_chunks(&self.config, &self.http, &result.markdown, &chunk_texts).await;
        let chunk_embed_inputs: Vec<String> = enriched.iter().map(|e| e.text.clone()).collect();
        let chunk_embeddings = embedding::embed_texts(&self.config.embedding, &chunk_embed_inputs)
            .await
            .context("EmbeddingFailed: document chunk embedding failed")?;

        let summarized = if self.config.features.use_agentic_rag {
            let extracted_code = code_extract::extract_code(&result.markdown, self.config.chunking.code_block_min_chars);
            code_extract::summarize_all(&self.config, &self.http, extracted_code).await
        } else {
            Vec::new()
        };
        let code_embed_inputs: Vec<String> = summarized
            .iter()
            .map(|s| format!("{}\n\n{}", s.extracted.code, s.summary))
            .collect();
        let code_embeddings = embedding::embed_texts(&self.config.embedding, &code_embed_inputs)
            .await
            .context("EmbeddingFailed: code example embedding failed")?;

        let mut document_chunks = Vec::with_capacity(chunk_texts.len());
        for (i, (text, embedding)) in enriched.iter().zip(chunk_embeddings.into_iter()).enumerate() {
            document_chunks.push(DocumentChunk {
                id: derive_id(&format!("{}#{}", result.url, i)),
                url: result.url.clone(),
                chunk_number: i as i64,
                content: text.text.clone(),
                metadata: HashMap::from([
                    ("source_id".to_string(), serde_json::Value::String(source_id.clone())),
                    ("char_count".to_string(), serde_json::Value::from(text.text.chars().count())),
                    ("word_count".to_string(), serde_json::Value::from(text.text.split_whitespace().count())),
                    ("contextual_embedding".to_string(), serde_json::Value::Bool(text.used_llm)),
                ]),
                embedding,
                source_id: source_id.clone(),
            });
        }

        let mut code_examples = Vec::with_capacity(summarized.len());
        for (i, (summarized, embedding)) in summarized.into_iter().zip(code_embeddings.into_iter()).enumerate() {
            code_examples.push(CodeExample {
                id: derive_id(&format!("{}#code#{}", result.url, i)),
                url: result.url.clone(),
                chunk_number: i as i64,
                code: summarized.extracted.code,
                summary: summarized.summary,
                metadata: HashMap::from([
                    ("source_id".to_string(), serde_json::Value::String(source_id.clone())),
                    ("language".to_string(), serde_json::Value::String(summarized.extracted.language)),
                    ("line_count".to_string(), serde_json::Value::from(summarized.extracted.line_count)),
                ]),
                embedding,
                source_id: source_id.clone(),
            });
        }

        let chunks_stored = document_chunks.len();
        let code_examples_stored = code_examples.len();

        self.store
            .add_document_chunks(document_chunks)
            .await
            .context("StoreUnavailable: failed to persist document chunks")?;
        if !code_examples.is_empty() {
            self.store
                .add_code_examples(code_examples)
                .await
                .context("StoreUnavailable: failed to persist code examples")?;
        }

        let summary = summary_from_markdown(&result.markdown);
        self.store
            .update_source_info(&source_id, &summary, word_count)
            .await
            .context("StoreUnavailable: failed to update source info")?;

        Ok((chunks_stored, code_examples_stored))
    }

    fn finish_report(&self, results: Vec<UrlOutcome>, start: Instant) -> IngestReport {
        let total_chunks = results.iter().map(|r| r.chunks_stored).sum();
        let total_code_examples = results.iter().map(|r| r.code_examples_stored).sum();
        let success = results.iter().all(|r| r.ok);
        IngestReport {
            success,
            results,
            total_chunks,
            total_code_examples,
            elapsed_ms: start.elapsed().as_millis(),
        }
    }
}

#[derive(serde::Deserialize)]
struct MetaSearchResponse {
    results: Vec<MetaSearchResult>,
}

#[derive(serde::Deserialize)]
struct MetaSearchResult {
    url: String,
    #[allow(dead_code)]
    title: Option<String>,
    #[allow(dead_code)]
    content: Option<String>,
}

/// Source id per §9 Open Question O1: the registrable host, never the path.
fn source_id_from_url(url: &str) -> Result<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .context("InvalidInput: URL has no host to derive a source_id from")
}

fn summary_from_markdown(markdown: &str) -> String {
    let flattened: String = markdown.split_whitespace().collect::<Vec<_>>().join(" ");
    flattened.chars().take(500).collect()
}

fn repo_name_from_clone_url(clone_url: &str) -> String {
    clone_url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or(clone_url)
        .to_string()
}

fn clone_discovering_branch(clone_url: &str, cache_dir: &std::path::Path) -> Result<std::path::PathBuf> {
    for candidate in ["main", "master"] {
        if let Ok(dir) = repo_fetch::clone_or_update(clone_url, candidate, cache_dir) {
            return Ok(dir);
        }
    }
    anyhow::bail!("FetchFailed: could not clone '{clone_url}' on either 'main' or 'master'")
}

fn analyzed_files(repo_dir: &std::path::Path) -> Vec<AnalyzedFile> {
    walkdir::WalkDir::new(repo_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.path().components().any(|c| c.as_os_str() == ".git"))
        .filter_map(|entry| {
            let path = entry.path();
            let relative = path.strip_prefix(repo_dir).unwrap_or(path).to_string_lossy().to_string();
            let source = std::fs::read_to_string(path).ok()?;
            let analysis = analyze::analyze_file(&relative, &source);
            Some(AnalyzedFile { path: relative, analysis })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_uses_host_not_path() {
        assert_eq!(source_id_from_url("https://docs.example.com/a/b").unwrap(), "docs.example.com");
    }

    #[test]
    fn repo_name_strips_git_suffix_and_owner() {
        assert_eq!(repo_name_from_clone_url("https://github.com/acme/widgets.git"), "widgets");
        assert_eq!(repo_name_from_clone_url("https://github.com/acme/widgets"), "widgets");
    }

    #[test]
    fn summary_is_capped_at_500_chars() {
        let long = "word ".repeat(400);
        let summary = summary_from_markdown(&long);
        assert!(summary.chars().count() <= 500);
    }
}
