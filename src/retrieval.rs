//! Hybrid retrieval engine (C10): semantic + keyword merge, optional rerank,
//! and graph-validated code search. Every operation is cache-fronted by
//! [`crate::cache::ResultCache`] keyed on an md5 of its own arguments.

use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::embedding;
use crate::graph::GraphStore;
use crate::models::SearchHit;
use crate::store::KnowledgeStore;

pub struct RetrievalEngine {
    pub store: Arc<dyn KnowledgeStore>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub cache: Arc<ResultCache>,
    pub config: Config,
    pub http: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedHit {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub is_valid: bool,
    pub confidence: f64,
    pub checks: Vec<String>,
    pub neo4j_validated: bool,
}

impl RetrievalEngine {
    fn cache_key(&self, op: &str, query: &str, source_filter: Option<&str>, match_count: usize) -> String {
        let mut hasher = Md5::new();
        hasher.update(op.as_bytes());
        hasher.update(b"|");
        hasher.update(query.as_bytes());
        hasher.update(b"|");
        hasher.update(source_filter.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(match_count.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn rag_query(
        &self,
        query: &str,
        source_filter: Option<&str>,
        match_count: usize,
    ) -> Result<Vec<SearchHit>> {
        let key = self.cache_key("rag_query", query, source_filter, match_count);
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(hits) = serde_json::from_str(&cached) {
                return Ok(hits);
            }
        }

        let hits = self.rag_query_uncached(query, source_filter, match_count).await?;
        if let Ok(serialized) = serde_json::to_string(&hits) {
            self.cache.insert(key, serialized);
        }
        Ok(hits)
    }

    async fn rag_query_uncached(
        &self,
        query: &str,
        source_filter: Option<&str>,
        match_count: usize,
    ) -> Result<Vec<SearchHit>> {
        let embedding = embedding::embed_query(&self.config.embedding, query).await?;
        let semantic = self
            .store
            .search_documents(&embedding, match_count, source_filter, None)
            .await?;

        let mut merged = if self.config.features.use_hybrid_search {
            let keyword = self
                .store
                .search_documents_by_keyword(query, match_count * 2, source_filter, None)
                .await?;
            merge_hybrid(semantic, keyword, self.config.retrieval.hybrid_boost)
        } else {
            semantic
        };

        if self.config.features.use_reranking {
            let k = match_count * 2;
            merged.truncate(k);
            merged = self.rerank(query, merged).await;
        }

        merged.truncate(match_count);
        Ok(merged)
    }

    pub async fn search_code_examples(
        &self,
        query: &str,
        source_filter: Option<&str>,
        match_count: usize,
    ) -> Result<Vec<SearchHit>> {
        let key = self.cache_key("search_code_examples", query, source_filter, match_count);
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(hits) = serde_json::from_str(&cached) {
                return Ok(hits);
            }
        }

        let biased_query = format!("Code example for {query}\n\nSummary: code that {query}");
        let embedding = embedding::embed_query(&self.config.embedding, &biased_query).await?;

        let semantic = self
            .store
            .search_code_examples(&embedding, match_count, source_filter)
            .await?;

        let mut merged = if self.config.features.use_hybrid_search {
            let keyword = self
                .store
                .search_documents_by_keyword(query, match_count * 2, source_filter, None)
                .await?;
            merge_hybrid(semantic, keyword, self.config.retrieval.hybrid_boost)
        } else {
            semantic
        };

        if self.config.features.use_reranking {
            let k = match_count * 2;
            merged.truncate(k);
            merged = self.rerank(query, merged).await;
        }

        merged.truncate(match_count);
        if let Ok(serialized) = serde_json::to_string(&merged) {
            self.cache.insert(key, serialized);
        }
        Ok(merged)
    }

    pub async fn validated_code_search(
        &self,
        query: &str,
        source_filter: Option<&str>,
        match_count: usize,
    ) -> Result<Vec<ValidatedHit>> {
        let hits = self.search_code_examples(query, source_filter, match_count).await?;
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            out.push(self.validate_hit(hit).await);
        }
        Ok(out)
    }

    async fn validate_hit(&self, hit: SearchHit) -> ValidatedHit {
        let Some(graph) = &self.graph else {
            return ValidatedHit {
                hit,
                is_valid: true,
                confidence: 0.0,
                checks: Vec::new(),
                neo4j_validated: false,
            };
        };
        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                return ValidatedHit {
                    hit,
                    is_valid: true,
                    confidence: 0.0,
                    checks: Vec::new(),
                    neo4j_validated: false,
                };
            }
        }

        let repo_name = hit.metadata.get("repo_name").and_then(|v| v.as_str());
        let class_name = hit.metadata.get("class_name").and_then(|v| v.as_str());
        let method_name = hit
            .metadata
            .get("method_name")
            .or_else(|| hit.metadata.get("function_name"))
            .and_then(|v| v.as_str());

        let mut applied = 0.0;
        let mut passed = 0.0;
        let mut checks = Vec::new();
        let mut call_failed = false;

        let weight_repo = self.config.retrieval.weight_repository_exists;
        let weight_class = self.config.retrieval.weight_class_exists;
        let weight_method = self.config.retrieval.weight_method_or_function_exists;

        if let Some(repo) = repo_name {
            applied += weight_repo;
            match graph.list_repositories().await {
                Ok(repos) => {
                    if repos.iter().any(|r| r.name == repo) {
                        passed += weight_repo;
                        checks.push("repository_exists".to_string());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "graph validation query failed");
                    call_failed = true;
                }
            }
        }
        if let Some(class) = class_name {
            applied += weight_class;
            match graph.find_class(class, repo_name).await {
                Ok(results) if !results.is_empty() => {
                    passed += weight_class;
                    checks.push("class_exists".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "graph validation query failed");
                    call_failed = true;
                }
            }
        }
        if let Some(method) = method_name {
            applied += weight_method;
            let found = match (class_name, graph.find_method(method, class_name, repo_name).await) {
                (_, Ok(results)) if !results.is_empty() => true,
                (None, Ok(_)) => match graph.find_function(method, repo_name).await {
                    Ok(results) => !results.is_empty(),
                    Err(e) => {
                        warn!(error = %e, "graph validation query failed");
                        call_failed = true;
                        false
                    }
                },
                (_, Err(e)) => {
                    warn!(error = %e, "graph validation query failed");
                    call_failed = true;
                    false
                }
                _ => false,
            };
            if found {
                passed += weight_method;
                checks.push("method_or_function_exists".to_string());
            }
        }

        if call_failed {
            if let Some(breaker) = &self.breaker {
                breaker.record_failure();
            }
            return ValidatedHit {
                hit,
                is_valid: true,
                confidence: 0.0,
                checks: Vec::new(),
                neo4j_validated: false,
            };
        }
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }

        let confidence = if applied > 0.0 { passed / applied } else { 1.0 };
        ValidatedHit {
            hit,
            is_valid: confidence >= self.config.retrieval.validity_threshold,
            confidence,
            checks,
            neo4j_validated: true,
        }
    }

    async fn rerank(&self, query: &str, items: Vec<SearchHit>) -> Vec<SearchHit> {
        if !self.config.reranker.enabled {
            return items;
        }
        let Some(api_base) = &self.config.reranker.api_base else {
            return items;
        };

        let payload = serde_json::json!({
            "query": query,
            "documents": items.iter().map(|i| i.content.clone()).collect::<Vec<_>>(),
        });
        let response = self.http.post(format!("{api_base}/rerank")).json(&payload).send().await;

        let scores: Vec<f64> = match response {
            Ok(r) if r.status().is_success() => match r.json::<Vec<f64>>().await {
                Ok(s) if s.len() == items.len() => s,
                _ => {
                    warn!("reranker returned an unexpected shape, skipping rerank");
                    return items;
                }
            },
            _ => {
                warn!("reranker call failed, skipping rerank");
                return items;
            }
        };

        let mut scored: Vec<(SearchHit, f64)> = items.into_iter().zip(scores).collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap()
                .then_with(|| b.0.similarity.partial_cmp(&a.0.similarity).unwrap())
        });
        scored
            .into_iter()
            .map(|(mut hit, score)| {
                hit.rerank_score = Some(score);
                hit
            })
            .collect()
    }
}

/// Merges semantic and keyword result sets: items present in both get a
/// `+0.5` similarity boost and sort first; remaining semantic items follow;
/// remaining keyword items trail. Deduplicated by `(url, chunk_number)`.
fn merge_hybrid(semantic: Vec<SearchHit>, keyword: Vec<SearchHit>, boost: f64) -> Vec<SearchHit> {
    let mut both = Vec::new();
    let mut semantic_only = Vec::new();
    let mut keyword_only = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for item in semantic {
        let key = (item.url.clone(), item.chunk_number);
        if keyword.iter().any(|k| (k.url.clone(), k.chunk_number) == key) {
            if seen.insert(key) {
                let mut boosted = item;
                boosted.similarity += boost;
                both.push(boosted);
            }
        } else if seen.insert(key) {
            semantic_only.push(item);
        }
    }
    for item in keyword {
        let key = (item.url.clone(), item.chunk_number);
        if seen.insert(key) {
            keyword_only.push(item);
        }
    }

    both.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
    semantic_only.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());

    both.into_iter().chain(semantic_only).chain(keyword_only).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hit(url: &str, n: i64, sim: f64) -> SearchHit {
        SearchHit {
            id: format!("{url}#{n}"),
            url: url.to_string(),
            chunk_number: n,
            content: "x".to_string(),
            metadata: HashMap::new(),
            source_id: "x".to_string(),
            similarity: sim,
            rerank_score: None,
        }
    }

    #[test]
    fn items_in_both_sets_get_boosted_and_sort_first() {
        let semantic = vec![hit("a", 0, 0.9), hit("b", 0, 0.1)];
        let keyword = vec![hit("b", 0, 0.2), hit("c", 0, 0.05)];
        let merged = merge_hybrid(semantic, keyword, 0.5);
        assert_eq!(merged[0].url, "b");
        assert!((merged[0].similarity - 0.6).abs() < 1e-9);
        assert_eq!(merged[1].url, "a");
        assert_eq!(merged[2].url, "c");
    }

    #[test]
    fn dedup_keeps_first_occurrence_per_url_and_chunk() {
        let semantic = vec![hit("a", 0, 0.9), hit("a", 0, 0.9)];
        let merged = merge_hybrid(semantic, vec![], 0.5);
        assert_eq!(merged.len(), 1);
    }
}
