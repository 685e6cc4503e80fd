//! Context enricher (C4).
//!
//! Optionally prepends an LLM-generated chunk-in-document summary ahead of
//! each chunk before it is embedded. Gated by `features.use_contextual_embeddings`.
//! Parallelized bounded by `llm.enrich_workers`; chunks have no ordering
//! dependency on one another so out-of-order completion is fine — the caller
//! zips results back against the original chunk index.

use tracing::warn;

use crate::batch;
use crate::config::Config;
use crate::retry::RetryPolicy;

/// An enrichment outcome: the (possibly prefixed) chunk text, and whether the
/// LLM was actually used (false on failure or when the flag is off).
pub struct Enriched {
    pub text: String,
    pub used_llm: bool,
}

const SEPARATOR: &str = "\n---\n";

/// Enriches every chunk in `chunks` against the full `document`, bounded by
/// `config.llm.enrich_workers` concurrent in-flight LLM calls.
pub async fn enrich_chunks(
    config: &Config,
    client: &reqwest::Client,
    document: &str,
    chunks: &[String],
) -> Vec<Enriched> {
    if !config.features.use_contextual_embeddings || !config.llm.is_enabled() {
        return chunks
            .iter()
            .map(|c| Enriched {
                text: c.clone(),
                used_llm: false,
            })
            .collect();
    }

    let workers = config.llm.enrich_workers.max(1);
    batch::run_batched(chunks.to_vec(), workers, |chunk_text| {
        let config = config.clone();
        let client = client.clone();
        let document = document.to_string();
        async move { enrich_one(&config, &client, &document, &chunk_text).await }
    })
    .await
}

async fn enrich_one(config: &Config, client: &reqwest::Client, document: &str, chunk: &str) -> Enriched {
    let policy = RetryPolicy::new(2, std::time::Duration::from_millis(200), 2);
    let result = policy
        .run(|| generate_context(config, client, document, chunk))
        .await;

    match result {
        Ok(context_line) => Enriched {
            text: format!("{context_line}{SEPARATOR}{chunk}"),
            used_llm: true,
        },
        Err(e) => {
            warn!(error = %e, "context enrichment LLM call failed, using raw chunk");
            Enriched {
                text: chunk.to_string(),
                used_llm: false,
            }
        }
    }
}

async fn generate_context(
    config: &Config,
    client: &reqwest::Client,
    document: &str,
    chunk: &str,
) -> anyhow::Result<String> {
    let api_base = config
        .llm
        .api_base
        .as_deref()
        .unwrap_or("https://api.openai.com/v1");
    let model = config.llm.model.as_deref().unwrap_or("gpt-4o-mini");
    let api_key = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))?;

    let prompt = format!(
        "Document:\n{}\n\nChunk:\n{}\n\nGive a one-paragraph context line situating this chunk within the document.",
        truncate(document, 4000),
        truncate(chunk, 2000),
    );

    let body = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": 120,
    });

    let response = client
        .post(format!("{api_base}/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("LLMFailed: HTTP {}", response.status());
    }

    let parsed: serde_json::Value = response.json().await?;
    parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("LLMFailed: unexpected response shape"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> Config {
        let toml = r#"
[db]
path = "x.sqlite"
[server]
bind = "127.0.0.1:0"
[vector_store]
backend = "native"
"#;
        toml::from_str(toml).unwrap()
    }

    #[tokio::test]
    async fn passthrough_when_flag_disabled() {
        let config = disabled_config();
        let client = reqwest::Client::new();
        let chunks = vec!["a".to_string(), "b".to_string()];
        let out = enrich_chunks(&config, &client, "doc", &chunks).await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| !e.used_llm));
        assert_eq!(out[0].text, "a");
    }
}
