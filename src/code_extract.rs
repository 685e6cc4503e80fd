//! Code-block extractor (C5).
//!
//! Mines fenced code blocks at or above a minimum length from markdown, each
//! paired with ~1000 characters of surrounding context, then summarizes each
//! block with a single LLM call. Summaries run in parallel via a bounded
//! worker pool; an LLM failure never aborts the pipeline — it just falls back
//! to a fixed default summary (§4.5, §7 `LLMFailed`).

use tracing::warn;

use crate::config::Config;
use crate::retry::RetryPolicy;

const CONTEXT_WINDOW: usize = 1000;
const DEFAULT_SUMMARY: &str = "Code example for demonstration purposes.";

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCode {
    pub code: String,
    pub language: String,
    pub context_before: String,
    pub context_after: String,
    pub line_count: usize,
}

/// Scans `markdown` for fenced code blocks, discarding any whose body is
/// shorter than `min_chars`.
pub fn extract_code(markdown: &str, min_chars: usize) -> Vec<ExtractedCode> {
    let mut blocks = Vec::new();
    let mut search_from = 0usize;

    loop {
        let Some(open_rel) = markdown[search_from..].find("```") else {
            break;
        };
        let open = search_from + open_rel;
        let after_fence = open + 3;

        let line_end = markdown[after_fence..]
            .find('\n')
            .map(|p| after_fence + p)
            .unwrap_or(markdown.len());
        let language = markdown[after_fence..line_end].trim().to_string();
        let body_start = if line_end < markdown.len() {
            line_end + 1
        } else {
            line_end
        };

        let Some(close_rel) = markdown[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close_rel;
        let close_end = body_end + 3;

        let code = markdown[body_start..body_end].trim_end_matches('\n').to_string();

        if code.len() >= min_chars {
            let before_start = open.saturating_sub(CONTEXT_WINDOW);
            let context_before = floor_boundary_slice(markdown, before_start, open);
            let after_end = (close_end + CONTEXT_WINDOW).min(markdown.len());
            let context_after = floor_boundary_slice(markdown, close_end, after_end);
            let line_count = code.lines().count();

            blocks.push(ExtractedCode {
                code,
                language,
                context_before,
                context_after,
                line_count,
            });
        }

        search_from = close_end;
    }

    blocks
}

fn floor_boundary_slice(s: &str, mut start: usize, mut end: usize) -> String {
    while start > 0 && !s.is_char_boundary(start) {
        start -= 1;
    }
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    s[start..end].to_string()
}

/// A summarized code example, ready to be embedded over `(code, summary)`.
pub struct SummarizedCode {
    pub extracted: ExtractedCode,
    pub summary: String,
}

/// Summarizes every extracted block in parallel, bounded by
/// `config.llm.summary_workers`. Never errors — failed summaries fall back
/// to [`DEFAULT_SUMMARY`].
pub async fn summarize_all(
    config: &Config,
    client: &reqwest::Client,
    blocks: Vec<ExtractedCode>,
) -> Vec<SummarizedCode> {
    if !config.llm.is_enabled() {
        return blocks
            .into_iter()
            .map(|extracted| SummarizedCode {
                extracted,
                summary: DEFAULT_SUMMARY.to_string(),
            })
            .collect();
    }

    let workers = config.llm.summary_workers.max(1);
    crate::batch::run_batched(blocks, workers, |extracted| {
        let config = config.clone();
        let client = client.clone();
        async move {
            let summary = summarize_one(&config, &client, &extracted)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "code summary LLM call failed, using default");
                    DEFAULT_SUMMARY.to_string()
                });
            SummarizedCode { extracted, summary }
        }
    })
    .await
}

async fn summarize_one(
    config: &Config,
    client: &reqwest::Client,
    block: &ExtractedCode,
) -> anyhow::Result<String> {
    let policy = RetryPolicy::new(2, std::time::Duration::from_millis(200), 2);
    policy
        .run(|| async {
            let api_base = config
                .llm
                .api_base
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            let model = config.llm.model.as_deref().unwrap_or("gpt-4o-mini");
            let api_key = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))?;

            let prompt = format!(
                "Context before:\n{}\n\nCode ({}):\n{}\n\nContext after:\n{}\n\nSummarize what this code example demonstrates in one or two sentences.",
                block.context_before, block.language, block.code, block.context_after,
            );
            let body = serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": 100,
            });
            let response = client
                .post(format!("{api_base}/chat/completions"))
                .bearer_auth(&api_key)
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
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_language_and_discards_short_blocks() {
        let md = "intro\n\n```python\nprint('hi')\n```\n\nmore text\n\n```\nshort\n```\n";
        let blocks = extract_code(md, 5);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "python");
        assert_eq!(blocks[0].code, "print('hi')");
    }

    #[test]
    fn context_windows_shrink_to_document_edges() {
        let md = "```\nx=1\n```\n";
        let blocks = extract_code(md, 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].context_before, "");
    }

    #[test]
    fn empty_language_when_fence_has_no_tag() {
        let md = "```\nraw text body here\n```\n";
        let blocks = extract_code(md, 1);
        assert_eq!(blocks[0].language, "");
    }

    #[tokio::test]
    async fn summarize_all_defaults_when_llm_disabled() {
        let toml = r#"
[db]
path = "x.sqlite"
[server]
bind = "127.0.0.1:0"
[vector_store]
backend = "native"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let client = reqwest::Client::new();
        let blocks = extract_code("```\nfn main() {}\n```\n", 1);
        let summarized = summarize_all(&config, &client, blocks).await;
        assert_eq!(summarized[0].summary, DEFAULT_SUMMARY);
    }
}
