//! Fetcher pool (C2).
//!
//! Bounded-concurrency web fetch producing rendered markdown plus classified
//! outlinks. HTML→Markdown rendering is delegated to `htmd`; outlink
//! discovery to `scraper`. Concurrency is bounded by a `tokio::sync::Semaphore`,
//! the same backpressure primitive the reference uses for its own batched
//! embedding and summarization workers.

use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct Outlinks {
    pub internal: Vec<String>,
    pub external: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub markdown: String,
    pub outlinks: Outlinks,
    pub ok: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Fetches `urls` with at most `max_concurrent` in flight, preserving input
/// order in the returned sequence. Input URLs are deduplicated preserving
/// first occurrence; non-`http`/`https` schemes are rejected per-URL rather
/// than aborting the whole batch.
pub async fn fetch_batch(
    client: &reqwest::Client,
    urls: &[String],
    max_concurrent: usize,
    config: &FetchConfig,
) -> Vec<FetchResult> {
    let mut seen = HashSet::new();
    let deduped: Vec<String> = urls
        .iter()
        .filter(|u| seen.insert((*u).clone()))
        .cloned()
        .collect();

    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = Vec::with_capacity(deduped.len());

    for url in deduped {
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            fetch_one(&client, &url, &config).await
        }));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(r) => results.push(r),
            Err(e) => results.push(FetchResult {
                url: String::new(),
                markdown: String::new(),
                outlinks: Outlinks {
                    internal: vec![],
                    external: vec![],
                },
                ok: false,
                status: None,
                error: Some(ServerError::InternalError(e.to_string()).sanitized_message()),
            }),
        }
    }
    results
}

async fn fetch_one(client: &reqwest::Client, url: &str, config: &FetchConfig) -> FetchResult {
    let parsed = match url::Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
        _ => {
            let error = "InvalidURL: only http/https schemes are supported".to_string();
            warn!(url, error, "fetch rejected");
            return FetchResult {
                url: url.to_string(),
                markdown: String::new(),
                outlinks: empty_outlinks(),
                ok: false,
                status: None,
                error: Some(error),
            };
        }
    };

    let response = match client
        .get(url)
        .timeout(Duration::from_secs(config.timeout_secs))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            let error = classify_reqwest_error(&e);
            warn!(url, error, "fetch request failed");
            return FetchResult {
                url: url.to_string(),
                markdown: String::new(),
                outlinks: empty_outlinks(),
                ok: false,
                status: None,
                error: Some(error),
            };
        }
    };

    let status = response.status();
    if status.as_u16() >= 400 {
        let error = format!("FetchFailed: HTTP {}", status.as_u16());
        warn!(url, error, "fetch returned an error status");
        return FetchResult {
            url: url.to_string(),
            markdown: String::new(),
            outlinks: empty_outlinks(),
            ok: false,
            status: Some(status.as_u16()),
            error: Some(error),
        };
    }

    let body = match response.text().await {
        Ok(b) if b.len() <= config.max_body_bytes => b,
        Ok(_) => {
            let error = "FetchFailed: response exceeds configured size cap".to_string();
            warn!(url, error, "fetch body rejected");
            return FetchResult {
                url: url.to_string(),
                markdown: String::new(),
                outlinks: empty_outlinks(),
                ok: false,
                status: Some(status.as_u16()),
                error: Some(error),
            };
        }
        Err(e) => {
            let error = classify_reqwest_error(&e);
            warn!(url, error, "fetch body read failed");
            return FetchResult {
                url: url.to_string(),
                markdown: String::new(),
                outlinks: empty_outlinks(),
                ok: false,
                status: Some(status.as_u16()),
                error: Some(error),
            };
        }
    };

    let outlinks = extract_outlinks(&body, &parsed);
    let markdown = render_markdown(&body);

    FetchResult {
        url: url.to_string(),
        markdown,
        outlinks,
        ok: true,
        status: Some(status.as_u16()),
        error: None,
    }
}

fn empty_outlinks() -> Outlinks {
    Outlinks {
        internal: vec![],
        external: vec![],
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "FetchFailed: timeout".to_string()
    } else if e.is_connect() {
        "FetchFailed: connection refused or DNS failure".to_string()
    } else {
        format!("FetchFailed: {}", ServerError::InternalError(e.to_string()).sanitized_message())
    }
}

/// Renders HTML to markdown. Returns empty-string markdown (not an error) for
/// unrenderable or empty bodies — it is the orchestrator's job to skip
/// persisting empty markdown.
fn render_markdown(html: &str) -> String {
    htmd::convert(html).unwrap_or_default()
}

/// Classifies every `<a href>` on the page as `internal` (same registrable
/// host as `base`) or `external`.
fn extract_outlinks(html: &str, base: &url::Url) -> Outlinks {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return empty_outlinks(),
    };

    let mut internal = Vec::new();
    let mut external = Vec::new();
    let mut seen = HashSet::new();

    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let resolved_str = resolved.to_string();
        if !seen.insert(resolved_str.clone()) {
            continue;
        }
        if resolved.host_str() == base.host_str() {
            internal.push(resolved_str);
        } else {
            external.push(resolved_str);
        }
    }

    Outlinks { internal, external }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_internal_vs_external_links() {
        let html = r#"<html><body>
            <a href="/docs/a">a</a>
            <a href="https://other.test/b">b</a>
        </body></html>"#;
        let base = url::Url::parse("https://home.test/index").unwrap();
        let links = extract_outlinks(html, &base);
        assert_eq!(links.internal, vec!["https://home.test/docs/a"]);
        assert_eq!(links.external, vec!["https://other.test/b"]);
    }

    #[test]
    fn non_http_schemes_are_rejected_per_url() {
        let is_http = |u: &str| {
            matches!(url::Url::parse(u), Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https")
        };
        assert!(!is_http("ftp://a.test/x"));
        assert!(is_http("https://a.test/x"));
    }
}
