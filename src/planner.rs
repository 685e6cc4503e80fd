//! Smart-crawl planner (C13): expands one input URL into the list of URLs
//! `scrape_urls` should actually fetch.
//!
//! Dispatches on [`classify::classify`]: a sitemap expands one level deep
//! with no recursion; a text file is a single document; a plain page gets a
//! breadth-first expansion over internal outlinks bounded by `max_depth` and
//! deduplicated against everything already visited.

use std::collections::HashSet;

use crate::classify::{self, UrlKind};
use crate::fetch::{self, FetchConfig};

/// Expands `start_url` per its classification, bounded by `max_depth`
/// (BFS levels, plain pages only) and `max_concurrent` (fetches per level).
pub async fn plan_crawl(
    client: &reqwest::Client,
    start_url: &str,
    max_depth: usize,
    max_concurrent: usize,
) -> Vec<String> {
    match classify::classify(start_url) {
        UrlKind::Sitemap => classify::expand_sitemap(client, start_url).await,
        UrlKind::TextFile => vec![start_url.to_string()],
        UrlKind::PlainPage => bfs_expand(client, start_url, max_depth, max_concurrent).await,
    }
}

async fn bfs_expand(
    client: &reqwest::Client,
    start_url: &str,
    max_depth: usize,
    max_concurrent: usize,
) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut ordered: Vec<String> = Vec::new();
    let mut frontier = vec![start_url.to_string()];
    visited.insert(start_url.to_string());

    let config = FetchConfig::default();

    for _ in 0..=max_depth {
        if frontier.is_empty() {
            break;
        }
        let results = fetch::fetch_batch(client, &frontier, max_concurrent, &config).await;
        let mut next_frontier = Vec::new();

        for result in &results {
            ordered.push(result.url.clone());
            if !result.ok {
                continue;
            }
            for link in &result.outlinks.internal {
                if visited.insert(link.clone()) {
                    next_frontier.push(link.clone());
                }
            }
        }

        frontier = next_frontier;
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_file_yields_single_url_with_no_fetch() {
        let client = reqwest::Client::new();
        let urls = plan_crawl(&client, "https://a.test/notes.txt", 3, 5).await;
        assert_eq!(urls, vec!["https://a.test/notes.txt"]);
    }
}
