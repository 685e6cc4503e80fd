//! End-to-end dispatcher tests against a real (temp-file) sqlite backend,
//! with embeddings/graph disabled. No network access — only exercises paths
//! that don't require reaching an external provider.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crawl_harness::config::load_config;
use crawl_harness::context;

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let db_path = dir.path().join("ctx.sqlite");
    let body = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:0"

[vector_store]
backend = "native"
"#,
        db_path.display()
    );
    let path = dir.path().join("ctx.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn get_available_sources_on_a_fresh_store_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx.dispatcher.get_available_sources(CancellationToken::new()).await;

    assert!(envelope.success);
    assert_eq!(envelope.operation, "get_available_sources");
    assert_eq!(envelope.request_id.len(), 8);
    let result = envelope.result.unwrap().as_array().unwrap().len();
    assert_eq!(result, 0);
}

#[tokio::test]
async fn perform_rag_query_against_an_empty_store_returns_no_hits() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx
        .dispatcher
        .perform_rag_query(CancellationToken::new(), "rust ownership".to_string(), None, 5)
        .await;

    assert!(envelope.success);
    assert!(envelope.error.is_none());
}

#[tokio::test]
async fn scrape_urls_rejects_a_non_http_scheme_without_touching_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx
        .dispatcher
        .scrape_urls(CancellationToken::new(), vec!["ftp://example.com/file".to_string()])
        .await;

    assert!(!envelope.success);
    assert_eq!(envelope.error.unwrap().kind, crawl_harness::error::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn scrape_urls_rejects_an_empty_url_list() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx.dispatcher.scrape_urls(CancellationToken::new(), vec![]).await;

    assert!(!envelope.success);
    assert_eq!(envelope.error.unwrap().kind, crawl_harness::error::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn search_code_examples_rejects_a_non_positive_match_count() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx
        .dispatcher
        .search_code_examples(CancellationToken::new(), "parse_args".to_string(), None, 0)
        .await;

    assert!(!envelope.success);
}

#[tokio::test]
async fn get_repository_info_without_a_graph_backend_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir);
    let cfg = load_config(&config_path).unwrap();
    let ctx = context::build(cfg).await.unwrap();

    let envelope = ctx
        .dispatcher
        .get_repository_info(CancellationToken::new(), "some/repo".to_string())
        .await;

    assert!(!envelope.success);
}
