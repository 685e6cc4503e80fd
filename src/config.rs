//! Configuration parsing and validation.
//!
//! The server is configured via a TOML file (default: `config/ctx.toml`). The
//! config enumerates every feature flag and tunable named in the external
//! interfaces section of the design: vector/graph backend selection, the
//! contextual-embedding/hybrid-search/reranking/agentic-RAG/knowledge-graph
//! flags, chunking and concurrency limits, and provider credentials. Validation
//! happens once, eagerly, in [`load_config`] — never lazily at first use.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    pub server: ServerConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub graph_store: GraphStoreConfig,
    #[serde(default)]
    pub meta_search: MetaSearchConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_code_block_min_chars")]
    pub code_block_min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            code_block_min_chars: default_code_block_min_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    5000
}
fn default_code_block_min_chars() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_count")]
    pub default_match_count: i64,
    #[serde(default = "default_hybrid_boost")]
    pub hybrid_boost: f64,
    #[serde(default = "default_weight_repo")]
    pub weight_repository_exists: f64,
    #[serde(default = "default_weight_class")]
    pub weight_class_exists: f64,
    #[serde(default = "default_weight_method")]
    pub weight_method_or_function_exists: f64,
    #[serde(default = "default_validity_threshold")]
    pub validity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_match_count: default_match_count(),
            hybrid_boost: default_hybrid_boost(),
            weight_repository_exists: default_weight_repo(),
            weight_class_exists: default_weight_class(),
            weight_method_or_function_exists: default_weight_method(),
            validity_threshold: default_validity_threshold(),
        }
    }
}

fn default_match_count() -> i64 {
    5
}
fn default_hybrid_boost() -> f64 {
    0.5
}
fn default_weight_repo() -> f64 {
    0.3
}
fn default_weight_class() -> f64 {
    0.3
}
fn default_weight_method() -> f64 {
    0.7
}
fn default_validity_threshold() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_base: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    crate::models::EMBEDDING_DIM
}
fn default_batch_size() -> usize {
    20
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_enrich_workers")]
    pub enrich_workers: usize,
    #[serde(default = "default_summary_workers")]
    pub summary_workers: usize,
}

fn default_enrich_workers() -> usize {
    4
}
fn default_summary_workers() -> usize {
    4
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RerankerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureFlags {
    #[serde(default)]
    pub use_contextual_embeddings: bool,
    #[serde(default)]
    pub use_reranking: bool,
    #[serde(default)]
    pub use_hybrid_search: bool,
    #[serde(default)]
    pub use_agentic_rag: bool,
    #[serde(default)]
    pub use_knowledge_graph: bool,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_commit_history_limit")]
    pub commit_history_limit: usize,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            use_contextual_embeddings: false,
            use_reranking: false,
            use_hybrid_search: false,
            use_agentic_rag: false,
            use_knowledge_graph: false,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            commit_history_limit: default_commit_history_limit(),
        }
    }
}

fn default_max_concurrent_fetches() -> usize {
    10
}
fn default_commit_history_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "stdio".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_database")]
    pub backend: String,
    #[serde(default)]
    pub managed_endpoint: Option<String>,
    #[serde(default)]
    pub managed_api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_database(),
            managed_endpoint: None,
            managed_api_key: None,
        }
    }
}

fn default_vector_database() -> String {
    "managed".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GraphStoreConfig {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetaSearchConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_dispatch_timeout(),
        }
    }
}

fn default_dispatch_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    1800
}
fn default_cache_capacity() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooloff_secs")]
    pub cooloff_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooloff_secs: default_cooloff_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooloff_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.retrieval.default_match_count < 1 {
        anyhow::bail!("retrieval.default_match_count must be >= 1");
    }
    for (name, w) in [
        ("hybrid_boost", config.retrieval.hybrid_boost),
        (
            "weight_repository_exists",
            config.retrieval.weight_repository_exists,
        ),
        ("weight_class_exists", config.retrieval.weight_class_exists),
        (
            "weight_method_or_function_exists",
            config.retrieval.weight_method_or_function_exists,
        ),
        ("validity_threshold", config.retrieval.validity_threshold),
    ] {
        if !(0.0..=2.0).contains(&w) {
            anyhow::bail!("retrieval.{} must be in [0.0, 2.0]", name);
        }
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!("Unknown embedding provider: '{}'. Must be disabled or openai.", other),
    }

    match config.vector_store.backend.as_str() {
        "managed" | "native" => {}
        other => anyhow::bail!(
            "Unknown VECTOR_DATABASE: '{}'. Must be managed or native.",
            other
        ),
    }
    if config.vector_store.backend == "managed" && config.vector_store.managed_endpoint.is_none()
    {
        anyhow::bail!("vector_store.managed_endpoint is required when backend = \"managed\"");
    }

    if config.features.use_knowledge_graph && config.graph_store.uri.is_none() {
        anyhow::bail!("graph_store.uri is required when features.use_knowledge_graph = true");
    }

    if config.features.max_concurrent_fetches == 0 {
        anyhow::bail!("features.max_concurrent_fetches must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    const MINIMAL: &str = r#"
[db]
path = "data/ctx.sqlite"

[server]
bind = "127.0.0.1:7331"

[vector_store]
backend = "native"
"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let (_dir, path) = write_config(MINIMAL);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 5000);
        assert_eq!(cfg.features.max_concurrent_fetches, 10);
        assert_eq!(cfg.retrieval.hybrid_boost, 0.5);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let body = format!("{}\n[chunking]\nchunk_size = 0\n", MINIMAL);
        let (_dir, path) = write_config(&body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_vector_database() {
        let body = MINIMAL.replace("native", "bogus");
        let (_dir, path) = write_config(&body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn requires_managed_endpoint_when_backend_is_managed() {
        let body = MINIMAL.replace("native", "managed");
        let (_dir, path) = write_config(&body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn requires_graph_uri_when_knowledge_graph_enabled() {
        let body = format!(
            "{}\n[features]\nuse_knowledge_graph = true\n",
            MINIMAL
        );
        let (_dir, path) = write_config(&body);
        assert!(load_config(&path).is_err());
    }
}
