//! `ServerContext` (§9): the process-wide, explicitly-constructed bundle of
//! store handles, provider clients, cache, and circuit breaker threaded into
//! every dispatcher call. Built once at startup by both the CLI (§4.15) and
//! the long-running server, and torn down on exit — no global module state.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::breaker::CircuitBreaker;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::graph::neo4j::Neo4jGraphStore;
use crate::graph::GraphStore;
use crate::ingest::IngestionService;
use crate::retrieval::RetrievalEngine;
use crate::store::managed::ManagedStore;
use crate::store::sqlite::SqliteStore;
use crate::store::KnowledgeStore;

pub struct ServerContext {
    pub dispatcher: Arc<Dispatcher>,
}

/// Builds the vector/graph store handles, cache, and circuit breaker named in
/// `config`, then wires them into a single [`Dispatcher`]. `load_config` has
/// already validated the combination is sound; this is the side-effecting
/// half (opening connections, running migrations).
pub async fn build(config: Config) -> Result<ServerContext> {
    let store: Arc<dyn KnowledgeStore> = match config.vector_store.backend.as_str() {
        "native" => {
            let pool = crate::db::connect(&config).await?;
            crate::migrate::run_migrations_on_pool(&pool).await?;
            Arc::new(SqliteStore::new(pool))
        }
        _ => Arc::new(ManagedStore::new(
            config
                .vector_store
                .managed_endpoint
                .clone()
                .context("vector_store.managed_endpoint is required when backend = \"managed\"")?,
            config.vector_store.managed_api_key.clone(),
        )),
    };
    store.initialize().await?;

    let graph: Option<Arc<dyn GraphStore>> = if config.features.use_knowledge_graph {
        let uri = config
            .graph_store
            .uri
            .as_deref()
            .context("graph_store.uri is required when features.use_knowledge_graph = true")?;
        let user = config.graph_store.user.as_deref().unwrap_or("neo4j");
        let password = config.graph_store.password.as_deref().unwrap_or("");
        Some(Arc::new(Neo4jGraphStore::connect(uri, user, password).await?) as Arc<dyn GraphStore>)
    } else {
        None
    };

    let breaker = Some(Arc::new(CircuitBreaker::new(&config.breaker)));
    let cache = Arc::new(ResultCache::new(&config.cache));
    let http = reqwest::Client::new();

    let retrieval = RetrievalEngine {
        store: store.clone(),
        graph: graph.clone(),
        breaker: breaker.clone(),
        cache,
        config: config.clone(),
        http: http.clone(),
    };
    let ingestion = IngestionService {
        store: store.clone(),
        graph: graph.clone(),
        http,
        config: config.clone(),
    };

    let dispatcher = Arc::new(Dispatcher {
        ingestion,
        retrieval,
        graph,
        store,
        config,
    });

    Ok(ServerContext { dispatcher })
}
