//! Transport glue (§4.11): a stdio runner and a thin axum router exposing the
//! MCP tool surface over streamable HTTP plus `/health`. Mirrors the
//! teacher's `AppState`/CORS/`axum::serve` shape; the bespoke JSON
//! `/tools/*` routes are gone now that [`crate::dispatcher::Dispatcher`]
//! speaks the same envelope over both transports uniformly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::mcp::KnowledgeServer;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "log_level": state.config.log_level,
    }))
}

/// Serves the MCP tool surface over streamable HTTP at `/mcp`, plus
/// `/health`, binding to `config.server.bind`. Runs until the listener is
/// dropped; in-flight requests are cancelled and open backend sessions
/// closed when the caller drops the returned future (§7 exit behavior).
pub async fn serve_http(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let mcp_service = StreamableHttpService::new(
        move || Ok(KnowledgeServer::new(dispatcher.clone())),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let state = AppState { config: config.clone() };

    let app = Router::new()
        .route("/health", get(health))
        .with_state(state)
        .nest_service("/mcp", mcp_service)
        .layer(cors);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serves the MCP tool surface over stdio: one JSON-RPC object per line.
/// Exits when the transport closes (the peer's stdin/stdout pipe ends),
/// same as the HTTP transport's exit behavior.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let server = KnowledgeServer::new(dispatcher);
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let service = rmcp::serve_server(server, (stdin, stdout)).await?;
    service.waiting().await?;
    Ok(())
}
