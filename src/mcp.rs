//! rmcp bridge (§4.11): exposes [`Dispatcher`]'s operations as MCP tools over
//! whichever transport `crate::server` wires this handler into — stdio via
//! `rmcp::transport::io`, or streamable HTTP via
//! `rmcp::transport::streamable_http_server` layered on an axum router.
//!
//! Tool names here are the externally-visible names (§6); the dispatcher's
//! `perform_rag_query` vs. `rag_query` naming split is deliberate — the
//! internal retrieval operation keeps its own name, only the MCP-facing tool
//! is renamed.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{
    CallToolResult, Content, Implementation, ListToolsResult, PaginatedRequestParam,
    ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, Envelope};

#[derive(Clone)]
pub struct KnowledgeServer {
    dispatcher: Arc<Dispatcher>,
}

impl KnowledgeServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

fn schema(properties: Value, required: &[&str]) -> Arc<Map<String, Value>> {
    let obj = json!({
        "type": "object",
        "properties": properties,
        "required": required,
    });
    Arc::new(obj.as_object().cloned().unwrap_or_default())
}

fn tool_def(name: &'static str, description: &'static str, input_schema: Arc<Map<String, Value>>) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema,
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn envelope_to_result(envelope: Envelope) -> CallToolResult {
    let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
    if envelope.success {
        CallToolResult::success(vec![Content::text(text)])
    } else {
        CallToolResult::error(vec![Content::text(text)])
    }
}

fn bad_arguments(message: impl Into<String>) -> McpError {
    McpError::invalid_params(message.into(), None)
}

fn args<T: for<'de> Deserialize<'de>>(arguments: Option<Map<String, Value>>) -> Result<T, McpError> {
    let value = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value).map_err(|e| bad_arguments(format!("invalid arguments: {e}")))
}

#[derive(Deserialize)]
struct ScrapeUrlsArgs {
    #[serde(deserialize_with = "one_or_many")]
    url: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[derive(Deserialize)]
struct SmartCrawlArgs {
    url: String,
    #[serde(default = "default_max_depth")]
    max_depth: i64,
    #[serde(default = "default_max_concurrent")]
    max_concurrent: i64,
}
fn default_max_depth() -> i64 {
    3
}
fn default_max_concurrent() -> i64 {
    10
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_num_results")]
    num_results: i64,
    #[serde(default)]
    return_raw_markdown: bool,
}
fn default_num_results() -> i64 {
    6
}

#[derive(Deserialize)]
struct RagQueryArgs {
    query: String,
    source: Option<String>,
    #[serde(default = "default_match_count")]
    match_count: i64,
}
fn default_match_count() -> i64 {
    5
}

#[derive(Deserialize)]
struct CodeExamplesArgs {
    query: String,
    source_id: Option<String>,
    #[serde(default = "default_match_count")]
    match_count: i64,
}

#[derive(Deserialize)]
struct RepoUrlArgs {
    repo_url: String,
}

#[derive(Deserialize)]
struct RepoBranchArgs {
    repo_url: String,
    branch: String,
}

#[derive(Deserialize)]
struct RepoNameArgs {
    repo_name: String,
}

#[derive(Deserialize)]
struct GraphQueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct ScriptPathArgs {
    script_path: String,
}

impl ServerHandler for KnowledgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation {
                name: "crawl-harness".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Crawl, chunk, embed, and query web content and code repositories.".to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let graph_enabled = self.dispatcher.config.features.use_knowledge_graph;

        let mut tools = vec![
            tool_def(
                "scrape_urls",
                "Fetch, chunk, embed, and index one or more URLs.",
                schema(json!({"url": {}}), &["url"]),
            ),
            tool_def(
                "smart_crawl_url",
                "Expand a URL (sitemap, text file, or page with links) and ingest everything found.",
                schema(
                    json!({
                        "url": {"type": "string"},
                        "max_depth": {"type": "integer"},
                        "max_concurrent": {"type": "integer"},
                    }),
                    &["url"],
                ),
            ),
            tool_def(
                "search",
                "Run a web search, ingest the results, and return either raw markdown or ranked passages.",
                schema(
                    json!({
                        "query": {"type": "string"},
                        "num_results": {"type": "integer"},
                        "return_raw_markdown": {"type": "boolean"},
                    }),
                    &["query"],
                ),
            ),
            tool_def(
                "perform_rag_query",
                "Search indexed documents for passages relevant to a query.",
                schema(
                    json!({
                        "query": {"type": "string"},
                        "source": {"type": "string"},
                        "match_count": {"type": "integer"},
                    }),
                    &["query"],
                ),
            ),
            tool_def(
                "search_code_examples",
                "Search indexed code examples, validating matches against the code knowledge graph when available.",
                schema(
                    json!({
                        "query": {"type": "string"},
                        "source_id": {"type": "string"},
                        "match_count": {"type": "integer"},
                    }),
                    &["query"],
                ),
            ),
            tool_def(
                "get_available_sources",
                "List every source that has been crawled.",
                schema(json!({}), &[]),
            ),
        ];

        if graph_enabled {
            tools.extend([
                tool_def(
                    "parse_github_repository",
                    "Clone a repository and build its code knowledge graph.",
                    schema(json!({"repo_url": {"type": "string"}}), &["repo_url"]),
                ),
                tool_def(
                    "parse_repository_branch",
                    "Clone a specific branch of a repository and build its code knowledge graph.",
                    schema(
                        json!({"repo_url": {"type": "string"}, "branch": {"type": "string"}}),
                        &["repo_url", "branch"],
                    ),
                ),
                tool_def(
                    "update_parsed_repository",
                    "Re-parse an already-ingested repository.",
                    schema(json!({"repo_url": {"type": "string"}}), &["repo_url"]),
                ),
                tool_def(
                    "get_repository_info",
                    "Get metadata for an already-ingested repository.",
                    schema(json!({"repo_name": {"type": "string"}}), &["repo_name"]),
                ),
                tool_def(
                    "query_knowledge_graph",
                    "Query the code knowledge graph in free text for a repository, class, method, or function.",
                    schema(json!({"query": {"type": "string"}}), &["query"]),
                ),
                tool_def(
                    "check_ai_script_hallucinations",
                    "Check a script's call expressions against the code knowledge graph for unresolvable calls.",
                    schema(json!({"script_path": {"type": "string"}}), &["script_path"]),
                ),
            ]);
        }

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let cancel = CancellationToken::new();
        let ct_guard = context.ct.clone();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                ct_guard.cancelled().await;
                cancel.cancel();
            }
        });

        let d = &self.dispatcher;
        let envelope = match request.name.as_ref() {
            "scrape_urls" => {
                let a: ScrapeUrlsArgs = args(request.arguments)?;
                d.scrape_urls(cancel, a.url).await
            }
            "smart_crawl_url" => {
                let a: SmartCrawlArgs = args(request.arguments)?;
                d.smart_crawl_url(cancel, a.url, a.max_depth, a.max_concurrent).await
            }
            "search" => {
                let a: SearchArgs = args(request.arguments)?;
                d.search(cancel, a.query, a.num_results, a.return_raw_markdown).await
            }
            "perform_rag_query" => {
                let a: RagQueryArgs = args(request.arguments)?;
                d.perform_rag_query(cancel, a.query, a.source, a.match_count).await
            }
            "search_code_examples" => {
                let a: CodeExamplesArgs = args(request.arguments)?;
                d.search_code_examples(cancel, a.query, a.source_id, a.match_count).await
            }
            "get_available_sources" => d.get_available_sources(cancel).await,
            "parse_github_repository" => {
                let a: RepoUrlArgs = args(request.arguments)?;
                d.parse_github_repository(cancel, a.repo_url).await
            }
            "parse_repository_branch" => {
                let a: RepoBranchArgs = args(request.arguments)?;
                d.parse_repository_branch(cancel, a.repo_url, a.branch).await
            }
            "update_parsed_repository" => {
                let a: RepoUrlArgs = args(request.arguments)?;
                d.update_parsed_repository(cancel, a.repo_url).await
            }
            "get_repository_info" => {
                let a: RepoNameArgs = args(request.arguments)?;
                d.get_repository_info(cancel, a.repo_name).await
            }
            "query_knowledge_graph" => {
                let a: GraphQueryArgs = args(request.arguments)?;
                d.query_knowledge_graph(cancel, a.query).await
            }
            "check_ai_script_hallucinations" => {
                let a: ScriptPathArgs = args(request.arguments)?;
                d.check_ai_script_hallucinations(cancel, a.script_path).await
            }
            other => return Err(McpError::invalid_params(format!("unknown tool '{other}'"), None)),
        };

        Ok(envelope_to_result(envelope))
    }
}
