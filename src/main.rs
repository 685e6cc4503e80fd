//! `ctx`: local, non-MCP access to the same operations the dispatcher exposes
//! over the wire (§4.15). Every subcommand builds one [`crawl_harness::context::ServerContext`]
//! and calls straight into it — no logic lives here that the dispatcher
//! doesn't also have access to.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crawl_harness::config;
use crawl_harness::context;
use crawl_harness::migrate;
use crawl_harness::server;
use crawl_harness::sources;

#[derive(Parser)]
#[command(name = "ctx", about = "Crawl, chunk, embed, and query web content and code repositories", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create/migrate the native store's schema.
    Init,

    /// Fetch, chunk, embed, and index one or more URLs.
    Scrape { urls: Vec<String> },

    /// Expand a URL (sitemap, text file, or page with links) and ingest everything found.
    Crawl {
        url: String,
        #[arg(long, default_value_t = 3)]
        max_depth: i64,
        #[arg(long, default_value_t = 10)]
        max_concurrent: i64,
    },

    /// Search indexed documents.
    Search {
        query: String,
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 5)]
        match_count: i64,
    },

    /// Search indexed code examples.
    CodeSearch {
        query: String,
        #[arg(long)]
        source_id: Option<String>,
        #[arg(long, default_value_t = 5)]
        match_count: i64,
    },

    /// List every source that has been crawled.
    Sources,

    /// Clone a repository and build its code knowledge graph.
    ParseRepo {
        url: String,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Re-parse an already-ingested repository.
    UpdateRepo { url: String },

    /// Start the MCP tool server.
    Serve {
        #[arg(long, default_value = "stdio")]
        transport: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            let ctx = context::build(cfg).await?;
            sources::list_sources(&ctx).await?;
        }
        Commands::Scrape { urls } => {
            let ctx = context::build(cfg).await?;
            let envelope = ctx.dispatcher.scrape_urls(CancellationToken::new(), urls).await;
            print_envelope(&envelope);
        }
        Commands::Crawl {
            url,
            max_depth,
            max_concurrent,
        } => {
            let ctx = context::build(cfg).await?;
            let envelope = ctx
                .dispatcher
                .smart_crawl_url(CancellationToken::new(), url, max_depth, max_concurrent)
                .await;
            print_envelope(&envelope);
        }
        Commands::Search {
            query,
            source,
            match_count,
        } => {
            let ctx = context::build(cfg).await?;
            let envelope = ctx
                .dispatcher
                .perform_rag_query(CancellationToken::new(), query, source, match_count)
                .await;
            print_envelope(&envelope);
        }
        Commands::CodeSearch {
            query,
            source_id,
            match_count,
        } => {
            let ctx = context::build(cfg).await?;
            let envelope = ctx
                .dispatcher
                .search_code_examples(CancellationToken::new(), query, source_id, match_count)
                .await;
            print_envelope(&envelope);
        }
        Commands::ParseRepo { url, branch } => {
            let ctx = context::build(cfg).await?;
            let envelope = match branch {
                Some(b) => ctx.dispatcher.parse_repository_branch(CancellationToken::new(), url, b).await,
                None => ctx.dispatcher.parse_github_repository(CancellationToken::new(), url).await,
            };
            print_envelope(&envelope);
        }
        Commands::UpdateRepo { url } => {
            let ctx = context::build(cfg).await?;
            let envelope = ctx.dispatcher.update_parsed_repository(CancellationToken::new(), url).await;
            print_envelope(&envelope);
        }
        Commands::Serve { transport } => {
            let ctx = context::build(cfg.clone()).await?;
            match transport.as_str() {
                "http" => server::serve_http(Arc::new(cfg), ctx.dispatcher).await?,
                _ => server::serve_stdio(ctx.dispatcher).await?,
            }
        }
    }

    Ok(())
}

fn print_envelope(envelope: &crawl_harness::dispatcher::Envelope) {
    match serde_json::to_string_pretty(envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize envelope: {e}"),
    }
}
