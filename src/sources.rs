//! CLI-facing wrapper around [`crate::store::KnowledgeStore::get_sources`].
//!
//! The dispatcher's `get_available_sources` tool calls the trait method
//! directly; this module exists only to give the `ctx sources` subcommand
//! (§4.15) a formatted table instead of raw JSON.

use anyhow::Result;

use crate::context::ServerContext;

/// CLI entry point for `ctx sources`: prints every crawled source and its
/// running word count.
pub async fn list_sources(ctx: &ServerContext) -> Result<()> {
    let sources = ctx.dispatcher.store.get_sources().await?;

    println!("{:<40} {:>12} SUMMARY", "SOURCE_ID", "WORDS");
    for s in &sources {
        let summary = if s.summary.len() > 60 {
            format!("{}...", &s.summary[..60])
        } else {
            s.summary.clone()
        };
        println!("{:<40} {:>12} {}", s.source_id, s.total_word_count, summary);
    }

    Ok(())
}
