//! Code knowledge graph store boundary (C8).
//!
//! [`GraphStore`] is the trait the ingestion orchestrator (C9) and the
//! validated code search (C10) depend on; [`neo4j::Neo4jGraphStore`] is the
//! only backend, gated behind `features.use_knowledge_graph` +
//! `graph_store.uri`. Every read operation tolerates a closed or degraded
//! backend — callers see `GraphUnavailable` and degrade retrieval rather than
//! failing the whole request (§7).

pub mod analyze;
pub mod neo4j;
pub mod repo_fetch;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{BranchNode, ClassNode, CommitNode, FileAnalysis, FunctionNode, MethodNode, Repository, TagNode};

/// One analyzed file, ready to be written as a `File` node plus its
/// Class/Method/Function/Attribute children.
pub struct AnalyzedFile {
    pub path: String,
    pub analysis: FileAnalysis,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Writes `Repository`, `File`, `Class`/`Method`/`Function`/`Attribute`,
    /// `Branch`, `Tag`, and `Commit` nodes and their edges in one transaction
    /// where the backend supports it (§4.8 step 3–4). Callers must have
    /// already called [`GraphStore::clear_repository`] for `repo.name`.
    async fn ingest_repository(
        &self,
        repo: &Repository,
        files: &[AnalyzedFile],
        branches: &[BranchNode],
        tags: &[TagNode],
        commits: &[CommitNode],
    ) -> Result<()>;

    /// The bounded-order cascade wipe (§4.8): methods, attributes,
    /// functions, classes, files, branches, tags, commits, then the
    /// repository node itself, all in one transaction. On any step failure
    /// the whole transaction rolls back — no partial state survives.
    async fn clear_repository(&self, repo_name: &str) -> Result<()>;

    async fn find_method(&self, name: &str, class_name: Option<&str>, repo_name: Option<&str>) -> Result<Vec<MethodNode>>;
    async fn find_function(&self, name: &str, repo_name: Option<&str>) -> Result<Vec<FunctionNode>>;
    async fn find_class(&self, name: &str, repo_name: Option<&str>) -> Result<Vec<ClassNode>>;
    async fn list_repositories(&self) -> Result<Vec<Repository>>;
}
