//! Data model entities shared across the ingestion, storage, and retrieval modules.
//!
//! These map directly to the entities described in the data model: [`Source`],
//! [`DocumentChunk`], [`CodeExample`], and the code-knowledge-graph node types
//! ([`Repository`], [`FileNode`], [`ClassNode`], [`MethodNode`], [`FunctionNode`],
//! [`AttributeNode`], [`BranchNode`], [`CommitNode`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed embedding dimensionality assumed of the external provider (OpenAI-compatible).
pub const EMBEDDING_DIM: usize = 1536;

/// A logical origin (a host) across which word-counts and summaries are aggregated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub source_id: String,
    pub summary: String,
    pub total_word_count: i64,
}

/// The indexed unit of crawled text. Identity is deterministic from `(url, chunk_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub source_id: String,
}

/// A mined fenced code block with an LLM-generated summary, embedded over `(code, summary)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExample {
    pub id: String,
    pub url: String,
    pub chunk_number: i64,
    pub code: String,
    pub summary: String,
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub source_id: String,
}

/// A search hit over document chunks or code examples, similarity normalized to `[0,1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub source_id: String,
    pub similarity: f64,
    /// Present only after the reranking pass (§4.10 step 4).
    pub rerank_score: Option<f64>,
}

// ---------------------------------------------------------------------------
// Code knowledge graph node types
// ---------------------------------------------------------------------------

/// A cloned, statically-analyzed source repository — the sole root of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub clone_url: String,
    pub default_branch: Option<String>,
    /// Supplemented from the original git-manager implementation: extension histogram.
    pub extension_counts: HashMap<String, u64>,
    pub contributor_count: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub repo_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNode {
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_number: u32,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDetail {
    pub name: String,
    pub type_annotation: Option<String>,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodNode {
    pub name: String,
    pub qualified_name: String,
    pub class_name: String,
    pub line_number: u32,
    pub params_raw: String,
    pub params_detail: Vec<ParamDetail>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub is_async: bool,
    pub is_static: bool,
    pub is_classmethod: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNode {
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_number: u32,
    pub params_raw: String,
    pub params_detail: Vec<ParamDetail>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub is_async: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeNode {
    pub name: String,
    pub class_name: String,
    pub type_annotation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchNode {
    pub name: String,
    pub is_default: bool,
    pub last_commit_date: Option<String>,
    pub last_commit_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitNode {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: i64,
    pub message: String,
}

/// Supplemented from the original git-manager implementation: tags carry a
/// creation date and the annotation/commit subject, same shape as `BranchNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagNode {
    pub name: String,
    pub date: Option<String>,
    pub message: Option<String>,
}

/// The parsed contents of one analyzed source file, produced by the static analyzer
/// (`crate::graph::analyze`) and consumed by the graph ingest pipeline.
#[derive(Debug, Clone, Default)]
pub struct FileAnalysis {
    pub classes: Vec<ClassNode>,
    pub methods: Vec<MethodNode>,
    pub attributes: Vec<AttributeNode>,
    pub functions: Vec<FunctionNode>,
}
