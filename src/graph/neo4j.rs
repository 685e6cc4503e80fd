//! Neo4j-backed [`GraphStore`] implementation.
//!
//! Every write runs inside a single `neo4rs` transaction; a failure at any
//! step rolls the whole thing back rather than leaving partial graph state,
//! per §4.8's "hardest invariant" framing of the clear protocol.

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph};

use crate::models::{BranchNode, ClassNode, CommitNode, FunctionNode, MethodNode, ParamDetail, Repository, TagNode};

use super::{AnalyzedFile, GraphStore};

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("GraphUnavailable: failed to connect to the graph backend")?;
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn ingest_repository(
        &self,
        repo: &Repository,
        files: &[AnalyzedFile],
        branches: &[BranchNode],
        tags: &[TagNode],
        commits: &[CommitNode],
    ) -> Result<()> {
        let mut txn = self.graph.start_txn().await.context("GraphUnavailable")?;

        let extension_json = serde_json::to_string(&repo.extension_counts).unwrap_or_default();
        let run = txn
            .run(
                query(
                    "MERGE (r:Repository {name: $name}) \
                     SET r.clone_url = $clone_url, r.default_branch = $default_branch, \
                         r.extension_counts_json = $extension_json, r.contributor_count = $contributor_count, \
                         r.size_bytes = $size_bytes",
                )
                .param("name", repo.name.clone())
                .param("clone_url", repo.clone_url.clone())
                .param("default_branch", repo.default_branch.clone().unwrap_or_default())
                .param("extension_json", extension_json)
                .param("contributor_count", repo.contributor_count as i64)
                .param("size_bytes", repo.size_bytes as i64),
            )
            .await;
        if let Err(e) = run {
            let _ = txn.rollback().await;
            anyhow::bail!("GraphCleanupFailed: failed to write repository node: {e}");
        }

        for file in files {
            if let Err(e) = write_file(&mut txn, &repo.name, file).await {
                let _ = txn.rollback().await;
                return Err(e);
            }
        }

        for branch in branches {
            let run = txn
                .run(
                    query(
                        "MATCH (r:Repository {name: $repo}) \
                         MERGE (b:Branch {repo_name: $repo, name: $name}) \
                         SET b.is_default = $is_default, b.last_commit_date = $date, b.last_commit_message = $message \
                         MERGE (r)-[:HAS_BRANCH]->(b)",
                    )
                    .param("repo", repo.name.clone())
                    .param("name", branch.name.clone())
                    .param("is_default", branch.is_default)
                    .param("date", branch.last_commit_date.clone().unwrap_or_default())
                    .param("message", branch.last_commit_message.clone().unwrap_or_default()),
                )
                .await;
            if let Err(e) = run {
                let _ = txn.rollback().await;
                anyhow::bail!("GraphCleanupFailed: failed to write branch node: {e}");
            }
        }

        for tag in tags {
            let run = txn
                .run(
                    query(
                        "MATCH (r:Repository {name: $repo}) \
                         MERGE (t:Tag {repo_name: $repo, name: $name}) \
                         SET t.date = $date, t.message = $message \
                         MERGE (r)-[:HAS_TAG]->(t)",
                    )
                    .param("repo", repo.name.clone())
                    .param("name", tag.name.clone())
                    .param("date", tag.date.clone().unwrap_or_default())
                    .param("message", tag.message.clone().unwrap_or_default()),
                )
                .await;
            if let Err(e) = run {
                let _ = txn.rollback().await;
                anyhow::bail!("GraphCleanupFailed: failed to write tag node: {e}");
            }
        }

        for commit in commits {
            let run = txn
                .run(
                    query(
                        "MATCH (r:Repository {name: $repo}) \
                         MERGE (c:Commit {repo_name: $repo, hash: $hash}) \
                         SET c.author_name = $author_name, c.author_email = $author_email, \
                             c.timestamp = $timestamp, c.message = $message \
                         MERGE (r)-[:HAS_COMMIT]->(c)",
                    )
                    .param("repo", repo.name.clone())
                    .param("hash", commit.hash.clone())
                    .param("author_name", commit.author_name.clone())
                    .param("author_email", commit.author_email.clone())
                    .param("timestamp", commit.timestamp)
                    .param("message", commit.message.clone()),
                )
                .await;
            if let Err(e) = run {
                let _ = txn.rollback().await;
                anyhow::bail!("GraphCleanupFailed: failed to write commit node: {e}");
            }
        }

        txn.commit().await.context("GraphCleanupFailed: transaction commit failed")?;
        Ok(())
    }

    async fn clear_repository(&self, repo_name: &str) -> Result<()> {
        let mut txn = self.graph.start_txn().await.context("GraphUnavailable")?;

        let steps: [&str; 9] = [
            "MATCH (:Repository {name: $repo})-[:CONTAINS]->(:File)-[:DEFINES]->(:Class)-[:HAS_METHOD]->(m:Method) DETACH DELETE m",
            "MATCH (:Repository {name: $repo})-[:CONTAINS]->(:File)-[:DEFINES]->(:Class)-[:HAS_ATTRIBUTE]->(a:Attribute) DETACH DELETE a",
            "MATCH (:Repository {name: $repo})-[:CONTAINS]->(:File)-[:DEFINES]->(f:Function) DETACH DELETE f",
            "MATCH (:Repository {name: $repo})-[:CONTAINS]->(:File)-[:DEFINES]->(c:Class) DETACH DELETE c",
            "MATCH (:Repository {name: $repo})-[:CONTAINS]->(f:File) DETACH DELETE f",
            "MATCH (:Repository {name: $repo})-[:HAS_BRANCH]->(b:Branch) DETACH DELETE b",
            "MATCH (:Repository {name: $repo})-[:HAS_TAG]->(t:Tag) DETACH DELETE t",
            "MATCH (:Repository {name: $repo})-[:HAS_COMMIT]->(c:Commit) DETACH DELETE c",
            "MATCH (r:Repository {name: $repo}) DETACH DELETE r",
        ];

        for cypher in steps {
            if let Err(e) = txn.run(query(cypher).param("repo", repo_name.to_string())).await {
                let _ = txn.rollback().await;
                anyhow::bail!("GraphCleanupFailed: {e}");
            }
        }

        txn.commit().await.context("GraphCleanupFailed: transaction commit failed")?;
        Ok(())
    }

    async fn find_method(&self, name: &str, class_name: Option<&str>, repo_name: Option<&str>) -> Result<Vec<MethodNode>> {
        let mut q = query(
            "MATCH (r:Repository)-[:CONTAINS]->(:File)-[:DEFINES]->(c:Class)-[:HAS_METHOD]->(m:Method {name: $name}) \
             WHERE ($class_name IS NULL OR c.name = $class_name) AND ($repo_name IS NULL OR r.name = $repo_name) \
             RETURN m.name AS name, m.qualified_name AS qualified_name, c.name AS class_name, m.line_number AS line_number, \
                    m.params_raw AS params_raw, m.return_type AS return_type, m.docstring AS docstring, \
                    m.is_async AS is_async, m.is_static AS is_static, m.is_classmethod AS is_classmethod",
        )
        .param("name", name.to_string());
        q = q
            .param("class_name", class_name.map(|s| s.to_string()))
            .param("repo_name", repo_name.map(|s| s.to_string()));

        let rows = run_read(&self.graph, q).await?;
        Ok(rows
            .into_iter()
            .map(|row| MethodNode {
                name: row.get("name").unwrap_or_default(),
                qualified_name: row.get("qualified_name").unwrap_or_default(),
                class_name: row.get("class_name").unwrap_or_default(),
                line_number: row.get::<i64>("line_number").unwrap_or(0) as u32,
                params_raw: row.get("params_raw").unwrap_or_default(),
                params_detail: Vec::new(),
                return_type: row.get("return_type"),
                docstring: row.get("docstring"),
                is_async: row.get("is_async").unwrap_or(false),
                is_static: row.get("is_static").unwrap_or(false),
                is_classmethod: row.get("is_classmethod").unwrap_or(false),
            })
            .collect())
    }

    async fn find_function(&self, name: &str, repo_name: Option<&str>) -> Result<Vec<FunctionNode>> {
        let q = query(
            "MATCH (r:Repository)-[:CONTAINS]->(f:File)-[:DEFINES]->(fn:Function {name: $name}) \
             WHERE ($repo_name IS NULL OR r.name = $repo_name) \
             RETURN fn.name AS name, fn.qualified_name AS qualified_name, f.path AS file_path, fn.line_number AS line_number, \
                    fn.params_raw AS params_raw, fn.return_type AS return_type, fn.docstring AS docstring, fn.is_async AS is_async",
        )
        .param("name", name.to_string())
        .param("repo_name", repo_name.map(|s| s.to_string()));

        let rows = run_read(&self.graph, q).await?;
        Ok(rows
            .into_iter()
            .map(|row| FunctionNode {
                name: row.get("name").unwrap_or_default(),
                qualified_name: row.get("qualified_name").unwrap_or_default(),
                file_path: row.get("file_path").unwrap_or_default(),
                line_number: row.get::<i64>("line_number").unwrap_or(0) as u32,
                params_raw: row.get("params_raw").unwrap_or_default(),
                params_detail: Vec::new(),
                return_type: row.get("return_type"),
                docstring: row.get("docstring"),
                is_async: row.get("is_async").unwrap_or(false),
            })
            .collect())
    }

    async fn find_class(&self, name: &str, repo_name: Option<&str>) -> Result<Vec<ClassNode>> {
        let q = query(
            "MATCH (r:Repository)-[:CONTAINS]->(f:File)-[:DEFINES]->(c:Class {name: $name}) \
             WHERE ($repo_name IS NULL OR r.name = $repo_name) \
             RETURN c.name AS name, c.qualified_name AS qualified_name, f.path AS file_path, c.line_number AS line_number, c.docstring AS docstring",
        )
        .param("name", name.to_string())
        .param("repo_name", repo_name.map(|s| s.to_string()));

        let rows = run_read(&self.graph, q).await?;
        Ok(rows
            .into_iter()
            .map(|row| ClassNode {
                name: row.get("name").unwrap_or_default(),
                qualified_name: row.get("qualified_name").unwrap_or_default(),
                file_path: row.get("file_path").unwrap_or_default(),
                line_number: row.get::<i64>("line_number").unwrap_or(0) as u32,
                docstring: row.get("docstring"),
            })
            .collect())
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let q = query(
            "MATCH (r:Repository) RETURN r.name AS name, r.clone_url AS clone_url, r.default_branch AS default_branch, \
                    r.extension_counts_json AS extension_counts_json, r.contributor_count AS contributor_count, r.size_bytes AS size_bytes",
        );
        let rows = run_read(&self.graph, q).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let extension_counts = row
                    .get::<String>("extension_counts_json")
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default();
                Repository {
                    name: row.get("name").unwrap_or_default(),
                    clone_url: row.get("clone_url").unwrap_or_default(),
                    default_branch: row.get("default_branch"),
                    extension_counts,
                    contributor_count: row.get::<i64>("contributor_count").unwrap_or(0) as u64,
                    size_bytes: row.get::<i64>("size_bytes").unwrap_or(0) as u64,
                }
            })
            .collect())
    }
}

async fn write_file(txn: &mut neo4rs::Txn, repo_name: &str, file: &AnalyzedFile) -> Result<()> {
    txn.run(
        query("MATCH (r:Repository {name: $repo}) MERGE (f:File {path: $path, repo_name: $repo}) MERGE (r)-[:CONTAINS]->(f)")
            .param("repo", repo_name.to_string())
            .param("path", file.path.clone()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("GraphCleanupFailed: failed to write file node: {e}"))?;

    for class in &file.analysis.classes {
        txn.run(
            query(
                "MATCH (f:File {path: $path, repo_name: $repo}) \
                 MERGE (c:Class {qualified_name: $qualified_name, repo_name: $repo}) \
                 SET c.name = $name, c.line_number = $line_number, c.docstring = $docstring \
                 MERGE (f)-[:DEFINES]->(c)",
            )
            .param("path", file.path.clone())
            .param("repo", repo_name.to_string())
            .param("qualified_name", class.qualified_name.clone())
            .param("name", class.name.clone())
            .param("line_number", class.line_number as i64)
            .param("docstring", class.docstring.clone().unwrap_or_default()),
        )
        .await
        .map_err(|e| anyhow::anyhow!("GraphCleanupFailed: failed to write class node: {e}"))?;
    }

    for method in &file.analysis.methods {
        write_params_note(&method.params_detail);
        txn.run(
            query(
                "MATCH (c:Class {qualified_name: $class_qualified, repo_name: $repo}) \
                 MERGE (m:Method {qualified_name: $qualified_name, repo_name: $repo}) \
                 SET m.name = $name, m.line_number = $line_number, m.params_raw = $params_raw, \
                     m.return_type = $return_type, m.docstring = $docstring, m.is_async = $is_async, \
                     m.is_static = $is_static, m.is_classmethod = $is_classmethod \
                 MERGE (c)-[:HAS_METHOD]->(m)",
            )
            .param("class_qualified", class_prefix(&method.qualified_name, &method.name))
            .param("repo", repo_name.to_string())
            .param("qualified_name", method.qualified_name.clone())
            .param("name", method.name.clone())
            .param("line_number", method.line_number as i64)
            .param("params_raw", method.params_raw.clone())
            .param("return_type", method.return_type.clone().unwrap_or_default())
            .param("docstring", method.docstring.clone().unwrap_or_default())
            .param("is_async", method.is_async)
            .param("is_static", method.is_static)
            .param("is_classmethod", method.is_classmethod),
        )
        .await
        .map_err(|e| anyhow::anyhow!("GraphCleanupFailed: failed to write method node: {e}"))?;
    }

    for attribute in &file.analysis.attributes {
        txn.run(
            query(
                "MATCH (c:Class {name: $class_name, repo_name: $repo})<-[:DEFINES]-(:File {path: $path}) \
                 MERGE (a:Attribute {name: $name, class_name: $class_name, repo_name: $repo}) \
                 SET a.type_annotation = $type_annotation \
                 MERGE (c)-[:HAS_ATTRIBUTE]->(a)",
            )
            .param("class_name", attribute.class_name.clone())
            .param("repo", repo_name.to_string())
            .param("path", file.path.clone())
            .param("name", attribute.name.clone())
            .param("type_annotation", attribute.type_annotation.clone().unwrap_or_default()),
        )
        .await
        .map_err(|e| anyhow::anyhow!("GraphCleanupFailed: failed to write attribute node: {e}"))?;
    }

    for function in &file.analysis.functions {
        txn.run(
            query(
                "MATCH (f:File {path: $path, repo_name: $repo}) \
                 MERGE (fn:Function {qualified_name: $qualified_name, repo_name: $repo}) \
                 SET fn.name = $name, fn.line_number = $line_number, fn.params_raw = $params_raw, \
                     fn.return_type = $return_type, fn.docstring = $docstring, fn.is_async = $is_async \
                 MERGE (f)-[:DEFINES]->(fn)",
            )
            .param("path", file.path.clone())
            .param("repo", repo_name.to_string())
            .param("qualified_name", function.qualified_name.clone())
            .param("name", function.name.clone())
            .param("line_number", function.line_number as i64)
            .param("params_raw", function.params_raw.clone())
            .param("return_type", function.return_type.clone().unwrap_or_default())
            .param("docstring", function.docstring.clone().unwrap_or_default())
            .param("is_async", function.is_async),
        )
        .await
        .map_err(|e| anyhow::anyhow!("GraphCleanupFailed: failed to write function node: {e}"))?;
    }

    Ok(())
}

/// `params_detail` is not persisted as graph properties (would require a
/// nested node per parameter for little query benefit); kept on the Rust
/// struct for callers that want it straight off the ingest path.
fn write_params_note(_params: &[ParamDetail]) {}

fn class_prefix(qualified_name: &str, method_name: &str) -> String {
    qualified_name
        .strip_suffix(&format!(".{method_name}"))
        .unwrap_or(qualified_name)
        .to_string()
}

async fn run_read(graph: &Graph, q: neo4rs::Query) -> Result<Vec<neo4rs::Row>> {
    let mut result = graph
        .execute(q)
        .await
        .context("GraphUnavailable: query failed")?;
    let mut rows = Vec::new();
    while let Some(row) = result.next().await.context("GraphUnavailable: streaming failed")? {
        rows.push(row);
    }
    Ok(rows)
}
