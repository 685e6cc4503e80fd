//! Repository clone/update and metadata extraction for the code knowledge graph (C8).
//!
//! Shells out to the system `git` binary rather than linking `libgit2` —
//! clone or fetch+reset into a local cache directory, then read
//! branch/commit/contributor metadata back out via `git` subcommands.

use anyhow::{bail, Context, Result};
use sha2::Digest;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::models::{BranchNode, CommitNode, Repository, TagNode};

/// Clones `url` into `cache_dir` if absent, else fetches and hard-resets to
/// `branch`. Returns the resolved working directory.
pub fn clone_or_update(url: &str, branch: &str, cache_dir: &Path) -> Result<PathBuf> {
    if cache_dir.join(".git").exists() {
        git_fetch_reset(cache_dir, branch)?;
    } else {
        git_clone(url, branch, cache_dir)?;
    }
    Ok(cache_dir.to_path_buf())
}

fn git_clone(url: &str, branch: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create repo cache directory: {}", dest.display()))?;

    let output = Command::new("git")
        .args(["clone", "--branch", branch, "--single-branch", url])
        .arg(dest)
        .output()
        .context("Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        bail!("git clone failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

fn git_fetch_reset(repo_dir: &Path, branch: &str) -> Result<()> {
    let fetch = Command::new("git")
        .args(["fetch", "origin", branch])
        .current_dir(repo_dir)
        .output()
        .context("Failed to execute 'git fetch'")?;
    if !fetch.status.success() {
        bail!("git fetch failed: {}", String::from_utf8_lossy(&fetch.stderr).trim());
    }

    let remote_ref = format!("origin/{branch}");
    let reset = Command::new("git")
        .args(["reset", "--hard", &remote_ref])
        .current_dir(repo_dir)
        .output()
        .context("Failed to execute 'git reset'")?;
    if !reset.status.success() {
        bail!("git reset failed: {}", String::from_utf8_lossy(&reset.stderr).trim());
    }
    Ok(())
}

pub fn head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .context("Failed to get HEAD SHA")?;
    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn default_branch(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["symbolic-ref", "--short", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Lists local branches with their HEAD commit date/message.
pub fn list_branches(repo_dir: &Path, current_default: Option<&str>) -> Vec<BranchNode> {
    let output = Command::new("git")
        .args([
            "for-each-ref",
            "--format=%(refname:short)|%(committerdate:unix)|%(subject)",
            "refs/heads",
        ])
        .current_dir(repo_dir)
        .output();

    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let name = parts.next()?.to_string();
            let date = parts.next().map(|s| s.to_string());
            let message = parts.next().map(|s| s.to_string());
            Some(BranchNode {
                is_default: current_default == Some(name.as_str()),
                name,
                last_commit_date: date,
                last_commit_message: message,
            })
        })
        .collect()
}

/// Lists tags with their creation date and subject (§4.8 supplement, grounded
/// in `git_manager.py`'s `get_tags`).
pub fn list_tags(repo_dir: &Path) -> Vec<TagNode> {
    let output = Command::new("git")
        .args([
            "tag",
            "-l",
            "--format=%(refname:short)|%(creatordate:unix)|%(subject)",
        ])
        .current_dir(repo_dir)
        .output();

    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let name = parts.next()?.to_string();
            let date = parts.next().map(|s| s.to_string());
            let message = parts.next().map(|s| s.to_string());
            Some(TagNode { name, date, message })
        })
        .collect()
}

/// Lists commit history up to `limit` entries, newest first (§4.8 supplement).
/// Uses author time (`%at`), not committer time, so `timestamp` stays
/// consistent with the paired `author_name`/`author_email` fields across
/// rebased or amended commits.
pub fn list_commits(repo_dir: &Path, limit: usize) -> Vec<CommitNode> {
    let output = Command::new("git")
        .args([
            "log",
            &format!("-{limit}"),
            "--format=%H|%an|%ae|%at|%s",
        ])
        .current_dir(repo_dir)
        .output();

    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(5, '|');
            let hash = parts.next()?.to_string();
            let author_name = parts.next()?.to_string();
            let author_email = parts.next()?.to_string();
            let timestamp = parts.next()?.parse::<i64>().ok()?;
            let message = parts.next().unwrap_or_default().to_string();
            Some(CommitNode {
                hash,
                author_name,
                author_email,
                timestamp,
                message,
            })
        })
        .collect()
}

fn contributor_count(repo_dir: &Path) -> u64 {
    let output = Command::new("git")
        .args(["shortlog", "-sn", "--all"])
        .current_dir(repo_dir)
        .output();
    match output {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).lines().count() as u64,
        _ => 0,
    }
}

/// Packed-object size in bytes, per `git count-objects -v -H`'s `size-pack:`
/// line — matches `git_manager.py`'s `get_repository_info`, not a sum over
/// working-tree file sizes.
fn dir_size_bytes(repo_dir: &Path) -> u64 {
    let output = Command::new("git")
        .args(["count-objects", "-v", "-H"])
        .current_dir(repo_dir)
        .output();

    let Ok(output) = output else {
        return 0;
    };
    if !output.status.success() {
        return 0;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix("size-pack:"))
        .and_then(|size| parse_human_size(size.trim()))
        .unwrap_or(0)
}

/// Parses `git count-objects -H`'s human-readable size (e.g. `"1.23 MiB"`,
/// `"512 bytes"`) back into a byte count.
fn parse_human_size(s: &str) -> Option<u64> {
    let mut parts = s.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let unit = parts.next().unwrap_or("bytes");
    let multiplier: f64 = match unit {
        "bytes" | "byte" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

fn extension_counts(repo_dir: &Path) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for entry in WalkDir::new(repo_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            *counts.entry(ext.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Builds the [`Repository`] node's metadata — extension histogram,
/// contributor count, total size — supplemented from the original
/// git-manager implementation's statistics gathering.
pub fn repository_metadata(name: &str, clone_url: &str, repo_dir: &Path) -> Repository {
    Repository {
        name: name.to_string(),
        clone_url: clone_url.to_string(),
        default_branch: default_branch(repo_dir),
        extension_counts: extension_counts(repo_dir),
        contributor_count: contributor_count(repo_dir),
        size_bytes: dir_size_bytes(repo_dir),
    }
}

/// Default cache directory for a clone, sibling to the sqlite database.
pub fn default_cache_dir(db_path: &Path, clone_url: &str) -> PathBuf {
    let db_parent = db_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let digest = sha2::Sha256::digest(clone_url.as_bytes());
    let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    db_parent.join(".repo-cache").join(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_readable_git_sizes() {
        assert_eq!(parse_human_size("512 bytes"), Some(512));
        assert_eq!(parse_human_size("1.00 KiB"), Some(1024));
        assert_eq!(parse_human_size("2.50 MiB"), Some((2.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_human_size("not a size"), None);
    }

    #[test]
    fn default_cache_dir_is_deterministic_per_url() {
        let db_path = Path::new("data/ctx.sqlite");
        let a = default_cache_dir(db_path, "https://github.com/acme/repo.git");
        let b = default_cache_dir(db_path, "https://github.com/acme/repo.git");
        let c = default_cache_dir(db_path, "https://github.com/acme/other.git");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
