//! Version store capability and the default git driver.
//!
//! The engine only needs three operations: idempotent repo initialization,
//! stage-all commits, and a per-commit changed-path summary. Everything is
//! shelled out to `git`; no libgit bindings.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

const IGNORE_FILE: &str = "\
.elisa/logs/
.elisa/status/
__pycache__/
node_modules/
*.pyc
.DS_Store
";

/// Produced per successful task commit. Deletion is not modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub agent_name: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<String>,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Initialize a repository at `path`. Safe to call repeatedly. Seeds a
    /// README when absent and creates the initial commit if and only if
    /// there are staged files.
    async fn init_repo(&self, path: &Path, goal: &str) -> Result<()>;

    /// Stage everything and commit. Returns `None` when nothing is staged.
    async fn commit(
        &self,
        path: &Path,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitRecord>>;

    /// Paths changed by a commit. Empty for the first commit (no parent).
    async fn diff_summary(&self, path: &Path, sha: &str) -> Result<Vec<String>>;
}

/// Default store driving the system `git` binary.
pub struct GitStore;

impl GitStore {
    async fn run(path: &Path, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=Elisa Build",
                "-c",
                "user.email=build@elisa.local",
            ])
            .args(args)
            .current_dir(path)
            .output()
            .await
            .with_context(|| format!("failed to run git in {}", path.display()))?;
        Ok(output)
    }

    async fn run_checked(path: &Path, args: &[&str]) -> Result<String> {
        let output = Self::run(path, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            return Err(anyhow!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                if detail.is_empty() {
                    "unknown error"
                } else {
                    detail
                }
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// True when the index has staged changes.
    async fn has_staged(path: &Path) -> Result<bool> {
        let output = Self::run(path, &["diff", "--cached", "--quiet"]).await?;
        Ok(!output.status.success())
    }
}

#[async_trait]
impl VersionStore for GitStore {
    async fn init_repo(&self, path: &Path, goal: &str) -> Result<()> {
        if !path.join(".git").exists() {
            Self::run_checked(path, &["init", "--initial-branch=main"]).await?;
        }

        let ignore = path.join(".gitignore");
        if !ignore.exists() {
            tokio::fs::write(&ignore, IGNORE_FILE).await?;
        }

        let readme = path.join("README.md");
        if !readme.exists() {
            tokio::fs::write(&readme, format!("# {}\n\nBuilt with Elisa.\n", goal)).await?;
        }

        Self::run_checked(path, &["add", "-A"]).await?;
        if Self::has_staged(path).await? {
            Self::run_checked(path, &["commit", "-m", "Initialize workspace"]).await?;
        }
        Ok(())
    }

    async fn commit(
        &self,
        path: &Path,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitRecord>> {
        Self::run_checked(path, &["add", "-A"]).await?;
        if !Self::has_staged(path).await? {
            return Ok(None);
        }

        Self::run_checked(path, &["commit", "-m", message]).await?;
        let hash = Self::run_checked(path, &["rev-parse", "HEAD"]).await?;
        let files = self.diff_summary(path, &hash).await.unwrap_or_default();

        Ok(Some(CommitRecord {
            short_hash: hash.chars().take(8).collect(),
            hash,
            message: message.to_string(),
            agent_name: agent_name.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            files,
        }))
    }

    async fn diff_summary(&self, path: &Path, sha: &str) -> Result<Vec<String>> {
        // Root commits have no parent; diff-tree prints nothing for them.
        let stdout =
            Self::run_checked(path, &["diff-tree", "--no-commit-id", "--name-only", "-r", sha])
                .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}
