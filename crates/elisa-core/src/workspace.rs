//! Workspace lifecycle: provisioning, clean-vs-continue reset, stale
//! metadata cleanup, bounded inspection, and the path jail.
//!
//! Layout under a workspace root `W`:
//!
//! ```text
//! W/.elisa/comms/     per-task summaries        (cleaned per build + dispatch)
//! W/.elisa/context/   rolling context files     (cleaned per build + dispatch)
//! W/.elisa/status/    current-state snapshot    (cleaned per build + dispatch)
//! W/.elisa/logs/      session logs              (never cleaned)
//! W/src/  W/tests/    generated sources         (cleaned only in clean mode)
//! W/*.json            design files              (always preserved)
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{INSPECT_MAX_NODES, META_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    Continue,
    Clean,
}

impl Default for RestartMode {
    fn default() -> Self {
        Self::Continue
    }
}

/// Summary returned by `/api/workspace/inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInspection {
    pub exists: bool,
    pub is_empty: bool,
    pub file_count: usize,
    pub src_file_count: usize,
    pub test_file_count: usize,
    pub has_git: bool,
    pub top_files: Vec<String>,
}

const METADATA_SUBDIRS: [&str; 3] = ["comms", "context", "status"];
const TOP_FILES_LIMIT: usize = 20;

pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn comms_dir(&self) -> PathBuf {
        self.root.join(META_DIR).join("comms")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root.join(META_DIR).join("context")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join(META_DIR).join("status")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(META_DIR).join("logs")
    }

    pub fn session_log_path(&self, session_id: &str) -> PathBuf {
        self.logs_dir().join(format!("session-{}.log", session_id))
    }

    /// Create the workspace skeleton. Returns true when the root directory
    /// did not exist before this call.
    pub async fn provision(&self) -> Result<bool> {
        let created = !self.root.exists();
        for dir in [
            self.comms_dir(),
            self.context_dir(),
            self.status_dir(),
            self.logs_dir(),
            self.root.join("src"),
            self.root.join("tests"),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(created)
    }

    /// Apply the restart mode. `Continue` preserves everything; `Clean`
    /// empties `src/`, `tests/` and the three metadata directories while
    /// preserving `logs/` and the design files. Returns the entries removed.
    pub async fn reset(&self, mode: RestartMode) -> Result<Vec<String>> {
        if mode == RestartMode::Continue {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for name in ["src", "tests"] {
            let dir = self.root.join(name);
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
                removed.push(name.to_string());
            }
            tokio::fs::create_dir_all(&dir).await?;
        }
        for name in METADATA_SUBDIRS {
            let dir = self.root.join(META_DIR).join(name);
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
                removed.push(format!("{}/{}", META_DIR, name));
            }
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(removed)
    }

    /// Remove everything under `comms/`, `context/` and `status/` and
    /// recreate the directories. Runs before each build and again before
    /// each agent dispatch; never touches logs, sources or design files.
    pub async fn stale_clean(&self) -> Result<()> {
        for name in METADATA_SUBDIRS {
            let dir = self.root.join(META_DIR).join(name);
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Resolve a path argument against the workspace jail. The resolved
    /// path must stay inside the root; traversal and symlink escapes fail
    /// with a `PATH_ESCAPE` error.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf> {
        resolve_inside(&self.root, candidate)
            .map_err(|reason| anyhow!("PATH_ESCAPE: {}", reason))
    }

}

/// Jail resolution shared with the tool sandbox. Relative paths resolve
/// against `root`; the nearest existing ancestor is canonicalized so that
/// not-yet-created files can still be validated. Returns the reason string
/// on failure so callers can phrase their own error.
pub fn resolve_inside(root: &Path, candidate: &str) -> Result<PathBuf, String> {
    let resolved = {
        let p = PathBuf::from(candidate);
        if p.is_absolute() {
            p
        } else {
            root.join(p)
        }
    };

    for component in resolved.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err("path traversal (..) not allowed".into());
        }
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("workspace root unavailable: {}", e))?;

    if resolved.exists() {
        let canonical = resolved
            .canonicalize()
            .map_err(|e| format!("cannot resolve path: {}", e))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(format!("path {} escapes working directory", candidate));
        }
        return Ok(canonical);
    }

    // Walk up to the nearest existing ancestor, canonicalize it, then
    // re-append the missing components.
    let mut base = resolved.clone();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    while !base.exists() {
        match base.file_name() {
            Some(name) => suffix.push(name.to_owned()),
            None => break,
        }
        if !base.pop() {
            break;
        }
    }

    let canonical_base = if base.as_os_str().is_empty() || !base.exists() {
        canonical_root.clone()
    } else {
        base.canonicalize()
            .map_err(|e| format!("cannot resolve path: {}", e))?
    };

    if !canonical_base.starts_with(&canonical_root) {
        return Err(format!("path {} escapes working directory", candidate));
    }

    let mut final_path = canonical_base;
    for component in suffix.into_iter().rev() {
        final_path.push(component);
    }
    Ok(final_path)
}

/// Summarize a directory without descending more than `INSPECT_MAX_NODES`
/// entries. Skips `.git`, `node_modules` and anything starting with
/// `.elisa`.
pub fn inspect(path: &Path) -> WorkspaceInspection {
    if !path.exists() {
        return WorkspaceInspection {
            exists: false,
            is_empty: true,
            file_count: 0,
            src_file_count: 0,
            test_file_count: 0,
            has_git: false,
            top_files: Vec::new(),
        };
    }

    let src_root = path.join("src");
    let tests_root = path.join("tests");

    let mut file_count = 0usize;
    let mut src_file_count = 0usize;
    let mut test_file_count = 0usize;
    let mut top_files = Vec::new();
    let mut visited = 0usize;

    let mut queue: VecDeque<PathBuf> = VecDeque::from([path.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            visited += 1;
            if visited > INSPECT_MAX_NODES {
                queue.clear();
                break;
            }

            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" || name == "node_modules" || name.starts_with(META_DIR) {
                continue;
            }

            if dir == path && top_files.len() < TOP_FILES_LIMIT {
                top_files.push(name);
            }

            if entry_path.is_dir() {
                queue.push_back(entry_path);
            } else {
                file_count += 1;
                if entry_path.starts_with(&src_root) {
                    src_file_count += 1;
                } else if entry_path.starts_with(&tests_root) {
                    test_file_count += 1;
                }
            }
        }
    }

    WorkspaceInspection {
        exists: true,
        is_empty: file_count == 0 && top_files.is_empty(),
        file_count,
        src_file_count,
        test_file_count,
        has_git: path.join(".git").exists(),
        top_files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn provision_creates_skeleton() {
        let tmp = tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path().join("project"));

        assert!(ws.provision().await.unwrap());
        assert!(ws.comms_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert!(ws.root().join("src").is_dir());

        // Second call is a no-op on an existing root.
        assert!(!ws.provision().await.unwrap());
    }

    #[tokio::test]
    async fn clean_reset_preserves_logs_and_design_files() {
        let tmp = tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path().join("project"));
        ws.provision().await.unwrap();

        tokio::fs::write(ws.root().join("src/main.py"), "print(1)")
            .await
            .unwrap();
        tokio::fs::write(ws.root().join("workspace.json"), "{}")
            .await
            .unwrap();
        tokio::fs::write(ws.logs_dir().join("session-x.log"), "line")
            .await
            .unwrap();
        tokio::fs::write(ws.comms_dir().join("t1_summary.md"), "sum")
            .await
            .unwrap();

        let removed = ws.reset(RestartMode::Clean).await.unwrap();
        assert!(removed.contains(&"src".to_string()));

        assert!(!ws.root().join("src/main.py").exists());
        assert!(!ws.comms_dir().join("t1_summary.md").exists());
        assert!(ws.root().join("workspace.json").exists());
        assert!(ws.logs_dir().join("session-x.log").exists());
        // Directories themselves are recreated empty.
        assert!(ws.root().join("src").is_dir());
        assert!(ws.comms_dir().is_dir());
    }

    #[tokio::test]
    async fn continue_reset_preserves_everything() {
        let tmp = tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path().join("project"));
        ws.provision().await.unwrap();
        tokio::fs::write(ws.root().join("src/app.js"), "x")
            .await
            .unwrap();

        let removed = ws.reset(RestartMode::Continue).await.unwrap();
        assert!(removed.is_empty());
        assert!(ws.root().join("src/app.js").exists());
    }

    #[tokio::test]
    async fn stale_clean_empties_metadata_only() {
        let tmp = tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path().join("project"));
        ws.provision().await.unwrap();

        tokio::fs::write(ws.comms_dir().join("t1_summary.md"), "s")
            .await
            .unwrap();
        tokio::fs::write(ws.root().join("src/app.js"), "x")
            .await
            .unwrap();

        ws.stale_clean().await.unwrap();
        assert!(!ws.comms_dir().join("t1_summary.md").exists());
        assert!(ws.comms_dir().is_dir());
        assert!(ws.root().join("src/app.js").exists());
    }

    #[tokio::test]
    async fn jail_rejects_escapes() {
        let tmp = tempdir().unwrap();
        let ws = WorkspaceManager::new(tmp.path().join("project"));
        ws.provision().await.unwrap();

        let err = ws.resolve("../outside.txt").unwrap_err();
        assert!(err.to_string().contains("PATH_ESCAPE"));

        let ok = ws.resolve("src/new_file.py").unwrap();
        assert!(ok.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn inspect_skips_git_and_metadata() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join(".elisa/logs")).unwrap();
        std::fs::write(root.join("src/main.py"), "x").unwrap();
        std::fs::write(root.join(".elisa/logs/a.log"), "x").unwrap();

        let report = inspect(root);
        assert!(report.exists);
        assert!(report.has_git);
        assert_eq!(report.file_count, 1);
        assert_eq!(report.src_file_count, 1);
        assert!(!report.top_files.iter().any(|f| f.starts_with(".elisa")));
    }

    #[test]
    fn inspect_missing_path() {
        let report = inspect(Path::new("/definitely/not/here"));
        assert!(!report.exists);
        assert!(report.is_empty);
    }
}
