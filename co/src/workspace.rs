//! Workspace provisioning for works
//!
//! Each work gets an isolated git worktree on its own branch. This is a
//! narrow helper over the git CLI; everything else about repository
//! bootstrap stays outside the engine.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::GitConfig;

/// Error types for workspace operations
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace: {0}")]
    CreateFailed(String),

    #[error("Failed to remove workspace: {0}")]
    RemoveFailed(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Creates and removes per-work worktrees
pub struct Workspaces {
    config: GitConfig,
    repo_root: PathBuf,
}

impl Workspaces {
    /// Create a manager rooted at the given repository
    pub fn new(config: GitConfig, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            repo_root: repo_root.into(),
        }
    }

    /// The workspace path a work would get
    pub fn path_for(&self, work_id: &str) -> PathBuf {
        self.config.worktree_dir.join(work_id)
    }

    /// Create a worktree for a work on a new branch off the base branch
    pub async fn create(
        &self,
        work_id: &str,
        branch: &str,
        base_branch: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        tokio::fs::create_dir_all(&self.config.worktree_dir)
            .await
            .map_err(|e| WorkspaceError::CreateFailed(format!("failed to create base dir: {}", e)))?;

        let path = self.path_for(work_id);
        let output = Command::new("git")
            .args([
                "worktree",
                "add",
                &path.to_string_lossy(),
                "-b",
                branch,
                base_branch,
            ])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| WorkspaceError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::CreateFailed(stderr.trim().to_string()));
        }

        info!(work_id, branch, path = %path.display(), "workspace created");
        Ok(path)
    }

    /// Remove a work's worktree; missing workspaces are not an error
    pub async fn remove(&self, work_id: &str) -> Result<(), WorkspaceError> {
        let path = self.path_for(work_id);
        if !path.exists() {
            warn!(work_id, path = %path.display(), "workspace already gone, skipping removal");
            return Ok(());
        }

        let output = Command::new("git")
            .args(["worktree", "remove", &path.to_string_lossy(), "--force"])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| WorkspaceError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("is not a working tree") {
                return Err(WorkspaceError::RemoveFailed(stderr.trim().to_string()));
            }
            debug!(work_id, "worktree already detached");
        }

        info!(work_id, "workspace removed");
        Ok(())
    }

    /// Fetch upstream refs into a workspace (best effort, for `co sync`)
    pub async fn fetch(&self, workspace: &Path) -> Result<(), WorkspaceError> {
        let output = Command::new("git")
            .args(["fetch", "--all", "--prune"])
            .current_dir(workspace)
            .output()
            .await
            .map_err(|e| WorkspaceError::GitError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::GitError(stderr.trim().to_string()));
        }
        Ok(())
    }
}
