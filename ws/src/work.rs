//! Work domain type
//!
//! A Work is a unit of user intent: an isolated workspace on a feature
//! branch, a set of assigned beads, and the tasks scheduled against them.

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Work lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Created, no task has started yet
    #[default]
    Pending,
    /// At least one task has been claimed
    Processing,
    /// All terminal tasks succeeded
    Completed,
    /// Fatal error
    Failed,
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown work status: {}", other)),
        }
    }
}

/// A unit of orchestrated effort against a feature branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Filesystem path to the isolated workspace
    pub worktree_path: String,

    /// Target branch the work commits to
    pub branch_name: String,

    /// Branch the target branch forked from
    pub base_branch: String,

    /// Root issue in the external issue graph, if any
    pub root_issue_id: Option<String>,

    /// Pull request URL once a pr task completed
    pub pr_url: Option<String>,

    /// Current status
    pub status: WorkStatus,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// First task claim timestamp
    pub started_at: Option<i64>,

    /// Terminal timestamp
    pub completed_at: Option<i64>,
}

impl Work {
    /// Create a new Work in pending status
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        worktree_path: impl Into<String>,
        branch_name: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            worktree_path: worktree_path.into(),
            branch_name: branch_name.into(),
            base_branch: base_branch.into(),
            root_issue_id: None,
            pr_url: None,
            status: WorkStatus::Pending,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the root issue reference
    pub fn with_root_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.root_issue_id = Some(issue_id.into());
        self
    }

    /// Check if the work is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, WorkStatus::Completed | WorkStatus::Failed)
    }
}
