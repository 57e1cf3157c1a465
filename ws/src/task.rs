//! Task domain types
//!
//! A Task is one scheduled agent invocation. Its id is `{work-id}.{n}`
//! with n allocated per work. Tasks link to one or more beads, carry a
//! kind-specific workflow role, and depend on other tasks of the same
//! work.

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Reserved metadata key: `"false"` on a review task suppresses the
/// automated pr / update-pr-description follow-up.
pub const AUTO_WORKFLOW: &str = "auto_workflow";

/// What the agent is asked to do for this task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Implement the linked beads on the work branch
    Implement,
    /// Review the accumulated changes; may record new beads
    Review,
    /// Open the pull request
    Pr,
    /// Refresh the pull request description after later changes
    UpdatePrDescription,
    /// Estimate complexity for the linked beads
    Estimate,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Implement => write!(f, "implement"),
            Self::Review => write!(f, "review"),
            Self::Pr => write!(f, "pr"),
            Self::UpdatePrDescription => write!(f, "update_pr_description"),
            Self::Estimate => write!(f, "estimate"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implement" => Ok(Self::Implement),
            "review" => Ok(Self::Review),
            "pr" => Ok(Self::Pr),
            "update_pr_description" => Ok(Self::UpdatePrDescription),
            "estimate" => Ok(Self::Estimate),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// Task (and task-bead) lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Build a task id from its work and per-work number
pub fn task_id(work_id: &str, n: i64) -> String {
    format!("{}.{}", work_id, n)
}

/// A single scheduled agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier of the form `{work-id}.{n}`
    pub id: String,

    /// Owning work
    pub work_id: String,

    /// Workflow role
    pub kind: TaskKind,

    /// Current status
    pub status: TaskStatus,

    /// Complexity budget hint for the agent
    pub complexity_budget: i64,

    /// Complexity the agent reported back, if any
    pub actual_complexity: Option<i64>,

    /// Worktree the task ran in, once claimed
    pub worktree_path: Option<String>,

    /// Result artifact (the PR URL for a completed pr task)
    pub pr_url: Option<String>,

    /// Error text for a failed task
    pub error_message: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Claim timestamp; set iff the task reached processing
    pub started_at: Option<i64>,

    /// Terminal timestamp; set iff the task completed or failed
    pub completed_at: Option<i64>,
}

impl Task {
    /// Create a new pending Task
    pub fn new(id: impl Into<String>, work_id: impl Into<String>, kind: TaskKind, budget: i64) -> Self {
        Self {
            id: id.into(),
            work_id: work_id.into(),
            kind,
            status: TaskStatus::Pending,
            complexity_budget: budget,
            actual_complexity: None,
            worktree_path: None,
            pr_url: None,
            error_message: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
        }
    }

    /// The per-work number parsed out of the id
    pub fn number(&self) -> Option<i64> {
        self.id
            .strip_prefix(self.work_id.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|n| n.parse().ok())
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Check if the task is pending or processing
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Link between a task and one bead, with its own progress status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBead {
    pub task_id: String,
    pub bead_id: String,
    pub status: TaskStatus,
}

/// A bead assigned to a work
///
/// `group_id` 0 means "this bead becomes its own implement task";
/// a positive group id collects beads into one shared task. `ordinal`
/// preserves insertion order across the work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkBead {
    pub work_id: String,
    pub bead_id: String,
    pub group_id: i64,
    pub ordinal: i64,
}

/// Dependency reference inside a follow-up batch
///
/// Follow-up tasks may depend on tasks that already exist or on earlier
/// entries of the same batch (which have no id until the batch commits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRef {
    /// An existing task id
    Existing(String),
    /// Index into the batch being created
    InBatch(usize),
}

/// Specification of a task to be created by the workflow machine
///
/// Persisted atomically (task + bead links + metadata + dependency edges)
/// by `Store::create_follow_ups`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: TaskKind,
    pub bead_ids: Vec<String>,
    pub complexity_budget: i64,
    pub depends_on: Vec<DepRef>,
    pub metadata: Vec<(String, String)>,
}

impl NewTask {
    /// Create a NewTask with no beads, deps, or metadata
    pub fn new(kind: TaskKind, budget: i64) -> Self {
        Self {
            kind,
            bead_ids: Vec::new(),
            complexity_budget: budget,
            depends_on: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Attach bead links
    pub fn with_beads(mut self, beads: Vec<String>) -> Self {
        self.bead_ids = beads;
        self
    }

    /// Add one dependency
    pub fn depending_on(mut self, dep: DepRef) -> Self {
        self.depends_on.push(dep);
        self
    }
}
