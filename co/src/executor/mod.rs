//! Task execution
//!
//! The executor is the engine's only side-effecting component: it renders
//! a kind-specific prompt, spawns the external coding agent in the work's
//! terminal tab, and translates the exit into an outcome. Everything else
//! in the engine is testable with an in-memory fake of [`TaskExecutor`].

mod agent;

pub use agent::AgentExecutor;

use async_trait::async_trait;
use tokio::sync::watch;
use workstore::{Task, Work};

/// How one agent invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The agent exited cleanly; `result` carries an artifact (e.g. a PR
    /// URL) when the executor learned one directly. Agents usually report
    /// artifacts themselves through `co task complete`.
    Completed { result: Option<String> },
    /// Non-zero exit, missing tool, or cancellation
    Failed { error: String },
}

/// Everything an executor needs about the claimed task
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub work: &'a Work,
    pub task: &'a Task,
    pub bead_ids: &'a [String],
}

/// The seam between the orchestrator and the outside world
///
/// `cancel` flips to true when the lane is shutting down; implementations
/// terminate the agent gracefully and report the task as interrupted.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        req: ExecutionRequest<'_>,
        cancel: watch::Receiver<bool>,
    ) -> eyre::Result<ExecutionOutcome>;
}
