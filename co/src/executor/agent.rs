//! The agent-spawning executor
//!
//! Spawns the external coding agent as a supervised child process with the
//! rendered prompt, CO_TASK_ID in its environment, and the work's
//! workspace as its working directory. Output streams to a per-task log
//! file; the work's terminal tab tails that log as the user-facing
//! record. The executor never interprets the agent's output - only its
//! exit status.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::TASK_ID_ENV;
use crate::beads::BeadsClient;
use crate::config::AgentConfig;
use crate::prompts::{BeadRef, PromptContext, PromptLibrary};
use crate::terminal::TerminalClient;

use super::{ExecutionOutcome, ExecutionRequest, TaskExecutor};

/// Runs the external coding agent for claimed tasks
pub struct AgentExecutor {
    agent: AgentConfig,
    terminal: TerminalClient,
    prompts: PromptLibrary,
    beads: Option<Arc<dyn BeadsClient>>,
}

impl AgentExecutor {
    /// Create an executor
    pub fn new(agent: AgentConfig, terminal: TerminalClient) -> Result<Self> {
        Ok(Self {
            agent,
            terminal,
            prompts: PromptLibrary::new()?,
            beads: None,
        })
    }

    /// Resolve bead titles through this client when building prompts
    pub fn with_beads_client(mut self, client: Arc<dyn BeadsClient>) -> Self {
        self.beads = Some(client);
        self
    }

    async fn prompt_context(&self, req: &ExecutionRequest<'_>) -> PromptContext {
        let mut beads: Vec<BeadRef> = req
            .bead_ids
            .iter()
            .map(|id| BeadRef {
                id: id.clone(),
                title: None,
            })
            .collect();

        // Titles are decoration; a dead issue tracker must not block
        // execution.
        if let Some(client) = &self.beads
            && !req.bead_ids.is_empty()
        {
            match client.show_issues(req.bead_ids).await {
                Ok(issues) => {
                    for bead in &mut beads {
                        if let Some(issue) = issues.iter().find(|i| i.id == bead.id) {
                            bead.title = Some(issue.title.clone());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "could not resolve bead titles"),
            }
        }

        PromptContext {
            task_id: req.task.id.clone(),
            work_name: req.work.name.clone(),
            branch_name: req.work.branch_name.clone(),
            base_branch: req.work.base_branch.clone(),
            complexity_budget: req.task.complexity_budget,
            beads,
            pr_url: req.work.pr_url.clone(),
            bead_id: None,
            bead_title: None,
        }
    }

    /// Open (or re-open) the work's tab tailing the task log. Best effort:
    /// the execution proceeds without a tab when no multiplexer is around.
    async fn open_log_tab(&self, work_id: &str, log_path: &std::path::Path) {
        if !self.terminal.is_available().await {
            debug!("terminal multiplexer unavailable, skipping tab");
            return;
        }
        let tab = self.terminal.work_tab_name(work_id);
        self.terminal.remove_orphan_tab(&tab).await;
        if let Err(e) = self
            .terminal
            .open_tab_with_command(&tab, &format!("tail -n +1 -f {}", log_path.display()))
            .await
        {
            warn!(tab = %tab, error = %e, "could not open work tab");
        }
    }

    /// Graceful termination: SIGTERM, grace period, SIGKILL
    async fn terminate(&self, mut child: Child) -> ExecutionOutcome {
        if let Some(pid) = child.id() {
            debug!(pid, "sending SIGTERM to agent");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            let grace = Duration::from_millis(self.agent.grace_period_ms);
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!(pid, "agent ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        } else {
            let _ = child.kill().await;
        }
        ExecutionOutcome::Failed {
            error: "interrupted".to_string(),
        }
    }
}

/// Resolve when cancellation is requested; never resolve if the
/// cancellation source went away without requesting it.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl TaskExecutor for AgentExecutor {
    async fn execute(
        &self,
        req: ExecutionRequest<'_>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome> {
        let context = self.prompt_context(&req).await;
        let prompt = self.prompts.render(req.task.kind, &context)?;

        let log_dir = PathBuf::from(&req.work.worktree_path).join(".conductor");
        std::fs::create_dir_all(&log_dir).context("failed to create task log directory")?;
        let log_path = log_dir.join(format!("task-{}.log", req.task.id));
        let log_file = std::fs::File::create(&log_path).context("failed to create task log")?;
        let err_file = log_file.try_clone().context("failed to clone task log handle")?;

        info!(
            task_id = %req.task.id,
            work_id = %req.work.id,
            agent = %self.agent.command,
            log = %log_path.display(),
            "spawning agent"
        );

        let mut child = Command::new(&self.agent.command)
            .args(&self.agent.args)
            .arg(&prompt)
            .current_dir(&req.work.worktree_path)
            .env(TASK_ID_ENV, &req.task.id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .spawn()
            .context(format!("failed to spawn agent '{}'", self.agent.command))?;

        self.open_log_tab(&req.work.id, &log_path).await;

        let status = tokio::select! {
            status = child.wait() => status.context("failed to wait on agent")?,
            _ = cancelled(cancel) => {
                info!(task_id = %req.task.id, "cancellation requested, terminating agent");
                return Ok(self.terminate(child).await);
            }
        };

        if status.success() {
            info!(task_id = %req.task.id, "agent exited cleanly");
            Ok(ExecutionOutcome::Completed { result: None })
        } else {
            let error = match status.code() {
                Some(code) => format!("agent exited with status {}", code),
                None => "agent terminated by signal".to_string(),
            };
            info!(task_id = %req.task.id, error = %error, "agent failed");
            Ok(ExecutionOutcome::Failed { error })
        }
    }
}
