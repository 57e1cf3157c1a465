//! The per-work orchestrator lane
//!
//! A single-threaded cooperative loop. Task claims go through the store's
//! compare-and-set, so even overlapping lanes never double-execute a
//! task; a lost claim means another lane handled it and is skipped
//! silently. Within one lane, tasks execute strictly one at a time.

use std::sync::Arc;

use eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use workstore::{Store, StoreError, Task, TaskStatus, WorkStatus};

use crate::broker::ChangeBroker;
use crate::executor::{ExecutionOutcome, ExecutionRequest, TaskExecutor};
use crate::workflow::{Decision, WorkflowMachine};

use super::config::OrchestratorConfig;

enum RunStatus {
    Done,
    ShutdownRequested,
}

/// Drives one work's tasks to completion
pub struct Orchestrator {
    work_id: String,
    store: Store,
    broker: ChangeBroker,
    executor: Arc<dyn TaskExecutor>,
    machine: WorkflowMachine,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator lane for a work
    pub fn new(
        work_id: impl Into<String>,
        store: Store,
        broker: ChangeBroker,
        executor: Arc<dyn TaskExecutor>,
        machine: WorkflowMachine,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            work_id: work_id.into(),
            store,
            broker,
            executor,
            machine,
            config,
        }
    }

    /// Run the lane until the work finishes or shutdown is requested
    ///
    /// A closed shutdown channel counts as a shutdown request. The lane
    /// never abandons a claimed task: cancellation waits for the in-flight
    /// execution's bookkeeping before exiting.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        // Subscribe before the first query so no change slips between.
        let mut events = self.broker.subscribe();
        info!(work_id = %self.work_id, "orchestrator lane started");

        self.note_orphaned_tasks()?;
        self.seed_initial_tasks()?;

        loop {
            match self.work_pass(&mut shutdown_rx).await {
                Ok(RunStatus::ShutdownRequested) => {
                    info!(work_id = %self.work_id, "orchestrator lane shutting down");
                    return Ok(());
                }
                Ok(RunStatus::Done) => {}
                Err(e) if is_transient(&e) => {
                    // Transient store trouble: back off and retry.
                    warn!(work_id = %self.work_id, error = %e, "transient store failure, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                    continue;
                }
                Err(e) => {
                    error!(work_id = %self.work_id, error = %e, "orchestrator lane failed");
                    if let Err(mark) = self.store.set_work_status(&self.work_id, WorkStatus::Failed) {
                        warn!(work_id = %self.work_id, error = %mark, "could not mark work failed");
                    }
                    return Err(e);
                }
            }

            if self.work_is_finished()? {
                self.store.set_work_status(&self.work_id, WorkStatus::Completed)?;
                info!(work_id = %self.work_id, "work completed");
                return Ok(());
            }

            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => debug!(work_id = %self.work_id, kind = event.kind(), "woke on change"),
                        None => {
                            debug!(work_id = %self.work_id, "broker stopped, lane exiting");
                            return Ok(());
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(work_id = %self.work_id, "orchestrator lane shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// One full pass: drain ready tasks, then plan for stray beads and
    /// drain whatever that scheduled, until the work settles.
    async fn work_pass(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<RunStatus> {
        loop {
            loop {
                let ready = self.store.get_ready_tasks_for_work(&self.work_id)?;
                let Some(task) = ready.into_iter().next() else {
                    break;
                };
                if let RunStatus::ShutdownRequested = self.run_one(&task, shutdown_rx).await? {
                    return Ok(RunStatus::ShutdownRequested);
                }
            }

            // Beads can arrive outside any completion (feedback
            // ingestion); only plan for them while nothing is in flight.
            if !self.has_active_tasks()? {
                let decision = self.machine.plan_for_new_beads(&self.store, &self.work_id)?;
                if !decision.follow_ups.is_empty() {
                    self.apply_decision(decision)?;
                    continue;
                }
            }

            return Ok(RunStatus::Done);
        }
    }

    /// Claim and execute one task, then apply its outcome
    async fn run_one(&self, task: &Task, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<RunStatus> {
        let work = self.store.get_work_required(&self.work_id)?;

        let claimed = match self.store.start_task(&task.id, Some(&work.worktree_path)) {
            Ok(task) => task,
            Err(StoreError::Conflict(_)) => {
                // Another lane won the claim.
                debug!(task_id = %task.id, "claim lost, skipping");
                return Ok(RunStatus::Done);
            }
            Err(e) => return Err(e.into()),
        };
        self.store.set_work_status(&self.work_id, WorkStatus::Processing)?;

        let bead_ids: Vec<String> = self
            .store
            .get_task_beads(&claimed.id)?
            .into_iter()
            .map(|b| b.bead_id)
            .collect();

        info!(task_id = %claimed.id, kind = %claimed.kind, "executing task");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let request = ExecutionRequest {
            work: &work,
            task: &claimed,
            bead_ids: &bead_ids,
        };
        let execution = self.executor.execute(request, cancel_rx);
        tokio::pin!(execution);

        let mut shutdown_requested = false;
        let outcome = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = shutdown_rx.recv(), if !shutdown_requested => {
                    // Finish the in-flight task's bookkeeping, never
                    // abandon it in processing.
                    shutdown_requested = true;
                    let _ = cancel_tx.send(true);
                }
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::Failed {
                error: format!("executor error: {:#}", e),
            },
        };
        self.apply_outcome(&claimed, outcome)?;

        Ok(if shutdown_requested {
            RunStatus::ShutdownRequested
        } else {
            RunStatus::Done
        })
    }

    /// Record the outcome and run the workflow machine on completions
    ///
    /// The agent may already have reported through the CLI; the resulting
    /// CAS conflict is resolved in favor of whatever the store says.
    fn apply_outcome(&self, task: &Task, outcome: ExecutionOutcome) -> Result<()> {
        let current = match outcome {
            ExecutionOutcome::Completed { result } => {
                match self.store.complete_task(&task.id, result.as_deref(), None) {
                    Ok(task) => task,
                    Err(StoreError::Conflict(_)) => self.store.get_task_required(&task.id)?,
                    Err(e) => return Err(e.into()),
                }
            }
            ExecutionOutcome::Failed { error } => match self.store.fail_task(&task.id, &error) {
                Ok(task) => task,
                Err(StoreError::Conflict(_)) => self.store.get_task_required(&task.id)?,
                Err(e) => return Err(e.into()),
            },
        };

        match current.status {
            TaskStatus::Completed => {
                let decision = self.machine.on_task_complete(&self.store, &current)?;
                self.apply_decision(decision)?;
            }
            TaskStatus::Failed => {
                // No automatic follow-up; the operator resets to retry.
                warn!(
                    task_id = %current.id,
                    error = current.error_message.as_deref().unwrap_or("unknown"),
                    "task failed"
                );
            }
            other => {
                warn!(task_id = %current.id, status = %other, "task left in non-terminal state");
            }
        }
        Ok(())
    }

    /// Persist a workflow decision in one transaction
    fn apply_decision(&self, decision: Decision) -> Result<()> {
        if let Some(url) = &decision.pr_url {
            self.store.set_work_pr_url(&self.work_id, url)?;
        }
        if decision.review_limit_reached {
            warn!(work_id = %self.work_id, "review iteration limit reached, not scheduling another review");
        }
        if !decision.follow_ups.is_empty() {
            let created = self.store.create_follow_ups(&self.work_id, &decision.follow_ups)?;
            for task in &created {
                debug!(task_id = %task.id, kind = %task.kind, "follow-up task created");
            }
        }
        Ok(())
    }

    /// First-start seeding: partition the work's beads into implement
    /// tasks. A work that already has tasks is resuming, not starting.
    fn seed_initial_tasks(&self) -> Result<()> {
        if !self.store.get_work_tasks(&self.work_id)?.is_empty() {
            return Ok(());
        }
        let beads = self.store.get_work_beads(&self.work_id)?;
        if beads.is_empty() {
            return Ok(());
        }

        let specs = self.machine.initial_tasks(&beads);
        let created = self.store.create_follow_ups(&self.work_id, &specs)?;
        info!(work_id = %self.work_id, count = created.len(), "seeded implement tasks");
        Ok(())
    }

    /// Tasks stuck in processing from a dead owner are surfaced, not
    /// auto-reset: resetting here could double-execute work a live owner
    /// still holds. The operator decides via `co task reset`.
    fn note_orphaned_tasks(&self) -> Result<()> {
        for task in self.store.get_work_tasks(&self.work_id)? {
            if task.status == TaskStatus::Processing {
                warn!(
                    task_id = %task.id,
                    "task already processing at startup; reset it manually if its owner is gone"
                );
            }
        }
        Ok(())
    }

    fn has_active_tasks(&self) -> Result<bool> {
        Ok(self
            .store
            .get_work_tasks(&self.work_id)?
            .iter()
            .any(|t| t.is_active()))
    }

    /// Finished = every task terminal, none failed, no bead waiting for a
    /// task. An empty work is finished immediately.
    fn work_is_finished(&self) -> Result<bool> {
        let tasks = self.store.get_work_tasks(&self.work_id)?;
        if tasks.iter().any(|t| !t.is_terminal()) {
            return Ok(false);
        }
        if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            return Ok(false);
        }
        Ok(self.store.get_unassigned_work_beads(&self.work_id)?.is_empty())
    }
}

fn is_transient(e: &eyre::Report) -> bool {
    matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Database(_)))
}
