//! The workflow machine
//!
//! The orchestrator calls `on_task_complete` after every completion and
//! persists the returned follow-ups in one transaction. The machine reads
//! store snapshots but never writes, so the whole policy is testable
//! against a scratch store with zero external processes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use workstore::{
    AUTO_WORKFLOW, DepRef, NewTask, Store, StoreResult, Task, TaskKind, TaskStatus, WorkBead,
};

use crate::graph::partition_beads_into_tasks;

/// Workflow tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Maximum review tasks per work, counting completed and failed ones.
    /// At the limit the machine refuses to create another review and
    /// reports it instead.
    #[serde(rename = "max-review-iterations")]
    pub max_review_iterations: u32,

    /// Complexity budget given to follow-up tasks
    #[serde(rename = "default-complexity-budget")]
    pub default_complexity_budget: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_review_iterations: 5,
            default_complexity_budget: 2,
        }
    }
}

/// What the machine decided after a completion
#[derive(Debug, Default)]
pub struct Decision {
    /// Tasks to persist (atomically, with their edges)
    pub follow_ups: Vec<NewTask>,
    /// PR URL to record on the work
    pub pr_url: Option<String>,
    /// The review iteration limit blocked a review creation
    pub review_limit_reached: bool,
}

impl Decision {
    fn none() -> Self {
        Self::default()
    }

    /// True when the decision changes nothing
    pub fn is_empty(&self) -> bool {
        self.follow_ups.is_empty() && self.pr_url.is_none() && !self.review_limit_reached
    }
}

/// Declarative task-completion rules
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    config: WorkflowConfig,
}

impl WorkflowMachine {
    /// Create a machine with the given configuration
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Initial implement tasks for a freshly started work
    ///
    /// Pure: one task per bead group, in assignment order.
    pub fn initial_tasks(&self, beads: &[WorkBead]) -> Vec<NewTask> {
        partition_beads_into_tasks(beads)
            .into_iter()
            .map(|group| {
                NewTask::new(TaskKind::Implement, self.config.default_complexity_budget)
                    .with_beads(group)
            })
            .collect()
    }

    /// Apply the completion rules for one task
    pub fn on_task_complete(&self, store: &Store, task: &Task) -> StoreResult<Decision> {
        debug!(task_id = %task.id, kind = %task.kind, "workflow: task completed");
        match task.kind {
            TaskKind::Implement => self.after_implement(store, task),
            TaskKind::Review => self.after_review(store, task),
            TaskKind::Pr => Ok(Decision {
                pr_url: task.pr_url.clone(),
                ..Decision::default()
            }),
            TaskKind::UpdatePrDescription | TaskKind::Estimate => Ok(Decision::none()),
        }
    }

    /// Plan work for beads that arrived outside any task completion
    /// (feedback ingestion against a finished work). Produces implement
    /// tasks plus a chained review; the later update-pr-description falls
    /// out of that review's own completion.
    pub fn plan_for_new_beads(&self, store: &Store, work_id: &str) -> StoreResult<Decision> {
        let unassigned = store.get_unassigned_work_beads(work_id)?;
        if unassigned.is_empty() {
            return Ok(Decision::none());
        }
        self.review_fix_plan(store, work_id, &unassigned)
    }

    /// implement completed: once every implement of the work is completed
    /// and no review is live, chain a review over all of them.
    fn after_implement(&self, store: &Store, task: &Task) -> StoreResult<Decision> {
        let tasks = store.get_work_tasks(&task.work_id)?;

        let implements: Vec<&Task> = tasks.iter().filter(|t| t.kind == TaskKind::Implement).collect();
        let all_done = implements.iter().all(|t| t.status == TaskStatus::Completed);
        if !all_done {
            debug!(work_id = %task.work_id, "workflow: implements still outstanding");
            return Ok(Decision::none());
        }

        let review_live = tasks
            .iter()
            .any(|t| t.kind == TaskKind::Review && t.is_active());
        if review_live {
            debug!(work_id = %task.work_id, "workflow: a review is already live");
            return Ok(Decision::none());
        }

        if self.review_limit_hit(&tasks, &task.work_id) {
            return Ok(Decision {
                review_limit_reached: true,
                ..Decision::default()
            });
        }

        let review = implements.iter().fold(
            NewTask::new(TaskKind::Review, self.config.default_complexity_budget),
            |spec, t| spec.depending_on(DepRef::Existing(t.id.clone())),
        );
        info!(work_id = %task.work_id, "workflow: scheduling review over implements");
        Ok(Decision {
            follow_ups: vec![review],
            ..Decision::default()
        })
    }

    /// review completed: manual reviews stop the workflow; automated ones
    /// either loop back into implement+review (new beads) or move the PR
    /// forward (none).
    fn after_review(&self, store: &Store, task: &Task) -> StoreResult<Decision> {
        let auto = store.get_task_metadata(&task.id, AUTO_WORKFLOW)?;
        if auto == "false" {
            info!(task_id = %task.id, "workflow: manual review, no follow-up");
            return Ok(Decision::none());
        }

        // Beads recorded by the review take precedence over its verdict.
        let unassigned = store.get_unassigned_work_beads(&task.work_id)?;
        if !unassigned.is_empty() {
            return self.review_fix_plan(store, &task.work_id, &unassigned);
        }

        match store.get_pr_task_for_work(&task.work_id)? {
            None => {
                info!(work_id = %task.work_id, "workflow: scheduling pr task");
                let pr = NewTask::new(TaskKind::Pr, self.config.default_complexity_budget)
                    .depending_on(DepRef::Existing(task.id.clone()));
                Ok(Decision {
                    follow_ups: vec![pr],
                    ..Decision::default()
                })
            }
            Some(pr) if pr.status == TaskStatus::Completed => {
                info!(work_id = %task.work_id, "workflow: scheduling pr description update");
                let update =
                    NewTask::new(TaskKind::UpdatePrDescription, self.config.default_complexity_budget)
                        .depending_on(DepRef::Existing(task.id.clone()));
                Ok(Decision {
                    follow_ups: vec![update],
                    ..Decision::default()
                })
            }
            Some(pr) => {
                // A pr task is already pending or processing; this review
                // adds nothing for the PR branch.
                debug!(work_id = %task.work_id, pr_task = %pr.id, "workflow: pr task already live");
                Ok(Decision::none())
            }
        }
    }

    /// The review-fix loop: implement tasks per bead group plus one review
    /// chained onto all of them. Refuses entirely at the iteration limit.
    fn review_fix_plan(
        &self,
        store: &Store,
        work_id: &str,
        unassigned: &[WorkBead],
    ) -> StoreResult<Decision> {
        let tasks = store.get_work_tasks(work_id)?;
        if self.review_limit_hit(&tasks, work_id) {
            return Ok(Decision {
                review_limit_reached: true,
                ..Decision::default()
            });
        }

        let groups = partition_beads_into_tasks(unassigned);
        let mut follow_ups: Vec<NewTask> = groups
            .into_iter()
            .map(|group| {
                NewTask::new(TaskKind::Implement, self.config.default_complexity_budget)
                    .with_beads(group)
            })
            .collect();

        let review = (0..follow_ups.len()).fold(
            NewTask::new(TaskKind::Review, self.config.default_complexity_budget),
            |spec, i| spec.depending_on(DepRef::InBatch(i)),
        );
        follow_ups.push(review);

        info!(
            work_id,
            implements = follow_ups.len() - 1,
            "workflow: review-fix loop scheduled"
        );
        Ok(Decision {
            follow_ups,
            ..Decision::default()
        })
    }

    fn review_limit_hit(&self, tasks: &[Task], work_id: &str) -> bool {
        let review_count = tasks.iter().filter(|t| t.kind == TaskKind::Review).count();
        if review_count >= self.config.max_review_iterations as usize {
            warn!(
                work_id,
                review_count,
                limit = self.config.max_review_iterations,
                "workflow: review iteration limit reached"
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use workstore::{Work, task_id};

    fn open_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("state.db")).unwrap();
        (store, dir)
    }

    fn seed_work(store: &Store, id: &str) {
        store
            .create_work(&Work::new(id, "Test", format!("/tmp/{id}"), "feature/x", "main"))
            .unwrap();
    }

    fn machine() -> WorkflowMachine {
        WorkflowMachine::new(WorkflowConfig::default())
    }

    fn create(store: &Store, work: &str, kind: TaskKind, beads: &[&str]) -> Task {
        let n = store.next_task_number(work).unwrap();
        let beads: Vec<String> = beads.iter().map(|b| b.to_string()).collect();
        store.create_task(&task_id(work, n), kind, &beads, 1, work).unwrap()
    }

    fn run_to_completion(store: &Store, id: &str, result: Option<&str>) -> Task {
        store.start_task(id, None).unwrap();
        store.complete_task(id, result, None).unwrap()
    }

    /// Persist a decision the way the orchestrator does
    fn apply(store: &Store, work: &str, decision: &Decision) -> Vec<Task> {
        if let Some(url) = &decision.pr_url {
            store.set_work_pr_url(work, url).unwrap();
        }
        store.create_follow_ups(work, &decision.follow_ups).unwrap()
    }

    #[test]
    fn test_initial_tasks_from_bead_groups() {
        let m = machine();
        let beads = vec![
            WorkBead { work_id: "w-1".into(), bead_id: "b1".into(), group_id: 0, ordinal: 0 },
            WorkBead { work_id: "w-1".into(), bead_id: "b2".into(), group_id: 1, ordinal: 1 },
            WorkBead { work_id: "w-1".into(), bead_id: "b3".into(), group_id: 1, ordinal: 2 },
        ];
        let tasks = m.initial_tasks(&beads);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].bead_ids, vec!["b1"]);
        assert_eq!(tasks[1].bead_ids, vec!["b2", "b3"]);
        assert!(tasks.iter().all(|t| t.kind == TaskKind::Implement));
    }

    #[test]
    fn test_basic_chain_implement_review_pr() {
        // Scenario: one bead, one implement, automated review, pr.
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        store.add_work_bead("w-1", "b1", 0, -1).unwrap();
        let m = machine();

        let implement = store
            .create_task("w-1.1", TaskKind::Implement, &["b1".to_string()], 1, "w-1")
            .unwrap();
        let done = run_to_completion(&store, &implement.id, None);

        // implement -> review
        let decision = m.on_task_complete(&store, &done).unwrap();
        let created = apply(&store, "w-1", &decision);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, TaskKind::Review);
        assert_eq!(created[0].id, "w-1.2");
        assert_eq!(
            store.get_task_dependencies("w-1.2").unwrap(),
            vec!["w-1.1".to_string()]
        );

        // review (no new beads) -> pr
        let review = run_to_completion(&store, "w-1.2", None);
        let decision = m.on_task_complete(&store, &review).unwrap();
        let created = apply(&store, "w-1", &decision);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, TaskKind::Pr);
        assert_eq!(created[0].id, "w-1.3");

        // pr -> record url, nothing else
        let pr = run_to_completion(&store, "w-1.3", Some("https://example/pr/1"));
        let decision = m.on_task_complete(&store, &pr).unwrap();
        assert_eq!(decision.pr_url.as_deref(), Some("https://example/pr/1"));
        assert!(decision.follow_ups.is_empty());
        apply(&store, "w-1", &decision);

        let work = store.get_work("w-1").unwrap().unwrap();
        assert_eq!(work.pr_url.as_deref(), Some("https://example/pr/1"));
        assert_eq!(store.get_work_tasks("w-1").unwrap().len(), 3);
    }

    #[test]
    fn test_implement_waits_for_siblings() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        let a = create(&store, "w-1", TaskKind::Implement, &["b1"]);
        let _b = create(&store, "w-1", TaskKind::Implement, &["b2"]);

        let done = run_to_completion(&store, &a.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        assert!(decision.is_empty());
    }

    #[test]
    fn test_no_second_review_while_one_is_live() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        let a = create(&store, "w-1", TaskKind::Implement, &["b1"]);
        let _review = create(&store, "w-1", TaskKind::Review, &[]);

        let done = run_to_completion(&store, &a.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        assert!(decision.is_empty());
    }

    #[test]
    fn test_manual_review_short_circuit() {
        // Scenario: auto_workflow=false review produces nothing.
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        let implement = create(&store, "w-1", TaskKind::Implement, &["b1"]);
        run_to_completion(&store, &implement.id, None);

        let review = create(&store, "w-1", TaskKind::Review, &[]);
        store.set_task_metadata(&review.id, AUTO_WORKFLOW, "false").unwrap();
        // Even with unassigned beads present, a manual review stops here.
        store.add_work_bead("w-1", "b-new", 0, -1).unwrap();

        let done = run_to_completion(&store, &review.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        assert!(decision.is_empty());
        assert_eq!(store.get_work_tasks("w-1").unwrap().len(), 2);
    }

    #[test]
    fn test_review_fix_loop_and_single_pr_across_history() {
        // Scenario: pr completed, feedback beads arrive, the loop chains
        // implement -> review -> update-pr-description with exactly one pr
        // task across the whole history.
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        store.add_work_bead("w-1", "b1", 0, -1).unwrap();
        let m = machine();

        let implement = store
            .create_task("w-1.1", TaskKind::Implement, &["b1".to_string()], 1, "w-1")
            .unwrap();
        let done = run_to_completion(&store, &implement.id, None);
        apply(&store, "w-1", &m.on_task_complete(&store, &done).unwrap());

        let review = run_to_completion(&store, "w-1.2", None);
        apply(&store, "w-1", &m.on_task_complete(&store, &review).unwrap());

        let pr = run_to_completion(&store, "w-1.3", Some("https://example/pr/1"));
        apply(&store, "w-1", &m.on_task_complete(&store, &pr).unwrap());

        // Feedback attaches b2; planning for it yields implement + review.
        store.add_work_bead("w-1", "b2", 0, -1).unwrap();
        let decision = m.plan_for_new_beads(&store, "w-1").unwrap();
        let created = apply(&store, "w-1", &decision);
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].kind, TaskKind::Implement);
        assert_eq!(created[0].id, "w-1.4");
        assert_eq!(created[1].kind, TaskKind::Review);
        assert_eq!(created[1].id, "w-1.5");
        assert_eq!(
            store.get_task_dependencies("w-1.5").unwrap(),
            vec!["w-1.4".to_string()]
        );

        // The loop's review completes clean: update-pr-description because
        // a completed pr task exists.
        run_to_completion(&store, "w-1.4", None);
        let review2 = run_to_completion(&store, "w-1.5", None);
        let decision = m.on_task_complete(&store, &review2).unwrap();
        let created = apply(&store, "w-1", &decision);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, TaskKind::UpdatePrDescription);
        assert_eq!(created[0].id, "w-1.6");

        let pr_tasks: Vec<_> = store
            .get_work_tasks("w-1")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TaskKind::Pr)
            .collect();
        assert_eq!(pr_tasks.len(), 1);
    }

    #[test]
    fn test_review_with_new_beads_loops_back() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        let review = create(&store, "w-1", TaskKind::Review, &[]);
        store.add_work_bead("w-1", "b2", 0, -1).unwrap();
        store.add_work_bead("w-1", "b3", 0, -1).unwrap();

        let done = run_to_completion(&store, &review.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        let created = apply(&store, "w-1", &decision);

        // One implement per ungrouped bead, plus the chained review
        assert_eq!(created.len(), 3);
        assert_eq!(created[0].kind, TaskKind::Implement);
        assert_eq!(created[1].kind, TaskKind::Implement);
        assert_eq!(created[2].kind, TaskKind::Review);
        let review_deps = store.get_task_dependencies(&created[2].id).unwrap();
        assert_eq!(review_deps.len(), 2);
    }

    #[test]
    fn test_review_completion_with_live_pr_creates_nothing() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        let _pr = create(&store, "w-1", TaskKind::Pr, &[]);
        let review = create(&store, "w-1", TaskKind::Review, &[]);

        let done = run_to_completion(&store, &review.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        assert!(decision.is_empty());
    }

    #[test]
    fn test_review_iteration_limit() {
        // Scenario: at the limit, the next review creation is refused and
        // nothing is inserted.
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = WorkflowMachine::new(WorkflowConfig {
            max_review_iterations: 2,
            ..WorkflowConfig::default()
        });

        let implement = create(&store, "w-1", TaskKind::Implement, &["b1"]);
        for _ in 0..2 {
            let r = create(&store, "w-1", TaskKind::Review, &[]);
            run_to_completion(&store, &r.id, None);
        }

        let before = store.get_work_tasks("w-1").unwrap().len();
        let done = run_to_completion(&store, &implement.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();

        assert!(decision.review_limit_reached);
        assert!(decision.follow_ups.is_empty());
        assert_eq!(store.get_work_tasks("w-1").unwrap().len(), before);
    }

    #[test]
    fn test_review_limit_blocks_fix_loop_entirely() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = WorkflowMachine::new(WorkflowConfig {
            max_review_iterations: 1,
            ..WorkflowConfig::default()
        });

        let review = create(&store, "w-1", TaskKind::Review, &[]);
        store.add_work_bead("w-1", "b2", 0, -1).unwrap();

        let done = run_to_completion(&store, &review.id, None);
        let decision = m.on_task_complete(&store, &done).unwrap();
        assert!(decision.review_limit_reached);
        assert!(decision.follow_ups.is_empty());
    }

    #[test]
    fn test_update_pr_description_and_estimate_are_terminal() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let m = machine();

        for kind in [TaskKind::UpdatePrDescription, TaskKind::Estimate] {
            let task = create(&store, "w-1", kind, &[]);
            let done = run_to_completion(&store, &task.id, None);
            let decision = m.on_task_complete(&store, &done).unwrap();
            assert!(decision.is_empty(), "{kind} should be terminal");
        }
    }

    #[test]
    fn test_plan_for_new_beads_without_beads_is_empty() {
        let (store, _dir) = open_store();
        seed_work(&store, "w-1");
        let decision = machine().plan_for_new_beads(&store, "w-1").unwrap();
        assert!(decision.is_empty());
    }
}
