//! End-to-end engine tests: store + watcher + broker + orchestrator +
//! workflow machine wired together the way `co orchestrate` wires them,
//! with a fake executor standing in for the agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::{mpsc, watch};

use conductor::broker::ChangeBroker;
use conductor::executor::{ExecutionOutcome, ExecutionRequest, TaskExecutor};
use conductor::orchestrator::{Orchestrator, OrchestratorConfig};
use conductor::watcher::{StoreWatcher, WatcherConfig};
use conductor::workflow::{WorkflowConfig, WorkflowMachine};
use workstore::{Store, TaskKind, TaskStatus, Work, WorkStatus, task_id};

struct ScriptedExecutor;

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        req: ExecutionRequest<'_>,
        _cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome> {
        let result = match req.task.kind {
            TaskKind::Pr => Some("https://example/pr/1".to_string()),
            _ => None,
        };
        Ok(ExecutionOutcome::Completed { result })
    }
}

fn seed_work(store: &Store, id: &str) {
    store
        .create_work(&Work::new(id, "Engine test", format!("/tmp/{id}"), "feature/x", "main"))
        .unwrap();
}

fn build_orchestrator(store: &Store, broker: &ChangeBroker, work_id: &str) -> Orchestrator {
    Orchestrator::new(
        work_id,
        store.clone(),
        broker.clone(),
        Arc::new(ScriptedExecutor),
        WorkflowMachine::new(WorkflowConfig::default()),
        OrchestratorConfig::default(),
    )
}

#[tokio::test]
async fn external_write_wakes_the_lane_through_the_watcher() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");
    let store = Store::open(&db_path).unwrap();
    seed_work(&store, "w-1");

    // A failed task parks the lane waiting for operator action.
    store.create_task("w-1.1", TaskKind::Implement, &[], 1, "w-1").unwrap();
    store.start_task("w-1.1", None).unwrap();
    store.fail_task("w-1.1", "first try failed").unwrap();

    let broker = ChangeBroker::new();
    let (watcher_stop_tx, watcher_stop_rx) = mpsc::channel(1);
    let watcher = StoreWatcher::new(
        WatcherConfig {
            poll_interval_ms: 20,
            debounce_ms: 5,
        },
        &db_path,
        broker.clone(),
    );
    let watcher_lane = tokio::spawn(watcher.run(watcher_stop_rx));

    let orchestrator = build_orchestrator(&store, &broker, "w-1");
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let lane = tokio::spawn(orchestrator.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(150)).await;

    // "Another process" resets the task: a second store handle over the
    // same file, no broker publish of our own. The watcher must notice.
    let other_process = Store::open(&db_path).unwrap();
    other_process.reset_task("w-1.1").unwrap();

    tokio::time::timeout(Duration::from_secs(10), lane)
        .await
        .expect("lane should wake and finish")
        .unwrap()
        .unwrap();

    let work = store.get_work("w-1").unwrap().unwrap();
    assert_eq!(work.status, WorkStatus::Completed);
    let tasks = store.get_work_tasks("w-1").unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    let _ = watcher_stop_tx.send(()).await;
    broker.stop();
    let _ = watcher_lane.await;
}

#[tokio::test]
async fn failed_pr_task_can_be_retried_through_a_new_review() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Store::open(dir.path().join("state.db")).unwrap();
    seed_work(&store, "w-1");

    // History: a pr task that failed on push.
    let n = store.next_task_number("w-1").unwrap();
    let pr = store
        .create_task(&task_id("w-1", n), TaskKind::Pr, &[], 1, "w-1")
        .unwrap();
    store.start_task(&pr.id, None).unwrap();
    store.fail_task(&pr.id, "push rejected").unwrap();
    assert!(store.get_pr_task_for_work("w-1").unwrap().is_none());

    // A fresh review completing must yield a NEW pr task, not be blocked
    // by the failed one.
    let n = store.next_task_number("w-1").unwrap();
    let review = store
        .create_task(&task_id("w-1", n), TaskKind::Review, &[], 1, "w-1")
        .unwrap();
    store.start_task(&review.id, None).unwrap();
    let review = store.complete_task(&review.id, None, None).unwrap();

    let machine = WorkflowMachine::new(WorkflowConfig::default());
    let decision = machine.on_task_complete(&store, &review).unwrap();
    let created = store.create_follow_ups("w-1", &decision.follow_ups).unwrap();

    assert_eq!(created.len(), 1);
    assert_eq!(created[0].kind, TaskKind::Pr);
    assert_ne!(created[0].id, pr.id);

    let active = store.get_pr_task_for_work("w-1").unwrap().unwrap();
    assert_eq!(active.id, created[0].id);
}

#[tokio::test]
async fn diamond_dependencies_execute_in_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Store::open(dir.path().join("state.db")).unwrap();
    seed_work(&store, "w-1");

    // A and B fan into C, C into D.
    for kind in [
        TaskKind::Implement,
        TaskKind::Implement,
        TaskKind::Review,
        TaskKind::Pr,
    ] {
        let n = store.next_task_number("w-1").unwrap();
        store.create_task(&task_id("w-1", n), kind, &[], 1, "w-1").unwrap();
    }
    store.add_task_dependency("w-1.3", "w-1.1").unwrap();
    store.add_task_dependency("w-1.3", "w-1.2").unwrap();
    store.add_task_dependency("w-1.4", "w-1.3").unwrap();

    let broker = ChangeBroker::new();
    let orchestrator = build_orchestrator(&store, &broker, "w-1");
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::time::timeout(Duration::from_secs(10), orchestrator.run(shutdown_rx))
        .await
        .expect("lane should finish")
        .unwrap();

    let tasks = store.get_work_tasks("w-1").unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    // Completion order respects the diamond: C after A and B, D after C.
    let completed_at = |id: &str| {
        tasks
            .iter()
            .find(|t| t.id == id)
            .and_then(|t| t.completed_at)
            .unwrap()
    };
    assert!(completed_at("w-1.3") >= completed_at("w-1.1"));
    assert!(completed_at("w-1.3") >= completed_at("w-1.2"));
    assert!(completed_at("w-1.4") >= completed_at("w-1.3"));
}

#[tokio::test]
async fn shutdown_mid_work_leaves_no_processing_tasks() {
    struct SlowExecutor;

    #[async_trait]
    impl TaskExecutor for SlowExecutor {
        async fn execute(
            &self,
            _req: ExecutionRequest<'_>,
            mut cancel: watch::Receiver<bool>,
        ) -> Result<ExecutionOutcome> {
            // Simulates a long agent run that honors cancellation.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    Ok(ExecutionOutcome::Completed { result: None })
                }
                _ = cancel.changed() => {
                    Ok(ExecutionOutcome::Failed { error: "interrupted".to_string() })
                }
            }
        }
    }

    let dir = tempfile::TempDir::new().unwrap();
    let store = Store::open(dir.path().join("state.db")).unwrap();
    seed_work(&store, "w-1");
    store.add_work_bead("w-1", "b1", 0, -1).unwrap();

    let broker = ChangeBroker::new();
    let orchestrator = Orchestrator::new(
        "w-1",
        store.clone(),
        broker.clone(),
        Arc::new(SlowExecutor),
        WorkflowMachine::new(WorkflowConfig::default()),
        OrchestratorConfig::default(),
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let lane = tokio::spawn(orchestrator.run(shutdown_rx));

    // Wait until the task is claimed, then request shutdown.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tasks = store.get_work_tasks("w-1").unwrap();
        if tasks.first().is_some_and(|t| t.status == TaskStatus::Processing) {
            break;
        }
    }
    shutdown_tx.send(()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), lane)
        .await
        .expect("lane should exit promptly on shutdown")
        .unwrap()
        .unwrap();

    // The in-flight task was failed, never abandoned in processing.
    let tasks = store.get_work_tasks("w-1").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].error_message.as_deref(), Some("interrupted"));
}
