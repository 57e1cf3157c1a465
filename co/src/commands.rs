//! Subcommand implementations
//!
//! The CLI layer builds components from the loaded configuration and
//! delegates here; every function returns an error for the process exit
//! code to reflect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use eyre::{Context, Result, eyre};
use tokio::sync::mpsc;
use tracing::{info, warn};

use workstore::{Store, TaskFilter, TaskKind, TaskStatus, Work, WorkStatus, generate_work_id};

use crate::TASK_ID_ENV;
use crate::beads::CliBeadsClient;
use crate::broker::ChangeBroker;
use crate::config::Config;
use crate::executor::AgentExecutor;
use crate::feedback::{FeedbackIngestor, FeedbackSource, GhFeedbackSource};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::prompts::{PromptContext, PromptLibrary};
use crate::terminal::TerminalClient;
use crate::watcher::StoreWatcher;
use crate::workflow::WorkflowMachine;
use crate::workspace::Workspaces;

fn open_store(config: &Config) -> Result<Store> {
    Ok(Store::open(&config.storage.store_path)?)
}

fn status_colored(status: &str) -> String {
    match status {
        "pending" => status.yellow().to_string(),
        "processing" => status.blue().to_string(),
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        other => other.to_string(),
    }
}

/// `co orchestrate --work <id>`
pub async fn orchestrate(config: &Config, work_id: &str) -> Result<()> {
    let store = open_store(config)?;
    store.get_work_required(work_id)?;

    let broker = ChangeBroker::new();

    // Watcher lane: external writes (CLI callbacks, feedback ingestion
    // from another process) wake the orchestrator through the broker.
    let (watcher_shutdown_tx, watcher_shutdown_rx) = mpsc::channel(1);
    let watcher = StoreWatcher::new(config.watcher.clone(), store.path(), broker.clone());
    let watcher_lane = tokio::spawn(watcher.run(watcher_shutdown_rx));

    let beads = Arc::new(CliBeadsClient::new(config.beads.clone()));
    let executor = AgentExecutor::new(
        config.agent.clone(),
        TerminalClient::new(config.terminal.clone()),
    )?
    .with_beads_client(beads);

    let orchestrator = Orchestrator::new(
        work_id,
        store,
        broker.clone(),
        Arc::new(executor),
        WorkflowMachine::new(config.workflow.clone()),
        OrchestratorConfig::default(),
    );

    // Ctrl-C cascades into the lane's shutdown channel.
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let result = orchestrator.run(shutdown_rx).await;

    let _ = watcher_shutdown_tx.send(()).await;
    broker.stop();
    let _ = watcher_lane.await;

    result
}

/// `co work create`
#[allow(clippy::too_many_arguments)]
pub async fn work_create(
    config: &Config,
    name: &str,
    branch: &str,
    base: &str,
    issue: Option<&str>,
    path: Option<PathBuf>,
    group: i64,
    beads: &[String],
) -> Result<()> {
    let store = open_store(config)?;
    let id = generate_work_id(name);

    let worktree_path = match path {
        Some(path) => path,
        None => {
            let workspaces = Workspaces::new(config.git.clone(), std::env::current_dir()?);
            workspaces
                .create(&id, branch, base)
                .await
                .context("workspace provisioning failed")?
        }
    };

    let mut work = Work::new(&id, name, worktree_path.to_string_lossy(), branch, base);
    if let Some(issue) = issue {
        work = work.with_root_issue(issue);
    }
    store.create_work(&work)?;

    for bead in beads {
        store.add_work_bead(&id, bead, group, -1)?;
    }

    println!("{} {}", "created".green(), id);
    Ok(())
}

/// `co work list`
pub fn work_list(config: &Config, status: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let filter = status.map(|s| s.parse::<WorkStatus>()).transpose().map_err(|e| eyre!(e))?;

    for work in store.list_works(filter)? {
        println!(
            "{:<28} {:<12} {:<24} {}",
            work.id,
            status_colored(&work.status.to_string()),
            work.branch_name,
            work.pr_url.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// `co work show <id>`
pub fn work_show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let work = store.get_work_required(id)?;

    println!("{}: {}", "work".bold(), work.id);
    println!("  name:      {}", work.name);
    println!("  status:    {}", status_colored(&work.status.to_string()));
    println!("  branch:    {} (base {})", work.branch_name, work.base_branch);
    println!("  workspace: {}", work.worktree_path);
    if let Some(issue) = &work.root_issue_id {
        println!("  issue:     {}", issue);
    }
    if let Some(url) = &work.pr_url {
        println!("  pr:        {}", url);
    }

    let tasks = store.get_work_tasks(id)?;
    if !tasks.is_empty() {
        println!("{}:", "tasks".bold());
        for task in &tasks {
            println!(
                "  {:<16} {:<24} {}",
                task.id,
                task.kind.to_string(),
                status_colored(&task.status.to_string())
            );
        }
    }

    let beads = store.get_work_beads(id)?;
    if !beads.is_empty() {
        println!("{}:", "beads".bold());
        for bead in &beads {
            println!("  {:<24} group {}", bead.bead_id, bead.group_id);
        }
    }
    Ok(())
}

/// `co work destroy <id>`
pub async fn work_destroy(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    store.get_work_required(id)?;

    let workspaces = Workspaces::new(config.git.clone(), std::env::current_dir()?);
    if let Err(e) = workspaces.remove(id).await {
        warn!(work_id = %id, error = %e, "workspace removal failed, continuing");
    }

    store.destroy_work(id)?;
    println!("{} {}", "destroyed".red(), id);
    Ok(())
}

/// `co work feedback`
pub async fn work_feedback(
    config: &Config,
    id: Option<&str>,
    dry_run: bool,
    auto_add: bool,
    min_priority: Option<u8>,
) -> Result<()> {
    let store = open_store(config)?;
    let work = resolve_feedback_work(&store, id)?;
    let min_priority = min_priority.unwrap_or(config.feedback.min_priority);

    let source: Arc<dyn FeedbackSource> =
        Arc::new(GhFeedbackSource::new(config.feedback.command.clone()));

    if !dry_run && !auto_add {
        // Pure report: fetch and show actionable items without writing.
        let pr_url = work
            .pr_url
            .clone()
            .ok_or_else(|| eyre!("work {} has no PR URL to poll", work.id))?;
        let items = source.fetch(&pr_url).await?;
        if items.is_empty() {
            println!("no actionable feedback on {}", pr_url);
            return Ok(());
        }
        for item in items {
            let seen = store.has_existing_feedback(&work.id, &item.title, &item.source)?;
            let marker = if seen { "seen".dimmed() } else { "new".green() };
            println!("[{}] p{} {:<8} {}", marker, item.priority, item.kind.to_string(), item.title);
        }
        println!("(run with --auto-add to create beads, --dry-run to record only)");
        return Ok(());
    }

    let ingestor = FeedbackIngestor::new(
        store,
        source,
        Arc::new(CliBeadsClient::new(config.beads.clone())),
        min_priority,
    );
    let report = ingestor.ingest(&work.id, dry_run).await?;

    println!(
        "fetched {}, recorded {}, duplicates {}, below threshold {}",
        report.fetched,
        report.recorded.len(),
        report.skipped_duplicate,
        report.skipped_priority
    );
    for (title, bead) in &report.beads_created {
        println!("  {} {} -> {}", "bead".green(), bead, title);
    }
    if report.errors > 0 {
        return Err(eyre!("{} feedback items failed to convert", report.errors));
    }
    Ok(())
}

fn resolve_feedback_work(store: &Store, id: Option<&str>) -> Result<Work> {
    if let Some(id) = id {
        return Ok(store.get_work_required(id)?);
    }
    let with_pr: Vec<Work> = store
        .list_works(None)?
        .into_iter()
        .filter(|w| w.pr_url.is_some())
        .collect();
    if with_pr.len() > 1 {
        return Err(eyre!(
            "multiple works have PRs ({}); pass a work id",
            with_pr.iter().map(|w| w.id.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    with_pr
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("no work has a PR URL; pass a work id"))
}

/// `co task list`
pub fn task_list(
    config: &Config,
    status: Option<&str>,
    kind: Option<&str>,
    work: Option<&str>,
) -> Result<()> {
    let store = open_store(config)?;
    let filter = TaskFilter {
        work_id: work.map(str::to_string),
        status: status.map(|s| s.parse::<TaskStatus>()).transpose().map_err(|e| eyre!(e))?,
        kind: kind.map(|k| k.parse::<TaskKind>()).transpose().map_err(|e| eyre!(e))?,
    };

    for task in store.list_tasks(&filter)? {
        println!(
            "{:<16} {:<24} {:<12} {}",
            task.id,
            task.kind.to_string(),
            status_colored(&task.status.to_string()),
            task.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// `co task show <id>`
pub fn task_show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let task = store.get_task_required(id)?;

    println!("{}: {}", "task".bold(), task.id);
    println!("  work:    {}", task.work_id);
    println!("  kind:    {}", task.kind);
    println!("  status:  {}", status_colored(&task.status.to_string()));
    println!("  budget:  {}", task.complexity_budget);
    if let Some(actual) = task.actual_complexity {
        println!("  actual:  {}", actual);
    }
    if let Some(url) = &task.pr_url {
        println!("  result:  {}", url);
    }
    if let Some(error) = &task.error_message {
        println!("  error:   {}", error.red());
    }

    let deps = store.get_task_dependencies(id)?;
    if !deps.is_empty() {
        println!("  depends: {}", deps.join(", "));
    }
    let beads = store.get_task_beads(id)?;
    for bead in beads {
        println!("  bead:    {} ({})", bead.bead_id, bead.status);
    }
    let metadata = store.get_all_task_metadata(id)?;
    for (key, value) in metadata {
        println!("  meta:    {} = {}", key, value);
    }
    Ok(())
}

/// `co task reset <id>`
pub fn task_reset(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    store.reset_task(id)?;
    println!("{} {}", "reset".yellow(), id);
    Ok(())
}

/// `co task delete <ids>`
pub fn task_delete(config: &Config, ids: &[String]) -> Result<()> {
    let store = open_store(config)?;
    for id in ids {
        if store.delete_task(id)? {
            println!("{} {}", "deleted".red(), id);
        } else {
            return Err(eyre!("task {} not found", id));
        }
    }
    Ok(())
}

fn task_id_from_arg_or_env(id: Option<&str>) -> Result<String> {
    match id {
        Some(id) => Ok(id.to_string()),
        None => std::env::var(TASK_ID_ENV)
            .map_err(|_| eyre!("no task id given and {} is not set", TASK_ID_ENV)),
    }
}

/// `co task complete` - the agent's success callback
pub fn task_complete(
    config: &Config,
    id: Option<&str>,
    result: Option<&str>,
    complexity: Option<i64>,
) -> Result<()> {
    let store = open_store(config)?;
    let id = task_id_from_arg_or_env(id)?;
    let task = store.complete_task(&id, result, complexity)?;
    println!("{} {}", "completed".green(), task.id);
    Ok(())
}

/// `co task fail` - the agent's failure callback
pub fn task_fail(config: &Config, id: Option<&str>, error: &str) -> Result<()> {
    let store = open_store(config)?;
    let id = task_id_from_arg_or_env(id)?;
    let task = store.fail_task(&id, error)?;
    println!("{} {}", "failed".red(), task.id);
    Ok(())
}

/// `co poll [<id>]`
pub async fn poll(config: &Config, id: Option<&str>, interval_ms: u64) -> Result<()> {
    let store = open_store(config)?;
    let interval = Duration::from_millis(interval_ms.max(100));

    loop {
        let works = monitored_works(&store, id)?;
        if works.is_empty() {
            println!("nothing to monitor");
            return Ok(());
        }

        let mut all_terminal = true;
        let mut any_failed = false;
        for work in &works {
            let tasks = store.get_work_tasks(&work.id)?;
            let done = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
            println!(
                "{:<28} {:<12} {}/{} tasks",
                work.id,
                status_colored(&work.status.to_string()),
                done,
                tasks.len()
            );
            if !work.is_terminal() {
                all_terminal = false;
            }
            if work.status == WorkStatus::Failed
                || tasks.iter().any(|t| t.status == TaskStatus::Failed)
            {
                any_failed = true;
            }
        }

        if all_terminal {
            if any_failed {
                return Err(eyre!("monitored work finished with failures"));
            }
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

fn monitored_works(store: &Store, id: Option<&str>) -> Result<Vec<Work>> {
    match id {
        Some(id) => {
            // Accept either a work id or a task id.
            if let Some(work) = store.get_work(id)? {
                return Ok(vec![work]);
            }
            if let Some(task) = store.get_task(id)? {
                return Ok(vec![store.get_work_required(&task.work_id)?]);
            }
            Err(eyre!("no work or task named {}", id))
        }
        None => Ok(store
            .list_works(None)?
            .into_iter()
            .filter(|w| !w.is_terminal())
            .collect()),
    }
}

/// `co plan <bead-id>` - spawn or resume an interactive planning tab
pub async fn plan(config: &Config, bead_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let terminal = TerminalClient::new(config.terminal.clone());

    if !terminal.is_available().await {
        return Err(eyre!(
            "terminal multiplexer '{}' is not available",
            config.terminal.multiplexer
        ));
    }

    // Resume a live session rather than duplicating it.
    if let Some(session) = store.get_plan_session(bead_id)? {
        if terminal.tab_exists(&session.tab_name).await {
            terminal.focus_tab(&session.tab_name).await?;
            println!("resumed planning session in tab {}", session.tab_name);
            return Ok(());
        }
        store.remove_plan_session(bead_id)?;
    }

    let library = PromptLibrary::new()?;
    let beads = CliBeadsClient::new(config.beads.clone());
    let title = {
        use crate::beads::BeadsClient as _;
        beads
            .show_issues(&[bead_id.to_string()])
            .await
            .ok()
            .and_then(|issues| issues.into_iter().next())
            .map(|issue| issue.title)
    };
    let prompt = library.render_plan(&PromptContext {
        bead_id: Some(bead_id.to_string()),
        bead_title: title,
        ..PromptContext::default()
    })?;

    let tab = terminal.plan_tab_name(bead_id);
    terminal.remove_orphan_tab(&tab).await;
    let command = format!(
        "{} {} {}",
        config.agent.command,
        config.agent.args.join(" "),
        shell_quote(&prompt)
    );
    terminal.open_tab_with_command(&tab, &command).await?;
    store.register_plan_session(bead_id, terminal.session(), &tab)?;

    println!("planning session started in tab {}", tab);
    Ok(())
}

fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// `co sync` - refresh workspaces from upstream
pub async fn sync(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let workspaces = Workspaces::new(config.git.clone(), std::env::current_dir()?);

    let mut failures = 0;
    for work in store.list_works(None)? {
        if work.is_terminal() {
            continue;
        }
        let path = PathBuf::from(&work.worktree_path);
        if !path.exists() {
            warn!(work_id = %work.id, "workspace missing, skipping sync");
            continue;
        }
        match workspaces.fetch(&path).await {
            Ok(()) => println!("{} {}", "synced".green(), work.id),
            Err(e) => {
                println!("{} {}: {}", "sync failed".red(), work.id, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{} workspaces failed to sync", failures));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.store_path = dir.path().join("state.db");
        config
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_task_id_from_env_fallback() {
        assert_eq!(task_id_from_arg_or_env(Some("w-1.1")).unwrap(), "w-1.1");
        // Without the env var set, a missing id is an error
        if std::env::var(TASK_ID_ENV).is_err() {
            assert!(task_id_from_arg_or_env(None).is_err());
        }
    }

    #[test]
    fn test_resolve_feedback_work() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let store = open_store(&config).unwrap();

        store
            .create_work(&Work::new("w-1", "A", "/tmp/w-1", "feature/a", "main"))
            .unwrap();
        assert!(resolve_feedback_work(&store, None).is_err());

        store.set_work_pr_url("w-1", "https://example/pr/1").unwrap();
        let work = resolve_feedback_work(&store, None).unwrap();
        assert_eq!(work.id, "w-1");

        store
            .create_work(&Work::new("w-2", "B", "/tmp/w-2", "feature/b", "main"))
            .unwrap();
        store.set_work_pr_url("w-2", "https://example/pr/2").unwrap();
        assert!(resolve_feedback_work(&store, None).is_err());
        assert_eq!(resolve_feedback_work(&store, Some("w-2")).unwrap().id, "w-2");
    }

    #[test]
    fn test_task_callbacks_through_store() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let store = open_store(&config).unwrap();
        store
            .create_work(&Work::new("w-1", "A", "/tmp/w-1", "feature/a", "main"))
            .unwrap();
        store
            .create_task("w-1.1", TaskKind::Pr, &[], 1, "w-1")
            .unwrap();
        store.start_task("w-1.1", None).unwrap();

        task_complete(&config, Some("w-1.1"), Some("https://example/pr/9"), None).unwrap();
        let task = store.get_task_required("w-1.1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.pr_url.as_deref(), Some("https://example/pr/9"));

        // Completing again is a conflict surfaced as an error
        assert!(task_complete(&config, Some("w-1.1"), None, None).is_err());
    }

    #[test]
    fn test_monitored_works_by_task_id() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let store = open_store(&config).unwrap();
        store
            .create_work(&Work::new("w-1", "A", "/tmp/w-1", "feature/a", "main"))
            .unwrap();
        store
            .create_task("w-1.1", TaskKind::Implement, &[], 1, "w-1")
            .unwrap();

        let works = monitored_works(&store, Some("w-1.1")).unwrap();
        assert_eq!(works.len(), 1);
        assert_eq!(works[0].id, "w-1");
        assert!(monitored_works(&store, Some("nope")).is_err());
    }
}
