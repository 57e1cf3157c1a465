//! Task CRUD, dependency edges, status transitions, metadata
//!
//! `start_task` is the engine's mutual-exclusion point: its
//! compare-and-set semantics guarantee at-most-one executor per task even
//! with multiple orchestrator lanes alive.

use std::collections::{HashMap, HashSet};

use rusqlite::{OptionalExtension, Row, Transaction, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::now_ms;
use crate::task::{DepRef, NewTask, Task, TaskKind, TaskStatus, task_id};

use super::Store;

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get("task_type")?;
    let status: String = row.get("status")?;
    Ok(Task {
        id: row.get("id")?,
        work_id: row.get("work_id")?,
        kind: kind.parse().unwrap_or(TaskKind::Implement),
        status: status.parse().unwrap_or_default(),
        complexity_budget: row.get("complexity_budget")?,
        actual_complexity: row.get("actual_complexity")?,
        worktree_path: row.get("worktree_path")?,
        pr_url: row.get("pr_url")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

const TASK_COLUMNS: &str = "id, work_id, task_type, status, complexity_budget, actual_complexity, \
     worktree_path, pr_url, error_message, created_at, started_at, completed_at";

/// Order clause yielding per-work numeric task order ("w-1.2" before "w-1.10")
const TASK_NUMBER_ORDER: &str = "CAST(substr(id, length(work_id) + 2) AS INTEGER)";

/// Filters for task listing
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub work_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
}

/// Check whether adding `dependent -> dependency` would close a cycle.
/// Edges are (dependent, dependency) pairs.
fn would_create_cycle(edges: &[(String, String)], dependent: &str, dependency: &str) -> bool {
    if dependent == dependency {
        return true;
    }
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (a, b) in edges {
        adjacency.entry(a.as_str()).or_default().push(b.as_str());
    }

    // A cycle forms iff the dependent is already reachable from the
    // dependency by following existing dependency edges.
    let mut stack = vec![dependency];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == dependent {
            return true;
        }
        if visited.insert(node)
            && let Some(next) = adjacency.get(node)
        {
            stack.extend(next.iter().copied());
        }
    }
    false
}

impl Store {
    /// Allocate the next per-work task number
    ///
    /// A single atomic increment on the work row: safe under concurrent
    /// callers, monotonic (but not gap-free if a later insert fails).
    pub fn next_task_number(&self, work_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let n = conn
            .query_row(
                "UPDATE works SET task_seq = task_seq + 1 WHERE id = ?1 RETURNING task_seq",
                [work_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        n.ok_or_else(|| StoreError::NotFound(format!("work {}", work_id)))
    }

    /// Create a task and its bead links atomically
    ///
    /// The id must be `{work_id}.{n}`; callers allocate n through
    /// `next_task_number`. Creating a `pr` task while another pr task for
    /// the work is pending or processing is a no-op returning the
    /// existing task.
    pub fn create_task(
        &self,
        id: &str,
        kind: TaskKind,
        bead_ids: &[String],
        complexity_budget: i64,
        work_id: &str,
    ) -> StoreResult<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let task = insert_task_tx(&tx, id, kind, bead_ids, complexity_budget, work_id, &[])?;

        tx.commit()?;
        info!(task_id = %task.id, work_id, kind = %kind, beads = bead_ids.len(), "task created");
        Ok(task)
    }

    /// Add a dependency edge: `dependent` is ready only after `dependency`
    /// completed. Rejects missing tasks, cross-work edges, self-edges and
    /// cycles.
    pub fn add_task_dependency(&self, dependent: &str, dependency: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        add_dependency_tx(&tx, dependent, dependency)?;

        tx.commit()?;
        debug!(dependent, dependency, "task dependency added");
        Ok(())
    }

    /// Pending tasks whose every dependency is completed, in task-number
    /// order. Failed dependencies keep dependents unready.
    pub fn get_ready_tasks_for_work(&self, work_id: &str) -> StoreResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t
             WHERE t.work_id = ?1 AND t.status = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM task_dependencies d
                   JOIN tasks dt ON dt.id = d.dependency_id
                   WHERE d.dependent_id = t.id AND dt.status != 'completed'
               )
             ORDER BY {TASK_NUMBER_ORDER}"
        ))?;
        let rows = stmt.query_map([work_id], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Claim a task: compare-and-set pending → processing
    ///
    /// Also moves the task's pending bead links to processing. Returns
    /// `Conflict` when the task is not pending (another lane claimed it).
    pub fn start_task(&self, id: &str, worktree_path: Option<&str>) -> StoreResult<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changes = tx.execute(
            "UPDATE tasks SET status = 'processing', started_at = ?1,
                 worktree_path = COALESCE(?2, worktree_path)
             WHERE id = ?3 AND status = 'pending'",
            params![now_ms(), worktree_path, id],
        )?;
        if changes == 0 {
            return Err(transition_error(&tx, id, "pending"));
        }

        tx.execute(
            "UPDATE task_beads SET status = 'processing' WHERE task_id = ?1 AND status = 'pending'",
            [id],
        )?;

        let task = get_task_tx(&tx, id)?;
        tx.commit()?;
        info!(task_id = %id, "task started");
        Ok(task)
    }

    /// Complete a task: processing → completed
    ///
    /// `result` is the artifact payload (the PR URL for a pr task);
    /// `actual_complexity` is the agent-reported complexity, if any.
    /// Remaining non-terminal bead links complete with the task.
    pub fn complete_task(
        &self,
        id: &str,
        result: Option<&str>,
        actual_complexity: Option<i64>,
    ) -> StoreResult<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changes = tx.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1,
                 pr_url = COALESCE(?2, pr_url),
                 actual_complexity = COALESCE(?3, actual_complexity)
             WHERE id = ?4 AND status = 'processing'",
            params![now_ms(), result, actual_complexity, id],
        )?;
        if changes == 0 {
            return Err(transition_error(&tx, id, "processing"));
        }

        tx.execute(
            "UPDATE task_beads SET status = 'completed'
             WHERE task_id = ?1 AND status IN ('pending', 'processing')",
            [id],
        )?;

        let task = get_task_tx(&tx, id)?;
        tx.commit()?;
        info!(task_id = %id, result = ?result, "task completed");
        Ok(task)
    }

    /// Fail a task: processing → failed, storing the error text.
    /// Bead links that were processing fail with it.
    pub fn fail_task(&self, id: &str, error_message: &str) -> StoreResult<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changes = tx.execute(
            "UPDATE tasks SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![now_ms(), error_message, id],
        )?;
        if changes == 0 {
            return Err(transition_error(&tx, id, "processing"));
        }

        tx.execute(
            "UPDATE task_beads SET status = 'failed' WHERE task_id = ?1 AND status = 'processing'",
            [id],
        )?;

        let task = get_task_tx(&tx, id)?;
        tx.commit()?;
        info!(task_id = %id, error = %error_message, "task failed");
        Ok(task)
    }

    /// Reset a task: {failed, processing} → pending
    ///
    /// Clears timestamps and error and resets every bead link to pending,
    /// in one transaction.
    pub fn reset_task(&self, id: &str) -> StoreResult<Task> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changes = tx.execute(
            "UPDATE tasks SET status = 'pending', started_at = NULL, completed_at = NULL,
                 error_message = NULL
             WHERE id = ?1 AND status IN ('failed', 'processing')",
            [id],
        )?;
        if changes == 0 {
            return Err(transition_error(&tx, id, "failed or processing"));
        }

        tx.execute("UPDATE task_beads SET status = 'pending' WHERE task_id = ?1", [id])?;

        let task = get_task_tx(&tx, id)?;
        tx.commit()?;
        info!(task_id = %id, "task reset");
        Ok(task)
    }

    /// Get a task by id
    pub fn get_task(&self, id: &str) -> StoreResult<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Get a task by id, erroring if missing
    pub fn get_task_required(&self, id: &str) -> StoreResult<Task> {
        self.get_task(id)?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
    }

    /// All tasks of a work, in task-number order
    pub fn get_work_tasks(&self, work_id: &str) -> StoreResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE work_id = ?1 ORDER BY {TASK_NUMBER_ORDER}"
        ))?;
        let rows = stmt.query_map([work_id], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// List tasks with optional filters, in creation order
    pub fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut sql = format!("SELECT {} FROM tasks WHERE 1=1", TASK_COLUMNS);
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(work_id) = &filter.work_id {
            params_vec.push(work_id.clone());
            sql.push_str(&format!(" AND work_id = ?{}", params_vec.len()));
        }
        if let Some(status) = filter.status {
            params_vec.push(status.to_string());
            sql.push_str(&format!(" AND status = ?{}", params_vec.len()));
        }
        if let Some(kind) = filter.kind {
            params_vec.push(kind.to_string());
            sql.push_str(&format!(" AND task_type = ?{}", params_vec.len()));
        }
        sql.push_str(&format!(" ORDER BY work_id, {TASK_NUMBER_ORDER}"));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// The unique pr task of the work in a non-failed state, if any.
    /// Failed pr tasks never block creating a new one.
    pub fn get_pr_task_for_work(&self, work_id: &str) -> StoreResult<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE work_id = ?1 AND task_type = 'pr' AND status != 'failed'
                     ORDER BY {TASK_NUMBER_ORDER} LIMIT 1"
                ),
                [work_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Dependency ids of one task
    pub fn get_task_dependencies(&self, task_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT dependency_id FROM task_dependencies WHERE dependent_id = ?1 ORDER BY dependency_id",
        )?;
        let rows = stmt.query_map([task_id], |row| row.get(0))?;
        let mut deps = Vec::new();
        for row in rows {
            deps.push(row?);
        }
        Ok(deps)
    }

    /// All (dependent, dependency) edges of a work
    pub fn get_work_dependency_edges(&self, work_id: &str) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT d.dependent_id, d.dependency_id FROM task_dependencies d
             JOIN tasks t ON t.id = d.dependent_id
             WHERE t.work_id = ?1",
        )?;
        let rows = stmt.query_map([work_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    /// Delete a task; cascades to its dependency edges (both directions),
    /// bead links and metadata.
    pub fn delete_task(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if changes > 0 {
            info!(task_id = %id, "task deleted");
        }
        Ok(changes > 0)
    }

    /// Upsert one metadata key
    pub fn set_task_metadata(&self, task_id: &str, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            [task_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound(format!("task {}", task_id)));
        }
        conn.execute(
            "INSERT INTO task_metadata (task_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id, key) DO UPDATE SET value = excluded.value",
            params![task_id, key, value],
        )?;
        Ok(())
    }

    /// Read one metadata key; a missing key is the empty string
    pub fn get_task_metadata(&self, task_id: &str, key: &str) -> StoreResult<String> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM task_metadata WHERE task_id = ?1 AND key = ?2",
                params![task_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    /// All metadata of a task
    pub fn get_all_task_metadata(&self, task_id: &str) -> StoreResult<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM task_metadata WHERE task_id = ?1")?;
        let rows = stmt.query_map([task_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v): (String, String) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Persist a batch of follow-up tasks atomically
    ///
    /// Allocates task numbers, creates the tasks with their bead links and
    /// metadata, and wires dependency edges (to existing tasks or to
    /// earlier entries of the batch) in one transaction. On any failure
    /// nothing is persisted.
    pub fn create_follow_ups(&self, work_id: &str, specs: &[NewTask]) -> StoreResult<Vec<Task>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created: Vec<Task> = Vec::with_capacity(specs.len());

        for spec in specs {
            let n = tx
                .query_row(
                    "UPDATE works SET task_seq = task_seq + 1 WHERE id = ?1 RETURNING task_seq",
                    [work_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("work {}", work_id)))?;
            let id = task_id(work_id, n);

            let task = insert_task_tx(
                &tx,
                &id,
                spec.kind,
                &spec.bead_ids,
                spec.complexity_budget,
                work_id,
                &spec.metadata,
            )?;

            for dep in &spec.depends_on {
                let dependency_id = match dep {
                    DepRef::Existing(dep_id) => dep_id.clone(),
                    DepRef::InBatch(index) => created
                        .get(*index)
                        .map(|t: &Task| t.id.clone())
                        .ok_or_else(|| {
                            StoreError::Integrity(format!(
                                "batch dependency index {} out of range",
                                index
                            ))
                        })?,
                };
                add_dependency_tx(&tx, &task.id, &dependency_id)?;
            }

            created.push(task);
        }

        tx.commit()?;
        info!(work_id, count = created.len(), "follow-up tasks created");
        Ok(created)
    }
}

/// Build the error for a lost status CAS: Conflict if the task exists in
/// another state, NotFound otherwise.
fn transition_error(tx: &Transaction<'_>, id: &str, wanted: &str) -> StoreError {
    let current: Result<Option<String>, _> = tx
        .query_row("SELECT status FROM tasks WHERE id = ?1", [id], |row| row.get(0))
        .optional();
    match current {
        Ok(Some(status)) => StoreError::Conflict(format!(
            "task {} is {}, expected {}",
            id, status, wanted
        )),
        Ok(None) => StoreError::NotFound(format!("task {}", id)),
        Err(e) => e.into(),
    }
}

fn get_task_tx(tx: &Transaction<'_>, id: &str) -> StoreResult<Task> {
    tx.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
        [id],
        row_to_task,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
}

fn insert_task_tx(
    tx: &Transaction<'_>,
    id: &str,
    kind: TaskKind,
    bead_ids: &[String],
    complexity_budget: i64,
    work_id: &str,
    metadata: &[(String, String)],
) -> StoreResult<Task> {
    let work_exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM works WHERE id = ?1)",
        [work_id],
        |row| row.get(0),
    )?;
    if !work_exists {
        return Err(StoreError::NotFound(format!("work {}", work_id)));
    }

    let number: Option<i64> = id
        .strip_prefix(work_id)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|n| n.parse().ok());
    let Some(number) = number else {
        return Err(StoreError::Integrity(format!(
            "task id '{}' does not match '{}.{{n}}'",
            id, work_id
        )));
    };

    // Keep the allocator ahead of directly-supplied numbers so later
    // allocations can never collide with this id.
    tx.execute(
        "UPDATE works SET task_seq = MAX(task_seq, ?1) WHERE id = ?2",
        params![number, work_id],
    )?;

    // At most one pr task may be live per work; asking for another while
    // one is pending or processing yields the existing task.
    if kind == TaskKind::Pr {
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE work_id = ?1 AND task_type = 'pr'
                       AND status IN ('pending', 'processing')
                     LIMIT 1"
                ),
                [work_id],
                row_to_task,
            )
            .optional()?;
        if let Some(task) = existing {
            debug!(task_id = %task.id, "active pr task already exists, returning it");
            return Ok(task);
        }
    }

    let task = Task::new(id, work_id, kind, complexity_budget);
    let result = tx.execute(
        "INSERT INTO tasks (id, work_id, task_type, status, complexity_budget, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task.id,
            task.work_id,
            task.kind.to_string(),
            task.status.to_string(),
            task.complexity_budget,
            task.created_at,
        ],
    );
    if let Err(e) = result {
        if e.to_string().to_lowercase().contains("unique") {
            return Err(StoreError::Integrity(format!("task '{}' already exists", id)));
        }
        return Err(e.into());
    }

    for bead_id in bead_ids {
        tx.execute(
            "INSERT INTO task_beads (task_id, bead_id, status) VALUES (?1, ?2, 'pending')",
            params![task.id, bead_id],
        )?;
    }
    for (key, value) in metadata {
        tx.execute(
            "INSERT INTO task_metadata (task_id, key, value) VALUES (?1, ?2, ?3)",
            params![task.id, key, value],
        )?;
    }

    Ok(task)
}

fn add_dependency_tx(tx: &Transaction<'_>, dependent: &str, dependency: &str) -> StoreResult<()> {
    if dependent == dependency {
        return Err(StoreError::Integrity(format!(
            "task {} cannot depend on itself",
            dependent
        )));
    }

    let dependent_work: Option<String> = tx
        .query_row("SELECT work_id FROM tasks WHERE id = ?1", [dependent], |row| row.get(0))
        .optional()?;
    let dependency_work: Option<String> = tx
        .query_row("SELECT work_id FROM tasks WHERE id = ?1", [dependency], |row| row.get(0))
        .optional()?;

    let dependent_work =
        dependent_work.ok_or_else(|| StoreError::NotFound(format!("task {}", dependent)))?;
    let dependency_work =
        dependency_work.ok_or_else(|| StoreError::NotFound(format!("task {}", dependency)))?;
    if dependent_work != dependency_work {
        return Err(StoreError::Integrity(format!(
            "dependency {} -> {} crosses works ({} vs {})",
            dependent, dependency, dependent_work, dependency_work
        )));
    }

    let mut stmt = tx.prepare(
        "SELECT d.dependent_id, d.dependency_id FROM task_dependencies d
         JOIN tasks t ON t.id = d.dependent_id WHERE t.work_id = ?1",
    )?;
    let rows = stmt.query_map([&dependent_work], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut edges: Vec<(String, String)> = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    drop(stmt);

    if would_create_cycle(&edges, dependent, dependency) {
        return Err(StoreError::Integrity(format!(
            "dependency {} -> {} would create a cycle",
            dependent, dependency
        )));
    }

    tx.execute(
        "INSERT OR IGNORE INTO task_dependencies (dependent_id, dependency_id) VALUES (?1, ?2)",
        params![dependent, dependency],
    )?;
    Ok(())
}
