//! Work CRUD

use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::now_ms;
use crate::work::{Work, WorkStatus};

use super::Store;

fn row_to_work(row: &Row<'_>) -> rusqlite::Result<Work> {
    let status: String = row.get("status")?;
    Ok(Work {
        id: row.get("id")?,
        name: row.get("name")?,
        worktree_path: row.get("worktree_path")?,
        branch_name: row.get("branch_name")?,
        base_branch: row.get("base_branch")?,
        root_issue_id: row.get("root_issue_id")?,
        pr_url: row.get("pr_url")?,
        status: status.parse().unwrap_or_default(),
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

const WORK_COLUMNS: &str = "id, name, worktree_path, branch_name, base_branch, root_issue_id, \
     pr_url, status, created_at, started_at, completed_at";

impl Store {
    /// Insert a new work row
    pub fn create_work(&self, work: &Work) -> StoreResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO works (id, name, worktree_path, branch_name, base_branch, \
             root_issue_id, pr_url, status, created_at, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                work.id,
                work.name,
                work.worktree_path,
                work.branch_name,
                work.base_branch,
                work.root_issue_id,
                work.pr_url,
                work.status.to_string(),
                work.created_at,
                work.started_at,
                work.completed_at,
            ],
        );

        match result {
            Ok(_) => {
                info!(work_id = %work.id, name = %work.name, "work created");
                Ok(())
            }
            Err(e) if e.to_string().to_lowercase().contains("unique") => {
                Err(StoreError::Integrity(format!("work '{}' already exists", work.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a work by id
    pub fn get_work(&self, id: &str) -> StoreResult<Option<Work>> {
        let conn = self.conn()?;
        let work = conn
            .query_row(
                &format!("SELECT {} FROM works WHERE id = ?1", WORK_COLUMNS),
                [id],
                row_to_work,
            )
            .optional()?;
        Ok(work)
    }

    /// Get a work by id, erroring if missing
    pub fn get_work_required(&self, id: &str) -> StoreResult<Work> {
        self.get_work(id)?
            .ok_or_else(|| StoreError::NotFound(format!("work {}", id)))
    }

    /// List works, optionally filtered by status, ordered by creation time
    pub fn list_works(&self, status: Option<WorkStatus>) -> StoreResult<Vec<Work>> {
        let conn = self.conn()?;
        let mut works = Vec::new();

        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM works WHERE status = ?1 ORDER BY created_at",
                    WORK_COLUMNS
                ))?;
                let rows = stmt.query_map([status.to_string()], row_to_work)?;
                for row in rows {
                    works.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM works ORDER BY created_at", WORK_COLUMNS))?;
                let rows = stmt.query_map([], row_to_work)?;
                for row in rows {
                    works.push(row?);
                }
            }
        }

        Ok(works)
    }

    /// Delete a work; cascades to its tasks, dependency edges, bead links,
    /// metadata, bead assignments and feedback rows.
    pub fn destroy_work(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM works WHERE id = ?1", [id])?;
        if changes > 0 {
            info!(work_id = %id, "work destroyed");
        }
        Ok(changes > 0)
    }

    /// Transition a work's status, maintaining started_at/completed_at
    pub fn set_work_status(&self, id: &str, status: WorkStatus) -> StoreResult<()> {
        let conn = self.conn()?;
        let now = now_ms();

        let changes = match status {
            WorkStatus::Processing => conn.execute(
                "UPDATE works SET status = ?1, started_at = COALESCE(started_at, ?2) WHERE id = ?3",
                params![status.to_string(), now, id],
            )?,
            WorkStatus::Completed | WorkStatus::Failed => conn.execute(
                "UPDATE works SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?,
            WorkStatus::Pending => conn.execute(
                "UPDATE works SET status = ?1, started_at = NULL, completed_at = NULL WHERE id = ?2",
                params![status.to_string(), id],
            )?,
        };

        if changes == 0 {
            return Err(StoreError::NotFound(format!("work {}", id)));
        }
        debug!(work_id = %id, %status, "work status set");
        Ok(())
    }

    /// Record the PR URL on the work
    pub fn set_work_pr_url(&self, id: &str, pr_url: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "UPDATE works SET pr_url = ?1 WHERE id = ?2",
            params![pr_url, id],
        )?;
        if changes == 0 {
            return Err(StoreError::NotFound(format!("work {}", id)));
        }
        info!(work_id = %id, pr_url, "work pr url recorded");
        Ok(())
    }
}
