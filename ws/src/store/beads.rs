//! Work↔bead assignments and task↔bead link statuses

use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::task::{TaskBead, TaskStatus, WorkBead};

use super::Store;

fn row_to_work_bead(row: &Row<'_>) -> rusqlite::Result<WorkBead> {
    Ok(WorkBead {
        work_id: row.get("work_id")?,
        bead_id: row.get("bead_id")?,
        group_id: row.get("group_id")?,
        ordinal: row.get("ordinal")?,
    })
}

impl Store {
    /// Assign a bead to a work
    ///
    /// `group_id` 0 makes the bead its own implement task; a positive
    /// group collects beads into one task. `ordinal` preserves insertion
    /// order; pass a negative value to append after the current maximum.
    pub fn add_work_bead(
        &self,
        work_id: &str,
        bead_id: &str,
        group_id: i64,
        ordinal: i64,
    ) -> StoreResult<WorkBead> {
        if group_id < 0 {
            return Err(StoreError::Integrity(format!(
                "group id must be >= 0, got {}",
                group_id
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let work_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM works WHERE id = ?1)",
            [work_id],
            |row| row.get(0),
        )?;
        if !work_exists {
            return Err(StoreError::NotFound(format!("work {}", work_id)));
        }

        let ordinal = if ordinal < 0 {
            let max: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ordinal), -1) FROM work_beads WHERE work_id = ?1",
                [work_id],
                |row| row.get(0),
            )?;
            max + 1
        } else {
            ordinal
        };

        let result = tx.execute(
            "INSERT INTO work_beads (work_id, bead_id, group_id, ordinal) VALUES (?1, ?2, ?3, ?4)",
            params![work_id, bead_id, group_id, ordinal],
        );
        if let Err(e) = result {
            if e.to_string().to_lowercase().contains("unique") {
                return Err(StoreError::Integrity(format!(
                    "bead {} already assigned to work {}",
                    bead_id, work_id
                )));
            }
            return Err(e.into());
        }

        tx.commit()?;
        info!(work_id, bead_id, group_id, ordinal, "work bead added");
        Ok(WorkBead {
            work_id: work_id.to_string(),
            bead_id: bead_id.to_string(),
            group_id,
            ordinal,
        })
    }

    /// All beads assigned to a work, in insertion (ordinal) order
    pub fn get_work_beads(&self, work_id: &str) -> StoreResult<Vec<WorkBead>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT work_id, bead_id, group_id, ordinal FROM work_beads
             WHERE work_id = ?1 ORDER BY ordinal",
        )?;
        let rows = stmt.query_map([work_id], row_to_work_bead)?;
        let mut beads = Vec::new();
        for row in rows {
            beads.push(row?);
        }
        Ok(beads)
    }

    /// Beads assigned to the work but not yet linked to any of its tasks
    ///
    /// This is how review-produced beads surface to the workflow machine.
    pub fn get_unassigned_work_beads(&self, work_id: &str) -> StoreResult<Vec<WorkBead>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT wb.work_id, wb.bead_id, wb.group_id, wb.ordinal FROM work_beads wb
             WHERE wb.work_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM task_beads tb
                   JOIN tasks t ON t.id = tb.task_id
                   WHERE t.work_id = wb.work_id AND tb.bead_id = wb.bead_id
               )
             ORDER BY wb.ordinal",
        )?;
        let rows = stmt.query_map([work_id], row_to_work_bead)?;
        let mut beads = Vec::new();
        for row in rows {
            beads.push(row?);
        }
        Ok(beads)
    }

    /// Remove a bead assignment
    pub fn remove_work_bead(&self, work_id: &str, bead_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "DELETE FROM work_beads WHERE work_id = ?1 AND bead_id = ?2",
            params![work_id, bead_id],
        )?;
        if changes > 0 {
            debug!(work_id, bead_id, "work bead removed");
        }
        Ok(changes > 0)
    }

    /// Bead links of a task
    pub fn get_task_beads(&self, task_id: &str) -> StoreResult<Vec<TaskBead>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, bead_id, status FROM task_beads WHERE task_id = ?1 ORDER BY bead_id",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            let status: String = row.get("status")?;
            Ok(TaskBead {
                task_id: row.get("task_id")?,
                bead_id: row.get("bead_id")?,
                status: status.parse().unwrap_or_default(),
            })
        })?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Set the status of one task↔bead link (the agent's per-bead progress)
    pub fn set_task_bead_status(
        &self,
        task_id: &str,
        bead_id: &str,
        status: TaskStatus,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "UPDATE task_beads SET status = ?1 WHERE task_id = ?2 AND bead_id = ?3",
            params![status.to_string(), task_id, bead_id],
        )?;
        if changes == 0 {
            return Err(StoreError::NotFound(format!(
                "task bead {} / {}",
                task_id, bead_id
            )));
        }
        Ok(())
    }

    /// Check whether a bead is assigned to the work
    pub fn has_work_bead(&self, work_id: &str, bead_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM work_beads WHERE work_id = ?1 AND bead_id = ?2",
                params![work_id, bead_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}
