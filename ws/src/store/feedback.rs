//! PR feedback records and the plan session registry

use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::feedback::{FeedbackKind, NewFeedback, PlanSession, PrFeedback};
use crate::now_ms;

use super::Store;

fn row_to_feedback(row: &Row<'_>) -> rusqlite::Result<PrFeedback> {
    let kind: String = row.get("type")?;
    let priority: i64 = row.get("priority")?;
    Ok(PrFeedback {
        id: row.get("id")?,
        work_id: row.get("work_id")?,
        pr_url: row.get("pr_url")?,
        kind: kind.parse().unwrap_or(FeedbackKind::Other),
        title: row.get("title")?,
        description: row.get("description")?,
        source: row.get("source")?,
        source_url: row.get("source_url")?,
        source_id: row.get("source_id")?,
        priority: priority.clamp(0, 4) as u8,
        processed_bead_id: row.get("processed_bead_id")?,
        created_at: row.get("created_at")?,
    })
}

const FEEDBACK_COLUMNS: &str = "id, work_id, pr_url, type, title, description, source, source_url, \
     source_id, priority, processed_bead_id, created_at";

impl Store {
    /// Insert a feedback record; returns its row id
    pub fn create_pr_feedback(&self, feedback: &NewFeedback) -> StoreResult<i64> {
        if feedback.priority > 4 {
            return Err(StoreError::Integrity(format!(
                "priority must be 0..=4, got {}",
                feedback.priority
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pr_feedback (work_id, pr_url, type, title, description, source, \
             source_url, source_id, priority, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                feedback.work_id,
                feedback.pr_url,
                feedback.kind.to_string(),
                feedback.title,
                feedback.description,
                feedback.source,
                feedback.source_url,
                feedback.source_id,
                feedback.priority as i64,
                now_ms(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            feedback_id = id,
            work_id = %feedback.work_id,
            kind = %feedback.kind,
            title = %feedback.title,
            "pr feedback recorded"
        );
        Ok(id)
    }

    /// Idempotence check: has this (work, title, source) been recorded?
    pub fn has_existing_feedback(&self, work_id: &str, title: &str, source: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pr_feedback \
             WHERE work_id = ?1 AND title = ?2 AND source = ?3)",
            params![work_id, title, source],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Mark a feedback row processed with the bead it produced
    pub fn mark_feedback_processed(&self, id: i64, bead_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "UPDATE pr_feedback SET processed_bead_id = ?1 WHERE id = ?2",
            params![bead_id, id],
        )?;
        if changes == 0 {
            return Err(StoreError::NotFound(format!("feedback {}", id)));
        }
        debug!(feedback_id = id, bead_id, "feedback marked processed");
        Ok(())
    }

    /// Feedback rows of a work, newest last
    pub fn list_pr_feedback(&self, work_id: &str) -> StoreResult<Vec<PrFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM pr_feedback WHERE work_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([work_id], row_to_feedback)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Feedback rows of a work not yet turned into beads
    pub fn list_unprocessed_feedback(&self, work_id: &str) -> StoreResult<Vec<PrFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM pr_feedback
             WHERE work_id = ?1 AND processed_bead_id IS NULL ORDER BY id"
        ))?;
        let rows = stmt.query_map([work_id], row_to_feedback)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Register (or replace) the live planning tab for a bead
    pub fn register_plan_session(&self, bead_id: &str, session: &str, tab_name: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO plan_sessions (bead_id, session, tab_name, registered_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(bead_id) DO UPDATE SET \
                 session = excluded.session, \
                 tab_name = excluded.tab_name, \
                 registered_at = excluded.registered_at",
            params![bead_id, session, tab_name, now_ms()],
        )?;
        info!(bead_id, session, tab_name, "plan session registered");
        Ok(())
    }

    /// Look up the registered planning tab for a bead
    pub fn get_plan_session(&self, bead_id: &str) -> StoreResult<Option<PlanSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                "SELECT bead_id, session, tab_name, registered_at FROM plan_sessions WHERE bead_id = ?1",
                [bead_id],
                |row| {
                    Ok(PlanSession {
                        bead_id: row.get(0)?,
                        session: row.get(1)?,
                        tab_name: row.get(2)?,
                        registered_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Drop the registry row for a bead
    pub fn remove_plan_session(&self, bead_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM plan_sessions WHERE bead_id = ?1", [bead_id])?;
        Ok(changes > 0)
    }
}
