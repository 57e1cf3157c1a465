//! The SQLite-backed store
//!
//! One file, one serialized write lane. Operations are grouped by table
//! family: works, tasks (with dependencies and metadata), bead
//! assignments, and feedback/plan-session records.

mod beads;
mod feedback;
mod tasks;
mod works;

pub use tasks::TaskFilter;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Database wrapper with thread-safe connection management
///
/// Cloning shares the underlying connection; all clones serialize through
/// the same write lane.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open or create a store at the given path
    ///
    /// Creates the database file if it doesn't exist and initializes the
    /// schema. Foreign keys (and their cascade deletes) are enforced.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("failed to create store directory: {}", e)))?;
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // WAL keeps readers unblocked while the write lane commits. The
        // pragma returns the resulting mode as a row, so read it.
        let _mode: String = conn.query_row("PRAGMA journal_mode = wal", [], |row| row.get(0))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        store.init_schema()?;

        debug!(path = %store.path.display(), "store opened");
        Ok(store)
    }

    /// Path of the backing file (watched for external mutation)
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS works (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                worktree_path   TEXT NOT NULL,
                branch_name     TEXT NOT NULL,
                base_branch     TEXT NOT NULL,
                root_issue_id   TEXT,
                pr_url          TEXT,
                status          TEXT NOT NULL
                    CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
                task_seq        INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                started_at      INTEGER,
                completed_at    INTEGER
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id                TEXT PRIMARY KEY,
                work_id           TEXT NOT NULL
                    REFERENCES works(id) ON DELETE CASCADE,
                task_type         TEXT NOT NULL
                    CHECK(task_type IN ('implement', 'review', 'pr', 'update_pr_description', 'estimate')),
                status            TEXT NOT NULL
                    CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
                complexity_budget INTEGER NOT NULL DEFAULT 0,
                actual_complexity INTEGER,
                worktree_path     TEXT,
                pr_url            TEXT,
                error_message     TEXT,
                created_at        INTEGER NOT NULL,
                started_at        INTEGER,
                completed_at      INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_work ON tasks(work_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            CREATE TABLE IF NOT EXISTS task_dependencies (
                dependent_id  TEXT NOT NULL
                    REFERENCES tasks(id) ON DELETE CASCADE,
                dependency_id TEXT NOT NULL
                    REFERENCES tasks(id) ON DELETE CASCADE,
                PRIMARY KEY (dependent_id, dependency_id)
            );

            CREATE TABLE IF NOT EXISTS task_beads (
                task_id TEXT NOT NULL
                    REFERENCES tasks(id) ON DELETE CASCADE,
                bead_id TEXT NOT NULL,
                status  TEXT NOT NULL
                    CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
                PRIMARY KEY (task_id, bead_id)
            );

            CREATE TABLE IF NOT EXISTS task_metadata (
                task_id TEXT NOT NULL
                    REFERENCES tasks(id) ON DELETE CASCADE,
                key     TEXT NOT NULL,
                value   TEXT NOT NULL,
                PRIMARY KEY (task_id, key)
            );

            CREATE TABLE IF NOT EXISTS work_beads (
                work_id  TEXT NOT NULL
                    REFERENCES works(id) ON DELETE CASCADE,
                bead_id  TEXT NOT NULL,
                group_id INTEGER NOT NULL DEFAULT 0,
                ordinal  INTEGER NOT NULL,
                PRIMARY KEY (work_id, bead_id)
            );

            CREATE TABLE IF NOT EXISTS pr_feedback (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id           TEXT NOT NULL
                    REFERENCES works(id) ON DELETE CASCADE,
                pr_url            TEXT NOT NULL,
                type              TEXT NOT NULL,
                title             TEXT NOT NULL,
                description       TEXT NOT NULL DEFAULT '',
                source            TEXT NOT NULL,
                source_url        TEXT NOT NULL DEFAULT '',
                source_id         TEXT,
                priority          INTEGER NOT NULL DEFAULT 2,
                processed_bead_id TEXT,
                created_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_work ON pr_feedback(work_id);

            CREATE TABLE IF NOT EXISTS plan_sessions (
                bead_id       TEXT PRIMARY KEY,
                session       TEXT NOT NULL,
                tab_name      TEXT NOT NULL,
                registered_at INTEGER NOT NULL
            );",
        )?;

        drop(conn);
        Ok(())
    }
}
