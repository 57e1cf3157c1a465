//! WorkStore - persistent work/task state management
//!
//! WorkStore is the single transactional authority for the orchestration
//! engine: works, their tasks, task dependencies, task↔bead links, task
//! metadata, work↔bead assignments, PR feedback records and the plan
//! session registry all live in one SQLite file.
//!
//! # Guarantees
//!
//! - **One write lane**: all mutations serialize through the connection
//!   mutex; readers share the same lane. A failed write leaves the store
//!   unchanged (every composite operation is a single transaction).
//! - **Integrity at commit**: dependency edges stay within one work and
//!   acyclic, task ids follow `{work-id}.{n}`, status transitions carry
//!   their timestamps, deletes cascade.
//! - **Compare-and-set claims**: `start_task` is the mutual-exclusion
//!   point that guarantees at-most-one executor per task.

pub mod error;
pub mod feedback;
pub mod id;
pub mod store;
pub mod task;
pub mod work;

pub use error::{StoreError, StoreResult};
pub use feedback::{FeedbackKind, NewFeedback, PlanSession, PrFeedback};
pub use id::generate_work_id;
pub use store::{Store, TaskFilter};
pub use task::{
    AUTO_WORKFLOW, DepRef, NewTask, Task, TaskBead, TaskKind, TaskStatus, WorkBead, task_id,
};
pub use work::{Work, WorkStatus};

/// Current time as Unix milliseconds (UTC)
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
