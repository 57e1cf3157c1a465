//! Workflow policy
//!
//! Transforms completed tasks into follow-up tasks: implement chains into
//! review, review into pr or update-pr-description (or back into
//! implement when it produced new beads), bounded by the review
//! iteration limit.

mod machine;

pub use machine::{Decision, WorkflowConfig, WorkflowMachine};
