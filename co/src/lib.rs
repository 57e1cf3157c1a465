//! Conductor - dependency-scheduled orchestration of agent-driven issue work
//!
//! Conductor turns a graph of issues ("beads") into parallel, dependency-
//! scheduled executions of an external coding agent. State lives in a
//! single-file SQLite store (the `workstore` crate); each active work gets
//! its own cooperative orchestrator lane that reacts to store changes,
//! claims ready tasks, supervises the agent in a terminal tab, and feeds
//! completions back through a typed workflow machine.
//!
//! # Modules
//!
//! - [`broker`] - coalescing "state changed" fan-out to watchers
//! - [`watcher`] - store-file watcher feeding the broker
//! - [`graph`] - pure task-graph functions (partitioning, cycle checks)
//! - [`workflow`] - the per-kind state machine producing follow-up tasks
//! - [`orchestrator`] - the per-work control loop
//! - [`executor`] - the one side-effectful step: run the agent
//! - [`feedback`] - PR feedback ingestion into beads
//! - [`beads`] - facade over the external issue graph
//! - [`config`] - configuration types and loading

pub mod beads;
pub mod broker;
pub mod cli;
pub mod commands;
pub mod config;
pub mod executor;
pub mod feedback;
pub mod graph;
pub mod orchestrator;
pub mod prompts;
pub mod terminal;
pub mod watcher;
pub mod workflow;
pub mod workspace;

pub use broker::{ChangeBroker, ChangeEvent, ChangeStream};
pub use config::Config;
pub use executor::{AgentExecutor, ExecutionOutcome, ExecutionRequest, TaskExecutor};
pub use graph::{partition_beads_into_tasks, ready_task_ids, would_create_cycle};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use watcher::{StoreWatcher, WatcherConfig};
pub use workflow::{Decision, WorkflowConfig, WorkflowMachine};

/// Environment variable carrying the running task's id into the agent
/// process so it can call back through `co task` subcommands.
pub const TASK_ID_ENV: &str = "CO_TASK_ID";
