//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conductor - dependency-scheduled orchestration of agent-driven issue work
#[derive(Parser)]
#[command(
    name = "co",
    about = "Orchestrates coding-agent work over an issue graph",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestrator lane for a work (blocks until done)
    Orchestrate {
        /// Work to orchestrate
        #[arg(long)]
        work: String,
    },

    /// Manage works
    Work {
        #[command(subcommand)]
        command: WorkCommand,
    },

    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Stream-print progress until the monitored works complete
    Poll {
        /// Work or task id to monitor (default: all active works)
        id: Option<String>,

        /// Print interval in milliseconds
        #[arg(long, default_value = "2000")]
        interval_ms: u64,
    },

    /// Spawn or resume an interactive planning session for a bead
    Plan {
        /// Bead to plan
        bead_id: String,
    },

    /// Refresh workspaces from upstream
    Sync,
}

/// Work subcommands
#[derive(Subcommand)]
pub enum WorkCommand {
    /// Create a work with an isolated workspace
    Create {
        /// Human-readable name
        #[arg(long)]
        name: String,

        /// Target branch for the work
        #[arg(long)]
        branch: String,

        /// Base branch the target forks from
        #[arg(long, default_value = "main")]
        base: String,

        /// Root issue reference
        #[arg(long)]
        issue: Option<String>,

        /// Use an existing directory instead of provisioning a worktree
        #[arg(long)]
        path: Option<PathBuf>,

        /// Group id for the listed beads (0 = one task per bead)
        #[arg(long, default_value = "0")]
        group: i64,

        /// Beads to assign
        beads: Vec<String>,
    },

    /// List works
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one work with its tasks and beads
    Show {
        /// Work id
        id: String,
    },

    /// Destroy a work, its tasks, and its workspace
    Destroy {
        /// Work id
        id: String,
    },

    /// Ingest PR feedback into beads on the work
    Feedback {
        /// Work id (default: the single work with a PR)
        id: Option<String>,

        /// Record feedback rows but create no beads
        #[arg(long)]
        dry_run: bool,

        /// Create beads and attach them to the work
        #[arg(long)]
        auto_add: bool,

        /// Skip items less severe than this priority (0-4)
        #[arg(long)]
        min_priority: Option<u8>,
    },
}

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommand {
    /// List tasks
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Filter by kind (implement, review, pr, update_pr_description, estimate)
        #[arg(long = "type")]
        kind: Option<String>,

        /// Filter by work
        #[arg(long)]
        work: Option<String>,
    },

    /// Show one task with its beads, dependencies and metadata
    Show {
        /// Task id
        id: String,
    },

    /// Reset a failed or stuck task back to pending
    Reset {
        /// Task id
        id: String,
    },

    /// Delete tasks
    Delete {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Mark a task completed (agent callback; id defaults to $CO_TASK_ID)
    Complete {
        /// Task id
        id: Option<String>,

        /// Result artifact, e.g. the PR URL
        #[arg(long)]
        result: Option<String>,

        /// Reported complexity
        #[arg(long)]
        complexity: Option<i64>,
    },

    /// Mark a task failed (agent callback; id defaults to $CO_TASK_ID)
    Fail {
        /// Task id
        id: Option<String>,

        /// Failure description
        #[arg(long)]
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orchestrate() {
        let cli = Cli::parse_from(["co", "orchestrate", "--work", "w-1"]);
        match cli.command {
            Command::Orchestrate { work } => assert_eq!(work, "w-1"),
            _ => panic!("expected orchestrate"),
        }
    }

    #[test]
    fn test_parse_work_create_with_beads() {
        let cli = Cli::parse_from([
            "co", "work", "create", "--name", "Fix auth", "--branch", "feature/auth", "b1", "b2",
        ]);
        match cli.command {
            Command::Work {
                command:
                    WorkCommand::Create {
                        name,
                        branch,
                        base,
                        beads,
                        group,
                        ..
                    },
            } => {
                assert_eq!(name, "Fix auth");
                assert_eq!(branch, "feature/auth");
                assert_eq!(base, "main");
                assert_eq!(group, 0);
                assert_eq!(beads, vec!["b1", "b2"]);
            }
            _ => panic!("expected work create"),
        }
    }

    #[test]
    fn test_parse_work_feedback_flags() {
        let cli = Cli::parse_from([
            "co",
            "work",
            "feedback",
            "w-1",
            "--dry-run",
            "--min-priority",
            "1",
        ]);
        match cli.command {
            Command::Work {
                command:
                    WorkCommand::Feedback {
                        id,
                        dry_run,
                        auto_add,
                        min_priority,
                    },
            } => {
                assert_eq!(id.as_deref(), Some("w-1"));
                assert!(dry_run);
                assert!(!auto_add);
                assert_eq!(min_priority, Some(1));
            }
            _ => panic!("expected work feedback"),
        }
    }

    #[test]
    fn test_parse_task_list_filters() {
        let cli = Cli::parse_from(["co", "task", "list", "--status", "pending", "--type", "review"]);
        match cli.command {
            Command::Task {
                command: TaskCommand::List { status, kind, work },
            } => {
                assert_eq!(status.as_deref(), Some("pending"));
                assert_eq!(kind.as_deref(), Some("review"));
                assert!(work.is_none());
            }
            _ => panic!("expected task list"),
        }
    }

    #[test]
    fn test_parse_task_complete_defaults_id_to_env() {
        let cli = Cli::parse_from(["co", "task", "complete", "--result", "https://example/pr/1"]);
        match cli.command {
            Command::Task {
                command: TaskCommand::Complete { id, result, .. },
            } => {
                assert!(id.is_none());
                assert_eq!(result.as_deref(), Some("https://example/pr/1"));
            }
            _ => panic!("expected task complete"),
        }
    }

    #[test]
    fn test_parse_task_fail_requires_error() {
        assert!(Cli::try_parse_from(["co", "task", "fail", "w-1.1"]).is_err());
        let cli = Cli::parse_from(["co", "task", "fail", "w-1.1", "--error", "boom"]);
        match cli.command {
            Command::Task {
                command: TaskCommand::Fail { id, error },
            } => {
                assert_eq!(id.as_deref(), Some("w-1.1"));
                assert_eq!(error, "boom");
            }
            _ => panic!("expected task fail"),
        }
    }

    #[test]
    fn test_parse_task_delete_requires_ids() {
        assert!(Cli::try_parse_from(["co", "task", "delete"]).is_err());
        let cli = Cli::parse_from(["co", "task", "delete", "w-1.1", "w-1.2"]);
        match cli.command {
            Command::Task {
                command: TaskCommand::Delete { ids },
            } => assert_eq!(ids, vec!["w-1.1", "w-1.2"]),
            _ => panic!("expected task delete"),
        }
    }

    #[test]
    fn test_parse_poll_defaults() {
        let cli = Cli::parse_from(["co", "poll"]);
        match cli.command {
            Command::Poll { id, interval_ms } => {
                assert!(id.is_none());
                assert_eq!(interval_ms, 2000);
            }
            _ => panic!("expected poll"),
        }
    }

    #[test]
    fn test_parse_plan_and_sync() {
        let cli = Cli::parse_from(["co", "plan", "bead-7"]);
        assert!(matches!(cli.command, Command::Plan { bead_id } if bead_id == "bead-7"));
        let cli = Cli::parse_from(["co", "sync"]);
        assert!(matches!(cli.command, Command::Sync));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["co", "-c", "/tmp/conductor.yml", "sync"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/conductor.yml")));
    }
}
