//! Conductor CLI entry point

use clap::Parser;
use eyre::{Context, Result};

use conductor::cli::{Cli, Command, TaskCommand, WorkCommand};
use conductor::commands;
use conductor::config::Config;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Orchestrate { work } => commands::orchestrate(&config, &work).await,

        Command::Work { command } => match command {
            WorkCommand::Create {
                name,
                branch,
                base,
                issue,
                path,
                group,
                beads,
            } => {
                commands::work_create(
                    &config,
                    &name,
                    &branch,
                    &base,
                    issue.as_deref(),
                    path,
                    group,
                    &beads,
                )
                .await
            }
            WorkCommand::List { status } => commands::work_list(&config, status.as_deref()),
            WorkCommand::Show { id } => commands::work_show(&config, &id),
            WorkCommand::Destroy { id } => commands::work_destroy(&config, &id).await,
            WorkCommand::Feedback {
                id,
                dry_run,
                auto_add,
                min_priority,
            } => {
                commands::work_feedback(&config, id.as_deref(), dry_run, auto_add, min_priority)
                    .await
            }
        },

        Command::Task { command } => match command {
            TaskCommand::List { status, kind, work } => {
                commands::task_list(&config, status.as_deref(), kind.as_deref(), work.as_deref())
            }
            TaskCommand::Show { id } => commands::task_show(&config, &id),
            TaskCommand::Reset { id } => commands::task_reset(&config, &id),
            TaskCommand::Delete { ids } => commands::task_delete(&config, &ids),
            TaskCommand::Complete {
                id,
                result,
                complexity,
            } => commands::task_complete(&config, id.as_deref(), result.as_deref(), complexity),
            TaskCommand::Fail { id, error } => commands::task_fail(&config, id.as_deref(), &error),
        },

        Command::Poll { id, interval_ms } => {
            commands::poll(&config, id.as_deref(), interval_ms).await
        }

        Command::Plan { bead_id } => commands::plan(&config, &bead_id).await,

        Command::Sync => commands::sync(&config).await,
    }
}
