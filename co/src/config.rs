//! Conductor configuration types and loading
//!
//! One explicit configuration record populated once at startup and passed
//! into component constructors; no component reads globals.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::terminal::TerminalConfig;
use crate::watcher::WatcherConfig;
use crate::workflow::WorkflowConfig;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location
    pub storage: StorageConfig,

    /// Workflow policy knobs
    pub workflow: WorkflowConfig,

    /// Store file watcher
    pub watcher: WatcherConfig,

    /// Terminal multiplexer
    pub terminal: TerminalConfig,

    /// External coding agent
    pub agent: AgentConfig,

    /// Beads (issue graph) CLI
    pub beads: BeadsConfig,

    /// PR feedback ingestion
    pub feedback: FeedbackConfig,

    /// Workspace (git worktree) provisioning
    pub git: GitConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .conductor.yml
        let local_config = PathBuf::from(".conductor.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/conductor/conductor.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("conductor").join("conductor.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite store file, relative to the project root
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(".conductor/state.db"),
        }
    }
}

/// External coding agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent binary
    pub command: String,

    /// Arguments placed before the rendered prompt
    pub args: Vec<String>,

    /// Grace period between SIGTERM and SIGKILL on cancellation
    #[serde(rename = "grace-period-ms")]
    pub grace_period_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            grace_period_ms: 2_000,
        }
    }
}

/// Beads CLI access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeadsConfig {
    /// Beads binary
    pub command: String,
}

impl Default for BeadsConfig {
    fn default() -> Self {
        Self {
            command: "bd".to_string(),
        }
    }
}

/// PR feedback ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Items with priority above this are skipped (0 most severe)
    #[serde(rename = "min-priority")]
    pub min_priority: u8,

    /// PR host CLI binary
    pub command: String,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_priority: 4,
            command: "gh".to_string(),
        }
    }
}

/// Workspace provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Directory work worktrees are created under
    #[serde(rename = "worktree-dir")]
    pub worktree_dir: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_dir: PathBuf::from(".conductor/worktrees"),
        }
    }
}
