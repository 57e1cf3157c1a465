//! Terminal multiplexer client
//!
//! Thin wrapper over the multiplexer CLI (zellij verbs). Tabs are
//! addressed by deterministic names so every operation is idempotent:
//! one tab per work (`co:{work-id}`), one per planning session
//! (`co:plan:{bead-id}`).

use std::process::Stdio;

use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

/// Terminal multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Multiplexer binary
    pub multiplexer: String,

    /// Session name all tabs live in
    pub session: String,

    /// Prefix for tab names
    #[serde(rename = "tab-prefix")]
    pub tab_prefix: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            multiplexer: "zellij".to_string(),
            session: "conductor".to_string(),
            tab_prefix: "co".to_string(),
        }
    }
}

/// Client for session/tab operations
#[derive(Debug, Clone)]
pub struct TerminalClient {
    config: TerminalConfig,
}

impl TerminalClient {
    /// Create a client with the given configuration
    pub fn new(config: TerminalConfig) -> Self {
        Self { config }
    }

    /// The session tabs are created in
    pub fn session(&self) -> &str {
        &self.config.session
    }

    /// Deterministic tab name for a work
    pub fn work_tab_name(&self, work_id: &str) -> String {
        format!("{}:{}", self.config.tab_prefix, work_id)
    }

    /// Deterministic tab name for a planning session
    pub fn plan_tab_name(&self, bead_id: &str) -> String {
        format!("{}:plan:{}", self.config.tab_prefix, bead_id)
    }

    async fn run_action(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.config.multiplexer)
            .arg("--session")
            .arg(&self.config.session)
            .arg("action")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| eyre!("failed to run {}: {}", self.config.multiplexer, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!(
                "{} action {:?} failed: {}",
                self.config.multiplexer,
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check whether the multiplexer binary responds at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.multiplexer)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Names of tabs currently open in the session
    pub async fn list_tabs(&self) -> Result<Vec<String>> {
        let stdout = self.run_action(&["query-tab-names"]).await?;
        Ok(stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Check whether a tab with the given name exists
    pub async fn tab_exists(&self, name: &str) -> bool {
        self.list_tabs()
            .await
            .map(|tabs| tabs.iter().any(|t| t == name))
            .unwrap_or(false)
    }

    /// Open a new named tab
    pub async fn new_tab(&self, name: &str) -> Result<()> {
        debug!(tab = name, "opening tab");
        self.run_action(&["new-tab", "--name", name]).await?;
        Ok(())
    }

    /// Focus a tab by name
    pub async fn focus_tab(&self, name: &str) -> Result<()> {
        self.run_action(&["go-to-tab-name", name]).await?;
        Ok(())
    }

    /// Close a tab by name (focus then close)
    pub async fn close_tab(&self, name: &str) -> Result<()> {
        debug!(tab = name, "closing tab");
        self.run_action(&["go-to-tab-name", name]).await?;
        self.run_action(&["close-tab"]).await?;
        Ok(())
    }

    /// Remove an orphaned tab with the given name, if one exists
    pub async fn remove_orphan_tab(&self, name: &str) {
        if self.tab_exists(name).await
            && let Err(e) = self.close_tab(name).await
        {
            warn!(tab = name, error = %e, "failed to remove orphaned tab");
        }
    }

    /// Type a shell command into the focused tab
    pub async fn write_command(&self, command: &str) -> Result<()> {
        self.run_action(&["write-chars", &format!("{}\n", command)]).await?;
        Ok(())
    }

    /// Open a named tab running a command (new tab + typed command)
    pub async fn open_tab_with_command(&self, name: &str, command: &str) -> Result<()> {
        self.new_tab(name).await?;
        self.write_command(command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_names_are_deterministic() {
        let client = TerminalClient::new(TerminalConfig::default());
        assert_eq!(client.work_tab_name("w-1"), "co:w-1");
        assert_eq!(client.work_tab_name("w-1"), client.work_tab_name("w-1"));
        assert_eq!(client.plan_tab_name("bead-9"), "co:plan:bead-9");
    }

    #[test]
    fn test_config_defaults() {
        let config = TerminalConfig::default();
        assert_eq!(config.multiplexer, "zellij");
        assert_eq!(config.session, "conductor");
    }

    #[tokio::test]
    async fn test_missing_multiplexer_is_unavailable() {
        let client = TerminalClient::new(TerminalConfig {
            multiplexer: "definitely-not-a-multiplexer".to_string(),
            ..TerminalConfig::default()
        });
        assert!(!client.is_available().await);
        assert!(!client.tab_exists("co:w-1").await);
    }

    #[tokio::test]
    async fn test_list_tabs_error_on_missing_binary() {
        let client = TerminalClient::new(TerminalConfig {
            multiplexer: "definitely-not-a-multiplexer".to_string(),
            ..TerminalConfig::default()
        });
        assert!(client.list_tabs().await.is_err());
    }
}
