//! Beads client - facade over the external issue graph
//!
//! The engine treats the issue store as opaque: beads are created and read
//! through the `bd` CLI with JSON output, and nothing else about the graph
//! is assumed. Tests substitute in-memory fakes of [`BeadsClient`].

use std::process::Stdio;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::BeadsConfig;

/// Issue status in the external graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// An issue ("bead") as the external graph reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadIssue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// An issue to be created
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub priority: Option<u8>,
    pub labels: Vec<String>,
}

/// Narrow read/write facade over the issue graph
#[async_trait]
pub trait BeadsClient: Send + Sync {
    /// Create an issue; returns its id
    async fn create_issue(&self, issue: &NewIssue) -> Result<String>;

    /// Fetch issues by id; unknown ids are simply absent from the result
    async fn show_issues(&self, ids: &[String]) -> Result<Vec<BeadIssue>>;
}

/// CLI-backed client shelling out to the beads binary
pub struct CliBeadsClient {
    config: BeadsConfig,
}

impl CliBeadsClient {
    /// Create a client for the configured beads binary
    pub fn new(config: BeadsConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(command = %self.config.command, ?args, "beads cli call");
        let output = Command::new(&self.config.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context(format!("failed to run '{}'", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!(
                "{} {} failed: {}",
                self.config.command,
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl BeadsClient for CliBeadsClient {
    async fn create_issue(&self, issue: &NewIssue) -> Result<String> {
        let priority = issue.priority.map(|p| p.to_string());
        let labels = issue.labels.join(",");

        let mut args = vec!["create", issue.title.as_str(), "--json"];
        if !issue.description.is_empty() {
            args.push("-d");
            args.push(issue.description.as_str());
        }
        if let Some(priority) = priority.as_deref() {
            args.push("-p");
            args.push(priority);
        }
        if !labels.is_empty() {
            args.push("--labels");
            args.push(labels.as_str());
        }

        let stdout = self.run(&args).await?;
        let value: serde_json::Value =
            serde_json::from_str(stdout.trim()).context("beads create returned invalid JSON")?;
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| eyre!("beads create response has no id: {}", stdout.trim()))?
            .to_string();

        info!(bead_id = %id, title = %issue.title, "bead created");
        Ok(id)
    }

    async fn show_issues(&self, ids: &[String]) -> Result<Vec<BeadIssue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["show".to_string(), "--json".to_string()];
        args.extend(ids.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let stdout = self.run(&arg_refs).await?;
        let issues: Vec<BeadIssue> =
            serde_json::from_str(stdout.trim()).context("beads show returned invalid JSON")?;
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_deserialization() {
        let json = r#"{
            "id": "bead-42",
            "title": "Fix token refresh",
            "status": "in_progress",
            "priority": 1,
            "description": "expired tokens are not refreshed",
            "labels": ["auth"]
        }"#;
        let issue: BeadIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.id, "bead-42");
        assert_eq!(issue.status, IssueStatus::InProgress);
        assert_eq!(issue.priority, Some(1));
        assert_eq!(issue.labels, vec!["auth"]);
    }

    #[test]
    fn test_issue_minimal_fields() {
        let issue: BeadIssue = serde_json::from_str(r#"{"id": "b1", "title": "t"}"#).unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        assert!(issue.priority.is_none());
        assert!(issue.labels.is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_errors() {
        let client = CliBeadsClient::new(BeadsConfig {
            command: "definitely-not-bd".to_string(),
        });
        let issue = NewIssue {
            title: "t".to_string(),
            ..NewIssue::default()
        };
        assert!(client.create_issue(&issue).await.is_err());
    }

    #[tokio::test]
    async fn test_show_no_ids_skips_subprocess() {
        let client = CliBeadsClient::new(BeadsConfig {
            command: "definitely-not-bd".to_string(),
        });
        // Must not even attempt to run the binary
        assert!(client.show_issues(&[]).await.unwrap().is_empty());
    }
}
