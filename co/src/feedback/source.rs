//! Feedback sources
//!
//! A source turns a PR URL into actionable items. The shipped source
//! shells out to the `gh` CLI; tests use in-memory fakes.

use std::process::Stdio;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use workstore::FeedbackKind;

/// One actionable item as fetched from the PR host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackItem {
    pub kind: FeedbackKind,
    /// 0 most severe, 4 least
    pub priority: u8,
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_url: String,
    pub source_id: Option<String>,
}

/// Fetches actionable items for a PR
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn fetch(&self, pr_url: &str) -> Result<Vec<FeedbackItem>>;
}

// gh `pr view --json statusCheckRollup,reviews` payload shapes

#[derive(Debug, Deserialize)]
struct PrView {
    #[serde(default, rename = "statusCheckRollup")]
    status_check_rollup: Vec<CheckRun>,
    #[serde(default)]
    reviews: Vec<Review>,
}

#[derive(Debug, Deserialize)]
struct CheckRun {
    #[serde(default)]
    name: String,
    #[serde(default)]
    conclusion: String,
    #[serde(default, rename = "detailsUrl")]
    details_url: String,
}

#[derive(Debug, Deserialize)]
struct Review {
    #[serde(default)]
    author: Author,
    #[serde(default)]
    state: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    login: String,
}

/// Classify a failing check by its name
pub(crate) fn classify_check(name: &str) -> (FeedbackKind, u8) {
    let lower = name.to_lowercase();
    if lower.contains("security") || lower.contains("audit") {
        (FeedbackKind::Security, 0)
    } else if lower.contains("test") {
        (FeedbackKind::Test, 1)
    } else if lower.contains("build") || lower.contains("compile") {
        (FeedbackKind::Build, 1)
    } else if lower.contains("lint") || lower.contains("clippy") || lower.contains("fmt") {
        (FeedbackKind::Lint, 2)
    } else {
        (FeedbackKind::Ci, 1)
    }
}

fn items_from_view(view: PrView) -> Vec<FeedbackItem> {
    let mut items = Vec::new();

    for check in view.status_check_rollup {
        if !matches!(check.conclusion.as_str(), "FAILURE" | "TIMED_OUT") {
            continue;
        }
        let (kind, priority) = classify_check(&check.name);
        items.push(FeedbackItem {
            kind,
            priority,
            title: format!("Check failed: {}", check.name),
            description: format!("Status check '{}' concluded {}", check.name, check.conclusion),
            source: format!("check/{}", check.name),
            source_url: check.details_url,
            source_id: Some(check.name),
        });
    }

    for review in view.reviews {
        if review.state != "CHANGES_REQUESTED" {
            continue;
        }
        items.push(FeedbackItem {
            kind: FeedbackKind::Review,
            priority: 2,
            title: format!("Changes requested by {}", review.author.login),
            description: review.body,
            source: format!("review/{}", review.author.login),
            source_url: String::new(),
            source_id: Some(review.author.login),
        });
    }

    items
}

/// `gh`-backed feedback source
pub struct GhFeedbackSource {
    command: String,
}

impl GhFeedbackSource {
    /// Create a source using the given gh binary
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl FeedbackSource for GhFeedbackSource {
    async fn fetch(&self, pr_url: &str) -> Result<Vec<FeedbackItem>> {
        debug!(pr_url, "fetching PR feedback");
        let output = Command::new(&self.command)
            .args(["pr", "view", pr_url, "--json", "statusCheckRollup,reviews"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context(format!("failed to run '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("{} pr view failed: {}", self.command, stderr.trim()));
        }

        let view: PrView = serde_json::from_slice(&output.stdout)
            .context("gh pr view returned invalid JSON")?;
        Ok(items_from_view(view))
    }
}
