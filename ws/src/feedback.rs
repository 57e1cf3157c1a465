//! PR feedback and plan session domain types

use serde::{Deserialize, Serialize};

/// Classification of an actionable item ingested from the PR host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Test,
    Build,
    Ci,
    Lint,
    Security,
    Review,
    Other,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Build => write!(f, "build"),
            Self::Ci => write!(f, "ci"),
            Self::Lint => write!(f, "lint"),
            Self::Security => write!(f, "security"),
            Self::Review => write!(f, "review"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "build" => Ok(Self::Build),
            "ci" => Ok(Self::Ci),
            "lint" => Ok(Self::Lint),
            "security" => Ok(Self::Security),
            "review" => Ok(Self::Review),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown feedback kind: {}", other)),
        }
    }
}

/// One actionable item recorded from the pull-request host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFeedback {
    /// Row id
    pub id: i64,
    pub work_id: String,
    pub pr_url: String,
    pub kind: FeedbackKind,
    pub title: String,
    pub description: String,
    /// Source identifier, e.g. a check name or reviewer login
    pub source: String,
    pub source_url: String,
    pub source_id: Option<String>,
    /// 0 is most severe, 4 least
    pub priority: u8,
    /// The bead this item produced, once processed
    pub processed_bead_id: Option<String>,
    pub created_at: i64,
}

impl PrFeedback {
    /// Check if this item has been turned into a bead
    pub fn is_processed(&self) -> bool {
        self.processed_bead_id.is_some()
    }
}

/// A feedback item to be inserted
#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub work_id: String,
    pub pr_url: String,
    pub kind: FeedbackKind,
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_url: String,
    pub source_id: Option<String>,
    pub priority: u8,
}

/// Registry row mapping a bead to a live planning tab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSession {
    pub bead_id: String,
    /// Terminal multiplexer session name
    pub session: String,
    /// Tab name inside the session
    pub tab_name: String,
    pub registered_at: i64,
}
