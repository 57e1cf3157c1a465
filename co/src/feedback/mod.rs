//! PR feedback ingestion
//!
//! Converts external review signals (status checks, review verdicts) into
//! beads linked to a work. The orchestrator picks the new beads up through
//! the normal change-notification path.

mod ingestor;
mod source;

pub use ingestor::{FeedbackIngestor, IngestReport};
pub use source::{FeedbackItem, FeedbackSource, GhFeedbackSource};
