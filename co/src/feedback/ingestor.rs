//! The feedback ingestor
//!
//! For each actionable item not already recorded (dedup by work + title +
//! source): record a PRFeedback row, create a bead, attach it to the work
//! ungrouped, and mark the row processed. Dry-run stops after recording
//! and reports what a full run would create. Errors on one item are
//! logged and the next item proceeds.

use std::sync::Arc;

use eyre::{Context, Result, eyre};
use tracing::{error, info, warn};

use workstore::{NewFeedback, Store};

use crate::beads::{BeadsClient, NewIssue};

use super::source::FeedbackSource;

/// What one ingestion pass did (or would do, in dry-run)
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Items fetched from the PR host
    pub fetched: usize,
    /// Items skipped because they were already recorded
    pub skipped_duplicate: usize,
    /// Items skipped by the priority threshold
    pub skipped_priority: usize,
    /// Feedback rows newly recorded this pass
    pub recorded: Vec<String>,
    /// (feedback title, bead id) pairs turned into beads this pass
    pub beads_created: Vec<(String, String)>,
    /// Items that failed externally and were skipped
    pub errors: usize,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// Ingests PR host signals into beads on a work
pub struct FeedbackIngestor {
    store: Store,
    source: Arc<dyn FeedbackSource>,
    beads: Arc<dyn BeadsClient>,
    min_priority: u8,
}

impl FeedbackIngestor {
    /// Create an ingestor
    ///
    /// `min_priority` is the least-severe priority still ingested
    /// (0 most severe; 4 admits everything).
    pub fn new(
        store: Store,
        source: Arc<dyn FeedbackSource>,
        beads: Arc<dyn BeadsClient>,
        min_priority: u8,
    ) -> Self {
        Self {
            store,
            source,
            beads,
            min_priority,
        }
    }

    /// Run one ingestion pass for a work
    ///
    /// Dry-run records feedback rows but creates no beads; a later full
    /// run picks the recorded-but-unprocessed rows up.
    pub async fn ingest(&self, work_id: &str, dry_run: bool) -> Result<IngestReport> {
        let work = self.store.get_work_required(work_id)?;
        let pr_url = work
            .pr_url
            .clone()
            .ok_or_else(|| eyre!("work {} has no PR URL to poll", work_id))?;

        let items = self
            .source
            .fetch(&pr_url)
            .await
            .context(format!("failed to fetch feedback for {}", pr_url))?;

        let mut report = IngestReport {
            fetched: items.len(),
            dry_run,
            ..IngestReport::default()
        };

        for item in items {
            if item.priority > self.min_priority {
                report.skipped_priority += 1;
                continue;
            }
            if self
                .store
                .has_existing_feedback(work_id, &item.title, &item.source)?
            {
                report.skipped_duplicate += 1;
                continue;
            }

            self.store.create_pr_feedback(&NewFeedback {
                work_id: work_id.to_string(),
                pr_url: pr_url.clone(),
                kind: item.kind,
                title: item.title.clone(),
                description: item.description.clone(),
                source: item.source.clone(),
                source_url: item.source_url.clone(),
                source_id: item.source_id.clone(),
                priority: item.priority,
            })?;
            report.recorded.push(item.title.clone());
        }

        if dry_run {
            info!(
                work_id,
                recorded = report.recorded.len(),
                "dry run: feedback recorded, no beads created"
            );
            return Ok(report);
        }

        // Turn every unprocessed row (from this pass or an earlier
        // dry-run) into a bead attached to the work.
        for row in self.store.list_unprocessed_feedback(work_id)? {
            if row.priority > self.min_priority {
                continue;
            }

            let issue = NewIssue {
                title: row.title.clone(),
                description: if row.source_url.is_empty() {
                    row.description.clone()
                } else {
                    format!("{}\n\nSource: {}", row.description, row.source_url)
                },
                priority: Some(row.priority),
                labels: vec!["pr-feedback".to_string(), row.kind.to_string()],
            };

            let bead_id = match self.beads.create_issue(&issue).await {
                Ok(id) => id,
                Err(e) => {
                    // External failure: record and move to the next item.
                    error!(work_id, title = %row.title, error = %e, "bead creation failed");
                    report.errors += 1;
                    continue;
                }
            };

            if let Err(e) = self.store.add_work_bead(work_id, &bead_id, 0, -1) {
                warn!(work_id, bead_id = %bead_id, error = %e, "could not attach bead to work");
                report.errors += 1;
                continue;
            }
            self.store.mark_feedback_processed(row.id, &bead_id)?;
            report.beads_created.push((row.title.clone(), bead_id));
        }

        info!(
            work_id,
            fetched = report.fetched,
            recorded = report.recorded.len(),
            beads = report.beads_created.len(),
            duplicates = report.skipped_duplicate,
            "feedback ingested"
        );
        Ok(report)
    }
}
