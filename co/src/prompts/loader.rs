//! Prompt rendering
//!
//! Registers the embedded templates once and renders them with a
//! task-specific context.

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use workstore::TaskKind;

use super::embedded;

/// A bead reference for template iteration
#[derive(Debug, Clone, Serialize)]
pub struct BeadRef {
    pub id: String,
    pub title: Option<String>,
}

/// Context rendered into a task prompt
#[derive(Debug, Clone, Serialize, Default)]
pub struct PromptContext {
    pub task_id: String,
    pub work_name: String,
    pub branch_name: String,
    pub base_branch: String,
    pub complexity_budget: i64,
    pub beads: Vec<BeadRef>,
    pub pr_url: Option<String>,
    pub bead_id: Option<String>,
    pub bead_title: Option<String>,
}

/// Registry of compiled prompt templates
pub struct PromptLibrary {
    registry: Handlebars<'static>,
}

impl PromptLibrary {
    /// Compile the embedded templates
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);

        let templates = [
            ("implement", embedded::IMPLEMENT),
            ("review", embedded::REVIEW),
            ("pr", embedded::PR),
            ("update_pr_description", embedded::UPDATE_PR_DESCRIPTION),
            ("estimate", embedded::ESTIMATE),
            ("plan", embedded::PLAN),
        ];
        for (name, template) in templates {
            registry
                .register_template_string(name, template)
                .context(format!("invalid embedded template '{}'", name))?;
        }

        Ok(Self { registry })
    }

    /// Render the prompt for a task kind
    pub fn render(&self, kind: TaskKind, context: &PromptContext) -> Result<String> {
        self.registry
            .render(&kind.to_string(), context)
            .context(format!("failed to render prompt for {}", kind))
    }

    /// Render the interactive planning prompt
    pub fn render_plan(&self, context: &PromptContext) -> Result<String> {
        self.registry
            .render("plan", context)
            .context("failed to render plan prompt")
    }
}
