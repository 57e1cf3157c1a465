//! Prompt templates for agent invocations
//!
//! Each task kind has an embedded handlebars template; the loader renders
//! it with the task's work context.

mod embedded;
mod loader;

pub use loader::{BeadRef, PromptContext, PromptLibrary};
