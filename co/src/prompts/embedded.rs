//! Embedded prompt templates
//!
//! Compiled into the binary; one template per task kind. Agents receive
//! the rendered text as their single instruction and report back through
//! `co task` subcommands using the CO_TASK_ID environment variable.

/// Prompt for implement tasks
pub const IMPLEMENT: &str = r#"You are implementing issues on the branch `{{branch_name}}` (based on `{{base_branch}}`) for the work "{{work_name}}".

Issues to implement:
{{#each beads}}
- {{this.id}}{{#if this.title}}: {{this.title}}{{/if}}
{{/each}}

Complexity budget: {{complexity_budget}}

Rules:
- Work only inside this workspace; commit to `{{branch_name}}`.
- Close each issue in the issue tracker as you finish it.
- When every issue is done and committed, run:
  co task complete $CO_TASK_ID
- If you cannot finish, run:
  co task fail $CO_TASK_ID --error "<one-line reason>"
"#;

/// Prompt for review tasks
pub const REVIEW: &str = r#"You are reviewing the accumulated changes on `{{branch_name}}` (against `{{base_branch}}`) for the work "{{work_name}}".

Review the full diff for correctness, missed requirements, and broken tests.

Rules:
- For every real problem you find, file a new issue in the issue tracker
  and assign it to this work. Do not fix anything yourself.
- If the changes are sound and nothing needs filing, file no issues.
- When the review is written up, run:
  co task complete $CO_TASK_ID
"#;

/// Prompt for pr tasks
pub const PR: &str = r#"Open a pull request for the work "{{work_name}}".

- Push `{{branch_name}}` and open a PR against `{{base_branch}}`.
- Summarize the implemented issues in the PR description.
- Report the PR URL back:
  co task complete $CO_TASK_ID --result <pr-url>
- On failure:
  co task fail $CO_TASK_ID --error "<one-line reason>"
"#;

/// Prompt for update-pr-description tasks
pub const UPDATE_PR_DESCRIPTION: &str = r#"The pull request {{pr_url}} for the work "{{work_name}}" has accumulated new commits on `{{branch_name}}`.

Rewrite the PR description so it covers everything the branch now contains, then run:
  co task complete $CO_TASK_ID
"#;

/// Prompt for estimate tasks
pub const ESTIMATE: &str = r#"Estimate the implementation complexity of these issues for the work "{{work_name}}":
{{#each beads}}
- {{this.id}}{{#if this.title}}: {{this.title}}{{/if}}
{{/each}}

Score the set as a whole on a 1-5 scale and report it:
  co task complete $CO_TASK_ID --complexity <score>
"#;

/// Prompt for interactive planning sessions
pub const PLAN: &str = r#"Interactive planning session for issue {{bead_id}}{{#if bead_title}} ("{{bead_title}}"){{/if}}.

Break the issue down into child issues with dependencies, sized so each child is one agent session of work. File them in the issue tracker as you go.
"#;
