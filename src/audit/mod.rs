//! Per-item markdown audit log.
//!
//! Every stage response, reviewer decision and the final outcome for an item
//! is appended to `<project>/.issue-forge/issue-<n>.md`. The file is
//! rewritten after every mutation so a crash never loses more than the
//! entry in flight, and it is committed alongside the fix so reviewers can
//! see how the change came about.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::clock::Clock;
use crate::error::ForgeResult;
use crate::host::WorkItem;

pub const AUDIT_DIR: &str = ".issue-forge";

/// Relative path of the audit log for item `number` inside a project.
pub fn relative_path(number: u64) -> PathBuf {
    Path::new(AUDIT_DIR).join(format!("issue-{number}.md"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentEntry<'a> {
    pub stage: &'a str,
    pub provider: &'a str,
    pub action: &'a str,
    pub duration: Duration,
    pub content: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalSummary {
    pub iterations: u32,
    pub total_duration: Duration,
    pub result: String,
}

pub trait AuditLog {
    /// Open the next iteration and return its 1-based index.
    fn start_new_iteration(&mut self) -> ForgeResult<u32>;
    /// Give back the current iteration after a pass was interrupted; the next
    /// `start_new_iteration` reuses the same index.
    fn rewind_iteration(&mut self) -> ForgeResult<()>;
    fn current_iteration(&self) -> u32;
    fn add_agent_entry(&mut self, entry: AgentEntry<'_>) -> ForgeResult<()>;
    fn add_decision(
        &mut self,
        decision: Decision,
        reasons: &[String],
        feedback: &[String],
    ) -> ForgeResult<()>;
    fn add_final_summary(&mut self, summary: &FinalSummary) -> ForgeResult<()>;
    fn file_path(&self) -> &Path;
    fn content(&self) -> &str;
}

/// Creates the audit log for an item when processing starts.
pub trait AuditLogFactory {
    fn open(
        &self,
        project: &Path,
        item: &WorkItem,
        max_iterations: u32,
    ) -> ForgeResult<Box<dyn AuditLog>>;
}

pub struct MarkdownAuditLog {
    path: PathBuf,
    content: String,
    iteration: u32,
    max_iterations: u32,
    clock: Arc<dyn Clock>,
}

impl MarkdownAuditLog {
    /// Start a fresh log for `item`, replacing any previous file.
    pub fn create(
        project: &Path,
        item: &WorkItem,
        max_iterations: u32,
        clock: Arc<dyn Clock>,
    ) -> ForgeResult<Self> {
        let path = project.join(relative_path(item.number));
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let labels = if item.labels.is_empty() {
            "none".to_string()
        } else {
            item.labels.join(", ")
        };
        let created = item
            .created_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let body = if item.body.trim().is_empty() {
            "No description provided."
        } else {
            item.body.as_str()
        };

        let content = format!(
            "# Issue Forge Audit Log - Issue #{number}\n\n\
             ## Issue Summary\n\
             - **Title**: {title}\n\
             - **Labels**: {labels}\n\
             - **Created**: {created}\n\
             - **Max Iterations**: {max_iterations}\n\n\
             ## Issue Body\n{body}\n\n---\n\n",
            number = item.number,
            title = item.title,
        );

        let log = Self {
            path,
            content,
            iteration: 0,
            max_iterations,
            clock,
        };
        log.save()?;
        Ok(log)
    }

    fn save(&self) -> ForgeResult<()> {
        std::fs::write(&self.path, &self.content)
            .with_context(|| format!("failed to write audit log {}", self.path.display()))?;
        Ok(())
    }

    fn append(&mut self, text: &str) -> ForgeResult<()> {
        self.content.push_str(text);
        self.save()
    }
}

impl AuditLog for MarkdownAuditLog {
    fn start_new_iteration(&mut self) -> ForgeResult<u32> {
        self.iteration += 1;
        let header = format!("\n# Iteration {}\n\n", self.iteration);
        self.append(&header)?;
        Ok(self.iteration)
    }

    fn rewind_iteration(&mut self) -> ForgeResult<()> {
        if self.iteration == 0 {
            return Ok(());
        }
        let note = format!(
            "_Iteration {} interrupted by a rate limit; it will be restarted._\n\n",
            self.iteration
        );
        self.iteration -= 1;
        self.append(&note)
    }

    fn current_iteration(&self) -> u32 {
        self.iteration
    }

    fn add_agent_entry(&mut self, entry: AgentEntry<'_>) -> ForgeResult<()> {
        let timestamp = self.clock.now().format("%Y-%m-%dT%H:%M:%S%:z");
        let mut text = format!(
            "## [{timestamp}] {} Agent ({}) - {}\n**Iteration**: {}/{}\n",
            entry.stage, entry.provider, entry.action, self.iteration, self.max_iterations
        );
        if !entry.duration.is_zero() {
            text.push_str(&format!("**Duration**: {}s\n", entry.duration.as_secs()));
        }
        text.push('\n');
        if !entry.content.is_empty() {
            text.push_str(entry.content);
            text.push('\n');
        }
        text.push_str("\n---\n\n");
        self.append(&text)
    }

    fn add_decision(
        &mut self,
        decision: Decision,
        reasons: &[String],
        feedback: &[String],
    ) -> ForgeResult<()> {
        let mut text = format!("### Decision: **{}**\n\n", decision.as_str());
        if !reasons.is_empty() {
            let heading = match decision {
                Decision::Approved => "Approval",
                Decision::Rejected => "Rejection",
            };
            text.push_str(&format!("### {heading} Reasons\n"));
            for (i, reason) in reasons.iter().enumerate() {
                text.push_str(&format!("{}. {reason}\n", i + 1));
            }
            text.push('\n');
        }
        if decision == Decision::Rejected && !feedback.is_empty() {
            text.push_str("### Feedback for Next Iteration\n");
            for item in feedback {
                text.push_str(&format!("- {item}\n"));
            }
            text.push('\n');
        }
        self.append(&text)
    }

    fn add_final_summary(&mut self, summary: &FinalSummary) -> ForgeResult<()> {
        let text = format!(
            "\n# Final Summary\n\n\
             | Metric | Value |\n\
             |--------|-------|\n\
             | Total Iterations | {} |\n\
             | Total Duration | {}s |\n\
             | Result | **{}** |\n\n",
            summary.iterations,
            summary.total_duration.as_secs(),
            summary.result
        );
        self.append(&text)
    }

    fn file_path(&self) -> &Path {
        &self.path
    }

    fn content(&self) -> &str {
        &self.content
    }
}

pub struct MarkdownAuditLogFactory {
    clock: Arc<dyn Clock>,
}

impl MarkdownAuditLogFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl AuditLogFactory for MarkdownAuditLogFactory {
    fn open(
        &self,
        project: &Path,
        item: &WorkItem,
        max_iterations: u32,
    ) -> ForgeResult<Box<dyn AuditLog>> {
        let log = MarkdownAuditLog::create(project, item, max_iterations, self.clock.clone())?;
        Ok(Box::new(log))
    }
}
