//! The five-stage generation pipeline run once per iteration.
//!
//! Stages run in a fixed order, each receiving the previous stage's output.
//! Only the reviewer's verdict drives control flow; everything else is
//! carried forward as context and recorded in the audit log.

pub mod provider;
pub mod stages;

use std::path::Path;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::error::ForgeResult;
use crate::host::WorkItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Strategist,
    Architect,
    Coder,
    Tester,
    Reviewer,
}

impl StageKind {
    pub const ORDER: [StageKind; 5] = [
        StageKind::Strategist,
        StageKind::Architect,
        StageKind::Coder,
        StageKind::Tester,
        StageKind::Reviewer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Strategist => "Strategist",
            StageKind::Architect => "Architect",
            StageKind::Coder => "Coder",
            StageKind::Tester => "Tester",
            StageKind::Reviewer => "Reviewer",
        }
    }

    /// Action label recorded in the audit log.
    pub fn action(&self, is_retry: bool) -> &'static str {
        match self {
            StageKind::Strategist if is_retry => "ReStrategize",
            StageKind::Strategist => "Analyze",
            StageKind::Architect => "Design",
            StageKind::Coder => "Implement",
            StageKind::Tester => "Test",
            StageKind::Reviewer => "Evaluate",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the previous iteration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousFailure {
    pub reason: String,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub approved: bool,
    pub reasons: Vec<String>,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub is_new: bool,
    pub description: String,
}

/// A file the coder reports having touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub lines: u32,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestCounts {
    pub total: u32,
    pub passing: u32,
    pub failing: u32,
}

/// Structured fields pulled out of a stage's markdown answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageReport {
    Strategy {
        approach: Option<String>,
        technology: Option<String>,
        risk: Option<String>,
    },
    Design {
        files: Vec<FileChange>,
        plan: Vec<String>,
    },
    Implementation {
        files_changed: Vec<ChangedFile>,
    },
    Tests {
        counts: TestCounts,
        issues: Vec<String>,
    },
    Review(Verdict),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub stage: StageKind,
    pub action: &'static str,
    pub provider: String,
    pub raw: String,
    pub duration: Duration,
    pub report: StageReport,
}

impl StageOutput {
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.report {
            StageReport::Review(verdict) => Some(verdict),
            _ => None,
        }
    }
}

/// Everything a stage may read while building its prompt.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub item: &'a WorkItem,
    pub project: &'a Path,
    /// Output of the stage that ran just before this one in the same pass.
    pub previous: Option<&'a StageOutput>,
    pub is_retry: bool,
    pub previous_failure: Option<&'a PreviousFailure>,
}

pub trait Stage {
    fn kind(&self) -> StageKind;
    fn execute(&self, input: &StageInput<'_>, audit: &mut dyn AuditLog) -> ForgeResult<StageOutput>;
}
