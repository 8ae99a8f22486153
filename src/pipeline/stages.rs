//! Prompt construction and answer parsing for the five pipeline stages.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::info;

use super::{
    ChangedFile, FileChange, PreviousFailure, Stage, StageInput, StageKind, StageOutput,
    StageReport, TestCounts, Verdict,
};
use crate::audit::{AgentEntry, AuditLog, Decision};
use crate::error::{ForgeResult, fatal};
use crate::host::WorkItem;
use crate::pipeline::provider::Provider;

/// One stage backed by an AI provider.
pub struct AgentStage {
    kind: StageKind,
    provider: Arc<dyn Provider>,
}

impl AgentStage {
    pub fn new(kind: StageKind, provider: Arc<dyn Provider>) -> Self {
        Self { kind, provider }
    }
}

/// The standard pipeline, every stage sharing one provider.
pub fn standard_stages(provider: Arc<dyn Provider>) -> Vec<Box<dyn Stage>> {
    StageKind::ORDER
        .iter()
        .map(|kind| Box::new(AgentStage::new(*kind, provider.clone())) as Box<dyn Stage>)
        .collect()
}

impl Stage for AgentStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, input: &StageInput<'_>, audit: &mut dyn AuditLog) -> ForgeResult<StageOutput> {
        let action = self.kind.action(input.is_retry);
        info!(stage = %self.kind, action, issue = input.item.number, "stage starting");

        let prompt = build_prompt(self.kind, input, audit.content())?;
        let completion = self.provider.complete(&prompt, input.project)?;
        let report = parse_report(self.kind, &completion.output);

        audit.add_agent_entry(AgentEntry {
            stage: self.kind.name(),
            provider: &completion.provider,
            action,
            duration: completion.duration,
            content: &completion.output,
        })?;

        if let StageReport::Review(verdict) = &report {
            if let Some(decision) = extract_decision(&completion.output) {
                audit.add_decision(decision, &verdict.reasons, &verdict.feedback)?;
            }
            info!(
                issue = input.item.number,
                approved = verdict.approved,
                "review completed"
            );
        }

        info!(stage = %self.kind, action, secs = completion.duration.as_secs(), "stage completed");
        Ok(StageOutput {
            stage: self.kind,
            action,
            provider: completion.provider,
            raw: completion.output,
            duration: completion.duration,
            report,
        })
    }
}

fn build_prompt(kind: StageKind, input: &StageInput<'_>, memory: &str) -> ForgeResult<String> {
    if kind == StageKind::Strategist {
        return Ok(match (input.is_retry, input.previous_failure) {
            (true, Some(failure)) => restrategize_prompt(input.item, memory, failure),
            _ => analyze_prompt(input.item),
        });
    }
    let previous = input
        .previous
        .ok_or_else(|| fatal(format!("{kind} stage needs the output of the stage before it")))?;
    Ok(match kind {
        StageKind::Architect => design_prompt(input.item, &previous.raw),
        StageKind::Coder => implement_prompt(input.item, &previous.raw),
        StageKind::Tester => test_prompt(input.item, &previous.raw),
        _ => review_prompt(input.item, memory, &previous.raw),
    })
}

fn parse_report(kind: StageKind, output: &str) -> StageReport {
    match kind {
        StageKind::Strategist => StageReport::Strategy {
            approach: extract_field(output, "Approach"),
            technology: extract_field(output, "Technology"),
            risk: extract_field(output, "Risk"),
        },
        StageKind::Architect => StageReport::Design {
            files: extract_file_changes(output),
            plan: section(output, "### Implementation Plan")
                .map(numbered_items)
                .unwrap_or_default(),
        },
        StageKind::Coder => StageReport::Implementation {
            files_changed: extract_changed_files(output),
        },
        StageKind::Tester => StageReport::Tests {
            counts: extract_test_counts(output),
            issues: section(output, "### Issues Found")
                .map(bullet_items)
                .unwrap_or_default(),
        },
        StageKind::Reviewer => StageReport::Review(parse_verdict(output)),
    }
}

fn issue_header(item: &WorkItem) -> String {
    format!("## Issue #{}: {}\n\n", item.number, item.title)
}

fn description(item: &WorkItem) -> &str {
    if item.body.trim().is_empty() {
        "No description provided."
    } else {
        &item.body
    }
}

fn analyze_prompt(item: &WorkItem) -> String {
    let labels = if item.labels.is_empty() {
        "none".to_string()
    } else {
        item.labels.join(", ")
    };
    let mut prompt = String::from(
        "You are a Strategist Agent. Analyze this GitHub issue and create an implementation strategy.\n\n",
    );
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("{}\n\n## Labels\n{labels}\n\n", description(item)));
    prompt.push_str(
        "## Your Task\n\
         1. Analyze the issue requirements\n\
         2. Decide on the best approach to solve it\n\
         3. Identify potential risks and challenges\n\
         4. Consider alternative approaches\n\n\
         ## Output Format\n\
         Provide your analysis in the following structure:\n\n\
         ### Issue Analysis\n\
         [Summarize what needs to be done]\n\n\
         ### Strategy Decision\n\
         **Approach**: [Your chosen approach]\n\
         **Technology**: [Key technologies/libraries to use]\n\
         **Risk**: [Main risks to consider]\n\n\
         ### Alternatives Considered\n\
         1. [Alternative 1 and why not chosen]\n\
         2. [Alternative 2 and why not chosen]\n\n\
         ### Success Criteria\n\
         - [Criterion 1]\n\
         - [Criterion 2]\n",
    );
    prompt
}

fn restrategize_prompt(item: &WorkItem, memory: &str, failure: &PreviousFailure) -> String {
    let mut prompt = String::from(
        "You are a Strategist Agent. The previous implementation attempt failed. \
         Analyze the failure and create a new strategy.\n\n",
    );
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("{}\n\n", description(item)));
    prompt.push_str(&format!("## Previous Attempt Context\n{memory}\n\n"));
    let reason = if failure.reason.is_empty() {
        "Unknown failure reason"
    } else {
        &failure.reason
    };
    prompt.push_str(&format!("## Previous Failure\n{reason}\n\n"));
    if !failure.feedback.is_empty() {
        prompt.push_str(&format!(
            "### Reviewer Feedback\n{}\n\n",
            failure.feedback.join("\n")
        ));
    }
    prompt.push_str(
        "## Your Task\n\
         1. Analyze why the previous attempt failed\n\
         2. Identify the root cause\n\
         3. Develop a NEW strategy that avoids the previous pitfalls\n\
         4. Consider more robust approaches\n\n\
         ## Output Format\n\
         Provide your analysis in the following structure:\n\n\
         ### Failure Analysis\n\
         **Root Cause**: [What fundamentally went wrong]\n\
         **Contributing Factors**: [What led to the failure]\n\n\
         ### Strategy Revision\n\
         **New Approach**: [How this differs from before]\n\
         **Why This Will Work**: [Evidence this approach is better]\n\n\
         ### Risk Mitigation\n\
         - [How you'll avoid previous mistakes]\n\
         - [Additional safeguards]\n",
    );
    prompt
}

fn design_prompt(item: &WorkItem, strategy: &str) -> String {
    let mut prompt = String::from(
        "You are an Architect Agent. Based on the strategy, create a detailed implementation design.\n\n",
    );
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("## Strategy Context\n{strategy}\n\n"));
    prompt.push_str(
        "## Your Task\n\
         1. Transform the strategy into a concrete implementation design\n\
         2. Define the file structure and changes needed\n\
         3. Specify API contracts if applicable\n\
         4. Create a step-by-step implementation plan\n\n\
         ## Output Format\n\
         Provide your design in the following structure:\n\n\
         ### Design Overview\n\
         [High-level description of the implementation]\n\n\
         ### File Changes\n\
         List all files to create or modify:\n\
         - `path/to/file` - [description of changes]\n\
         - `path/to/new-file` - NEW [what this file does]\n\n\
         ### Implementation Plan\n\
         1. [Step 1 with specific actions]\n\
         2. [Step 2 with specific actions]\n\
         3. [Continue...]\n\n\
         ### API/Interface Design\n\
         [If applicable, define interfaces, types, or API contracts]\n\n\
         ### Dependencies\n\
         [Any new dependencies needed and why]\n",
    );
    prompt
}

fn implement_prompt(item: &WorkItem, design: &str) -> String {
    let mut prompt =
        String::from("You are a Coder Agent. Implement the solution based on the design.\n\n");
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("## Design to Implement\n{design}\n\n"));
    prompt.push_str(
        "## Your Task\n\
         1. Create and modify files according to the design\n\
         2. Write clean, well-structured code\n\
         3. Follow existing project conventions\n\
         4. Ensure code is ready for testing\n\n\
         ## Important Guidelines\n\
         - Use best practices for the project's language/framework\n\
         - Handle edge cases appropriately\n\
         - Add proper error handling\n\
         - Follow security best practices\n\
         - Do NOT add comments to the code unless absolutely necessary\n\
         - Make code self-documenting through clear naming\n\n\
         ## Output Format\n\
         After implementing, summarize what was done:\n\n\
         ### Files Created/Modified\n\
         - `path/to/file` (X lines) - NEW/MODIFIED [brief description]\n\n\
         ### Key Implementation Details\n\
         [Describe any important decisions made during implementation]\n\n\
         ### Notes for Tester\n\
         [Any specific test scenarios to focus on]\n",
    );
    prompt
}

fn test_prompt(item: &WorkItem, implementation: &str) -> String {
    let mut prompt =
        String::from("You are a Tester Agent. Write and run tests for the implementation.\n\n");
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("## Implementation Summary\n{implementation}\n\n"));
    prompt.push_str(
        "## Your Task\n\
         1. Write comprehensive tests for the new/modified code\n\
         2. Run the test suite\n\
         3. Report test results and coverage\n\
         4. Identify any issues found during testing\n\n\
         ## Testing Guidelines\n\
         - Test happy path scenarios\n\
         - Test edge cases and error conditions\n\
         - Test integration between components\n\
         - Verify security requirements if applicable\n\
         - Aim for good coverage of new code\n\n\
         ## Output Format\n\
         Provide test results in the following structure:\n\n\
         ### Tests Written\n\
         - `path/to/test` - [what it tests]\n\n\
         ### Test Results\n\
         - Total: X tests\n\
         - Passing: X\n\
         - Failing: X\n\n\
         ### Coverage\n\
         [Coverage percentage or summary]\n\n\
         ### Issues Found\n\
         [List any bugs or issues discovered during testing]\n\n\
         ### Test Commands Used\n\
         ```bash\n\
         [Commands run to execute tests]\n\
         ```\n",
    );
    prompt
}

fn review_prompt(item: &WorkItem, memory: &str, test_results: &str) -> String {
    let mut prompt = String::from(
        "You are a Reviewer Agent. Evaluate the implementation and decide whether to approve or reject.\n\n",
    );
    prompt.push_str(&issue_header(item));
    prompt.push_str(&format!("## Full Context\n{memory}\n\n"));
    prompt.push_str(&format!("## Test Results Summary\n{test_results}\n\n"));
    prompt.push_str(
        "## Your Task\n\
         1. Review all changes made during this iteration\n\
         2. Verify the implementation meets the issue requirements\n\
         3. Check for code quality, security, and best practices\n\
         4. Make a final decision: APPROVE or REJECT\n\n\
         ## Evaluation Criteria\n\
         - [ ] Meets issue requirements\n\
         - [ ] Code quality and maintainability\n\
         - [ ] Security best practices\n\
         - [ ] Error handling\n\
         - [ ] Test coverage adequate\n\
         - [ ] No obvious bugs or issues\n\n\
         ## Output Format\n\
         Provide your evaluation:\n\n\
         ### Code Review\n\
         [Your assessment of the code quality and implementation]\n\n\
         ### Security Check\n\
         [Any security concerns or confirmation of security practices]\n\n\
         ### Decision: **APPROVED** or **REJECTED**\n\n\
         ### Reasons\n\
         1. [First reason for your decision]\n\
         2. [Second reason]\n\
         3. [Continue as needed]\n\n\
         ### Feedback for Next Iteration (if REJECTED)\n\
         - [Specific improvement 1]\n\
         - [Specific improvement 2]\n\
         - [File:line if applicable]\n",
    );
    prompt
}

/// Value of a `**Name**: value` field, up to the next bold field or heading.
fn extract_field(text: &str, name: &str) -> Option<String> {
    let pattern = format!(r"(?s)\*\*{}\*\*:?\s*(.+?)(?:\n\*\*|\n###|\z)", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(text)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Body under the first line starting with `heading`, up to the next `###`.
fn section<'a>(text: &'a str, heading: &str) -> Option<&'a str> {
    let start = text.find(heading)?;
    let rest = &text[start + heading.len()..];
    let body = &rest[rest.find('\n')? + 1..];
    let end = body.find("\n###").unwrap_or(body.len());
    Some(&body[..end])
}

fn numbered_items(body: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^\d+\.\s+(.+)$").unwrap());
    re.captures_iter(body)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

fn bullet_items(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('-'))
        .map(|line| line.trim().to_string())
        .collect()
}

fn extract_file_changes(text: &str) -> Vec<FileChange> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"- `([^`]+)`[ \t]*-[ \t]*(NEW[ \t]*)?(.+)").unwrap());
    re.captures_iter(text)
        .map(|caps| FileChange {
            path: caps[1].to_string(),
            is_new: caps.get(2).is_some(),
            description: caps[3].trim().to_string(),
        })
        .collect()
}

fn extract_changed_files(text: &str) -> Vec<ChangedFile> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)- `([^`]+)`\s*\((\d+)\s*lines?\)\s*-\s*(NEW|MODIFIED)").unwrap()
    });
    re.captures_iter(text)
        .map(|caps| ChangedFile {
            path: caps[1].to_string(),
            lines: caps[2].parse().unwrap_or(0),
            is_new: caps[3].eq_ignore_ascii_case("new"),
        })
        .collect()
}

fn extract_test_counts(text: &str) -> TestCounts {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    let [total, passing, failing] = RE.get_or_init(|| {
        [
            Regex::new(r"(?i)Total:\s*(\d+)").unwrap(),
            Regex::new(r"(?i)Passing:\s*(\d+)").unwrap(),
            Regex::new(r"(?i)Failing:\s*(\d+)").unwrap(),
        ]
    });
    let count = |re: &Regex| {
        re.captures(text)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .unwrap_or(0)
    };
    TestCounts {
        total: count(total),
        passing: count(passing),
        failing: count(failing),
    }
}

fn extract_decision(text: &str) -> Option<Decision> {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    let [approved, rejected] = RE.get_or_init(|| {
        [
            Regex::new(r"(?i)Decision:\s*\*\*APPROVED\*\*").unwrap(),
            Regex::new(r"(?i)Decision:\s*\*\*REJECTED\*\*").unwrap(),
        ]
    });
    if approved.is_match(text) {
        Some(Decision::Approved)
    } else if rejected.is_match(text) {
        Some(Decision::Rejected)
    } else {
        None
    }
}

/// A missing decision counts as a rejection.
fn parse_verdict(text: &str) -> Verdict {
    Verdict {
        approved: extract_decision(text) == Some(Decision::Approved),
        reasons: section(text, "### Reasons")
            .map(numbered_items)
            .unwrap_or_default(),
        feedback: section(text, "### Feedback for Next Iteration")
            .map(bullet_items)
            .unwrap_or_default(),
    }
}
