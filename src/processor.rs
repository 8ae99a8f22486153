//! Drives one work item through bounded pipeline iterations.
//!
//! The item is labeled in progress, its feature branch is reconciled, then the
//! stages run once per iteration until the reviewer approves or the iteration
//! budget runs out. A rate limit pauses and repeats the same iteration without
//! spending budget. Any other error rolls the in-progress label back and
//! propagates.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::audit::{self, AuditLog, AuditLogFactory, FinalSummary};
use crate::clock::Clock;
use crate::error::{ForgeResult, fatal};
use crate::host::{IN_PROGRESS_LABEL, NEEDS_HUMAN_LABEL, ProjectHost, WorkItem, branch_name};
use crate::notify::Notifier;
use crate::pipeline::{PreviousFailure, Stage, StageInput, StageOutput, Verdict};
use crate::process::wait_for_rate_limit;

pub const APPROVED_RESULT: &str = "APPROVED - PR Created";
pub const ESCALATED_RESULT: &str = "ESCALATED - Human intervention required";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Success { pr_number: u64, url: String },
    Escalated { iterations: u32 },
}

pub struct IssueProcessor {
    stages: Vec<Box<dyn Stage>>,
    audit: Box<dyn AuditLogFactory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    max_iterations: u32,
}

impl IssueProcessor {
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        audit: Box<dyn AuditLogFactory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        max_iterations: u32,
    ) -> Self {
        Self {
            stages,
            audit,
            notifier,
            clock,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn process(&self, host: &dyn ProjectHost, item: &WorkItem) -> ForgeResult<ProcessingOutcome> {
        info!(
            issue = item.number,
            title = %item.title,
            project = %host.path().display(),
            "processing issue"
        );
        host.add_label(item.number, IN_PROGRESS_LABEL)?;

        let result = self.drive(host, item);
        if let Err(err) = &result {
            error!(issue = item.number, error = %err, "processing failed; removing in-progress label");
            if let Err(label_err) = host.remove_label(item.number, IN_PROGRESS_LABEL) {
                warn!(issue = item.number, error = %label_err, "failed to remove in-progress label");
            }
        }
        result
    }

    fn drive(&self, host: &dyn ProjectHost, item: &WorkItem) -> ForgeResult<ProcessingOutcome> {
        let branch = branch_name(item.number);
        host.prepare_branch(&branch)?;

        let started = self.clock.now();
        let mut audit = self.audit.open(host.path(), item, self.max_iterations)?;
        let mut previous_failure: Option<PreviousFailure> = None;
        let mut approved = false;

        while audit.current_iteration() < self.max_iterations {
            let iteration = audit.start_new_iteration()?;
            info!(issue = item.number, iteration, max = self.max_iterations, "starting iteration");
            self.notifier
                .issue_started(item, host.path(), iteration, self.max_iterations);

            let pass = self.run_pass(
                host.path(),
                item,
                iteration > 1,
                previous_failure.as_ref(),
                audit.as_mut(),
            );
            match pass {
                Ok(verdict) if verdict.approved => {
                    info!(issue = item.number, iteration, "iteration approved");
                    approved = true;
                    break;
                }
                Ok(verdict) => {
                    warn!(issue = item.number, iteration, "iteration rejected");
                    previous_failure = Some(failure_from(verdict));
                }
                Err(err) => match err.retry_after_secs() {
                    Some(secs) => {
                        warn!(issue = item.number, iteration, retry_after_secs = secs, "rate limited mid-iteration");
                        wait_for_rate_limit(self.clock.as_ref(), secs);
                        audit.rewind_iteration()?;
                    }
                    None => return Err(err),
                },
            }
        }

        let total_duration = (self.clock.now() - started).to_std().unwrap_or_default();
        if approved {
            self.finish_success(host, item, &branch, audit.as_mut(), total_duration)
        } else {
            self.escalate(host, item, audit.as_mut(), total_duration)
        }
    }

    /// One pass through every stage; returns the reviewer's verdict.
    fn run_pass(
        &self,
        project: &Path,
        item: &WorkItem,
        is_retry: bool,
        previous_failure: Option<&PreviousFailure>,
        audit: &mut dyn AuditLog,
    ) -> ForgeResult<Verdict> {
        let mut previous: Option<StageOutput> = None;
        for stage in &self.stages {
            let input = StageInput {
                item,
                project,
                previous: previous.as_ref(),
                is_retry,
                previous_failure,
            };
            let output = stage.execute(&input, audit)?;
            self.notifier.stage_response(item, &output);
            previous = Some(output);
        }
        previous
            .as_ref()
            .and_then(StageOutput::verdict)
            .cloned()
            .ok_or_else(|| fatal("pipeline finished without a review verdict"))
    }

    fn finish_success(
        &self,
        host: &dyn ProjectHost,
        item: &WorkItem,
        branch: &str,
        audit: &mut dyn AuditLog,
        total_duration: std::time::Duration,
    ) -> ForgeResult<ProcessingOutcome> {
        let iterations = audit.current_iteration();
        audit.add_final_summary(&FinalSummary {
            iterations,
            total_duration,
            result: APPROVED_RESULT.to_string(),
        })?;
        host.commit_and_push(&format!("fix: resolve issue #{}", item.number))?;
        let pr = host.create_pull_request(
            &format!("Fix #{}: {}", item.number, item.title),
            &pull_request_body(item.number),
            branch,
        )?;
        host.remove_label(item.number, IN_PROGRESS_LABEL)?;

        info!(issue = item.number, pr = pr.number, url = %pr.url, "pull request created");
        let outcome = ProcessingOutcome::Success {
            pr_number: pr.number,
            url: pr.url,
        };
        self.notifier.completed(item, &outcome);
        Ok(outcome)
    }

    fn escalate(
        &self,
        host: &dyn ProjectHost,
        item: &WorkItem,
        audit: &mut dyn AuditLog,
        total_duration: std::time::Duration,
    ) -> ForgeResult<ProcessingOutcome> {
        let iterations = audit.current_iteration();
        audit.add_final_summary(&FinalSummary {
            iterations,
            total_duration,
            result: ESCALATED_RESULT.to_string(),
        })?;
        let message = format!("docs: issue #{} escalated - needs human intervention", item.number);
        if let Err(err) = host.commit_and_push(&message) {
            warn!(issue = item.number, error = %err, "failed to push audit log for escalated issue");
        }
        host.add_comment(item.number, &escalation_comment(self.max_iterations, item.number))?;
        host.remove_label(item.number, IN_PROGRESS_LABEL)?;
        host.add_label(item.number, NEEDS_HUMAN_LABEL)?;

        warn!(issue = item.number, attempts = self.max_iterations, "escalated to a human");
        let outcome = ProcessingOutcome::Escalated { iterations };
        self.notifier.completed(item, &outcome);
        Ok(outcome)
    }
}

fn failure_from(verdict: Verdict) -> PreviousFailure {
    let reason = if verdict.reasons.is_empty() {
        "Unknown".to_string()
    } else {
        verdict.reasons.join(", ")
    };
    PreviousFailure {
        reason,
        feedback: verdict.feedback,
    }
}

fn audit_path(number: u64) -> String {
    audit::relative_path(number).display().to_string()
}

pub fn pull_request_body(number: u64) -> String {
    format!(
        "## Summary\nThis PR addresses issue #{number}.\n\n\
         ## Changes\nSee the implementation details in the linked issue.\n\n\
         ## Memory File\nThe full agent collaboration log is available in `{}`\n\n\
         ---\n*Automated by Issue Forge*",
        audit_path(number)
    )
}

pub fn escalation_comment(max_iterations: u32, number: u64) -> String {
    format!(
        "## Issue Forge - Escalation Required\n\n\
         After {max_iterations} attempts, Issue Forge was unable to fully resolve this issue automatically.\n\n\
         Please review the agent collaboration log in `{}` for details on what was attempted.\n\n\
         ---\n*Automated by Issue Forge*",
        audit_path(number)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, Local, TimeZone};

    use super::*;
    use crate::audit::AgentEntry;
    use crate::audit::testing::MemoryAuditFactory;
    use crate::clock::testing::FakeClock;
    use crate::error::{ErrorKind, ForgeError};
    use crate::host::testing::{FakeHost, item};
    use crate::pipeline::{StageKind, StageReport, TestCounts};

    #[derive(Debug)]
    enum Step {
        Ok,
        Approve,
        Reject(&'static str),
        RateLimit(u64),
        Fail,
    }

    type Script = Arc<Mutex<VecDeque<Step>>>;

    /// Pops one step per call from a script shared by the whole pipeline.
    struct ScriptedStage {
        kind: StageKind,
        script: Script,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Stage for ScriptedStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn execute(&self, input: &StageInput<'_>, audit: &mut dyn AuditLog) -> ForgeResult<StageOutput> {
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
            let mut line = format!("stage {}", self.kind);
            if self.kind == StageKind::Strategist {
                line.push_str(&format!(" retry={}", input.is_retry));
                if let Some(failure) = input.previous_failure {
                    line.push_str(&format!(" after={}", failure.reason));
                }
            }
            self.journal.lock().unwrap().push(line);

            let report = match step {
                Step::RateLimit(secs) => return Err(ForgeError::rate_limited(secs)),
                Step::Fail => return Err(fatal("provider crashed")),
                Step::Approve => StageReport::Review(Verdict {
                    approved: true,
                    ..Default::default()
                }),
                Step::Reject(reason) => StageReport::Review(Verdict {
                    approved: false,
                    reasons: if reason.is_empty() { vec![] } else { vec![reason.to_string()] },
                    feedback: vec!["try harder".into()],
                }),
                Step::Ok => StageReport::Tests {
                    counts: TestCounts::default(),
                    issues: vec![],
                },
            };
            audit.add_agent_entry(AgentEntry {
                stage: self.kind.name(),
                provider: "fake",
                action: self.kind.action(input.is_retry),
                duration: Duration::from_secs(1),
                content: "ok",
            })?;
            Ok(StageOutput {
                stage: self.kind,
                action: self.kind.action(input.is_retry),
                provider: "fake".into(),
                raw: "ok".into(),
                duration: Duration::from_secs(1),
                report,
            })
        }
    }

    /// Writes completions into the shared journal so ordering is observable.
    struct JournalNotifier(Arc<Mutex<Vec<String>>>);

    impl Notifier for JournalNotifier {
        fn scheduled(&self, _item: &WorkItem, _target: DateTime<Local>) {}

        fn issue_started(&self, item: &WorkItem, _project: &Path, iteration: u32, max: u32) {
            self.0
                .lock()
                .unwrap()
                .push(format!("notify started #{} {iteration}/{max}", item.number));
        }

        fn stage_response(&self, _item: &WorkItem, _output: &StageOutput) {}

        fn completed(&self, item: &WorkItem, outcome: &ProcessingOutcome) {
            self.0
                .lock()
                .unwrap()
                .push(format!("notify completed #{} {outcome:?}", item.number));
        }
    }

    struct Rig {
        journal: Arc<Mutex<Vec<String>>>,
        script: Script,
        clock: Arc<FakeClock>,
        host: FakeHost,
        processor: IssueProcessor,
    }

    impl Rig {
        fn new(max_iterations: u32) -> Self {
            let journal = Arc::new(Mutex::new(Vec::new()));
            let script: Script = Arc::new(Mutex::new(VecDeque::new()));
            let clock = Arc::new(FakeClock::at(Local.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));
            let stages = StageKind::ORDER
                .iter()
                .map(|kind| {
                    Box::new(ScriptedStage {
                        kind: *kind,
                        script: script.clone(),
                        journal: journal.clone(),
                    }) as Box<dyn Stage>
                })
                .collect();
            let audit = MemoryAuditFactory {
                events: journal.clone(),
            };
            let processor = IssueProcessor::new(
                stages,
                Box::new(audit),
                Arc::new(JournalNotifier(journal.clone())),
                clock.clone(),
                max_iterations,
            );
            Self {
                host: FakeHost::new("/work/app", journal.clone()),
                journal,
                script,
                clock,
                processor,
            }
        }

        /// Queue one full pass ending in `verdict`.
        fn pass(&self, verdict: Step) {
            let mut script = self.script.lock().unwrap();
            for _ in 0..4 {
                script.push_back(Step::Ok);
            }
            script.push_back(verdict);
        }

        fn queue(&self, step: Step) {
            self.script.lock().unwrap().push_back(step);
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        fn run(&self) -> ForgeResult<ProcessingOutcome> {
            self.processor.process(&self.host, &item(7, "Fix login"))
        }

        fn position(&self, line: &str) -> usize {
            self.journal()
                .iter()
                .position(|l| l == line)
                .unwrap_or_else(|| panic!("missing journal line {line:?}: {:#?}", self.journal()))
        }
    }

    #[test]
    fn approval_on_first_pass_opens_pull_request() {
        let rig = Rig::new(3);
        rig.pass(Step::Approve);

        let outcome = rig.run().unwrap();

        assert_eq!(
            outcome,
            ProcessingOutcome::Success {
                pr_number: 100,
                url: "https://example.test/pull/100".into()
            }
        );
        let journal = rig.journal();
        assert_eq!(journal[0], "label+ #7 issue-forge:in-progress");
        assert_eq!(journal[1], "branch issue-forge/issue-7");
        assert_eq!(journal[2], "iteration 1");
        assert!(journal.contains(&"create-pr Fix #7: Fix login <- issue-forge/issue-7".to_string()));
        assert!(!journal.iter().any(|l| l.contains("needs-human")));
    }

    #[test]
    fn success_finalizes_in_order() {
        let rig = Rig::new(3);
        rig.pass(Step::Approve);
        rig.run().unwrap();

        let summary = rig.position("summary 1 APPROVED - PR Created");
        let commit = rig.position("commit fix: resolve issue #7");
        let pr = rig.position("create-pr Fix #7: Fix login <- issue-forge/issue-7");
        let unlabel = rig.position("label- #7 issue-forge:in-progress");
        let notify = rig.position(
            "notify completed #7 Success { pr_number: 100, url: \"https://example.test/pull/100\" }",
        );
        assert!(summary < commit);
        assert!(commit < pr);
        assert!(pr < unlabel);
        assert!(unlabel < notify);
    }

    #[test]
    fn rejection_feeds_reasons_into_next_strategy() {
        let rig = Rig::new(3);
        rig.pass(Step::Reject("no tests"));
        rig.pass(Step::Approve);

        rig.run().unwrap();

        let journal = rig.journal();
        assert!(journal.contains(&"stage Strategist retry=false".to_string()));
        assert!(journal.contains(&"stage Strategist retry=true after=no tests".to_string()));
        assert!(journal.contains(&"summary 2 APPROVED - PR Created".to_string()));
    }

    #[test]
    fn missing_reasons_become_unknown() {
        let rig = Rig::new(2);
        rig.pass(Step::Reject(""));
        rig.pass(Step::Approve);

        rig.run().unwrap();

        assert!(rig
            .journal()
            .contains(&"stage Strategist retry=true after=Unknown".to_string()));
    }

    #[test]
    fn exhausted_budget_escalates() {
        let rig = Rig::new(2);
        rig.pass(Step::Reject("a"));
        rig.pass(Step::Reject("b"));

        let outcome = rig.run().unwrap();

        assert_eq!(outcome, ProcessingOutcome::Escalated { iterations: 2 });
        let summary = rig.position("summary 2 ESCALATED - Human intervention required");
        let commit = rig.position("commit docs: issue #7 escalated - needs human intervention");
        let comment = rig.position("comment #7 ## Issue Forge - Escalation Required");
        let unlabel = rig.position("label- #7 issue-forge:in-progress");
        let needs_human = rig.position("label+ #7 issue-forge:needs-human");
        let notify = rig.position("notify completed #7 Escalated { iterations: 2 }");
        assert!(summary < commit && commit < comment && comment < unlabel);
        assert!(unlabel < needs_human && needs_human < notify);
        assert_eq!(
            rig.journal().iter().filter(|l| l.starts_with("stage Reviewer")).count(),
            2
        );
        assert!(!rig.journal().iter().any(|l| l.starts_with("create-pr")));
    }

    #[test]
    fn escalation_survives_failed_audit_commit() {
        let rig = Rig::new(1);
        rig.pass(Step::Reject("a"));
        rig.host.fail_next("commit", fatal("push rejected"));

        let outcome = rig.run().unwrap();

        assert_eq!(outcome, ProcessingOutcome::Escalated { iterations: 1 });
        assert!(rig.journal().contains(&"label+ #7 issue-forge:needs-human".to_string()));
    }

    #[test]
    fn rate_limit_repeats_iteration_without_spending_budget() {
        let rig = Rig::new(2);
        rig.queue(Step::Ok);
        rig.queue(Step::Ok);
        rig.queue(Step::RateLimit(25));
        rig.pass(Step::Reject("a"));
        rig.pass(Step::Approve);

        let outcome = rig.run().unwrap();

        assert!(matches!(outcome, ProcessingOutcome::Success { .. }));
        let iterations: Vec<String> = rig
            .journal()
            .into_iter()
            .filter(|l| l.starts_with("iteration ") || l.starts_with("rewind "))
            .collect();
        assert_eq!(iterations, vec!["iteration 1", "rewind 1", "iteration 1", "iteration 2"]);
        assert!(rig.journal().contains(&"summary 2 APPROVED - PR Created".to_string()));
        assert_eq!(rig.clock.total_slept(), Duration::from_secs(25));
        // Nothing after the coder ran in the interrupted pass.
        let first_pass: Vec<String> = rig
            .journal()
            .into_iter()
            .skip_while(|l| l != "iteration 1")
            .take_while(|l| l != "rewind 1")
            .filter(|l| l.starts_with("stage "))
            .collect();
        assert_eq!(
            first_pass,
            vec!["stage Strategist retry=false", "stage Architect", "stage Coder"]
        );
    }

    #[test]
    fn every_iteration_announces_itself() {
        let rig = Rig::new(2);
        rig.pass(Step::Reject("a"));
        rig.pass(Step::Reject("b"));
        rig.run().unwrap();
        let started: Vec<String> = rig
            .journal()
            .into_iter()
            .filter(|l| l.starts_with("notify started"))
            .collect();
        assert_eq!(started, vec!["notify started #7 1/2", "notify started #7 2/2"]);
    }

    #[test]
    fn fatal_stage_error_rolls_back_label() {
        let rig = Rig::new(3);
        rig.queue(Step::Ok);
        rig.queue(Step::Fail);

        let err = rig.run().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fatal);
        let journal = rig.journal();
        assert_eq!(journal.last().unwrap(), "label- #7 issue-forge:in-progress");
        assert!(!journal.iter().any(|l| l.starts_with("iteration 2")));
        assert!(!journal.iter().any(|l| l.starts_with("summary")));
    }

    #[test]
    fn branch_failure_rolls_back_label() {
        let rig = Rig::new(3);
        rig.host.fail_next("branch", fatal("every strategy failed"));

        assert!(rig.run().is_err());

        assert_eq!(
            rig.journal(),
            vec![
                "label+ #7 issue-forge:in-progress",
                "branch issue-forge/issue-7",
                "label- #7 issue-forge:in-progress",
            ]
        );
    }

    #[test]
    fn pull_request_failure_rolls_back_label() {
        let rig = Rig::new(1);
        rig.pass(Step::Approve);
        rig.host.fail_next("create-pr", fatal("validation failed"));

        assert!(rig.run().is_err());

        assert_eq!(rig.journal().last().unwrap(), "label- #7 issue-forge:in-progress");
        assert!(!rig.journal().iter().any(|l| l.starts_with("notify completed")));
    }

    #[test]
    fn bodies_reference_the_audit_log() {
        assert!(pull_request_body(7).contains("`.issue-forge/issue-7.md`"));
        assert!(pull_request_body(7).starts_with("## Summary\nThis PR addresses issue #7."));
        let comment = escalation_comment(3, 7);
        assert!(comment.contains("After 3 attempts, Issue Forge was unable"));
        assert!(comment.ends_with("*Automated by Issue Forge*"));
    }
}
