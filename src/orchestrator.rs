//! Polling loop over all configured projects.
//!
//! Each cycle visits the projects in order and hands at most one eligible
//! item per project to the processor. Items that finished (approved or
//! escalated) are remembered for the life of the process; items that failed
//! sit out a cooldown before they become eligible again. Nothing here is
//! persisted: labels and pull requests on the host carry state across
//! restarts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{ForgeConfig, ProjectEntry};
use crate::error::{ForgeResult, fatal};
use crate::host::{IN_PROGRESS_LABEL, NEEDS_HUMAN_LABEL, ProjectHost, WorkItem};
use crate::notify::Notifier;
use crate::process::wait_for_rate_limit;
use crate::processor::{IssueProcessor, ProcessingOutcome};
use crate::schedule::schedule_wait;

const STOP_CHECK_SLICE: Duration = Duration::from_secs(1);

/// Anything that can take one item to a terminal outcome.
pub trait ItemProcessor {
    fn process(&self, host: &dyn ProjectHost, item: &WorkItem) -> ForgeResult<ProcessingOutcome>;
}

impl ItemProcessor for IssueProcessor {
    fn process(&self, host: &dyn ProjectHost, item: &WorkItem) -> ForgeResult<ProcessingOutcome> {
        IssueProcessor::process(self, host, item)
    }
}

/// Loop timing for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sleep after a cycle in which no project made progress.
    pub polling_interval: Duration,
    /// Shorter sleep used instead when some project errored.
    pub error_retry_interval: Duration,
    /// How long a failed item is skipped before it is retried.
    pub failure_cooldown: Duration,
    /// Provider name reported in status.
    pub provider: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(600),
            error_retry_interval: Duration::from_secs(30),
            failure_cooldown: Duration::from_secs(5 * 60),
            provider: "claude".to_string(),
        }
    }
}

/// Runtime bookkeeping for one project.
pub struct ProjectState {
    host: Box<dyn ProjectHost>,
    processed: HashSet<u64>,
    failed: HashMap<u64, DateTime<Local>>,
    last_processed: Option<u64>,
}

impl ProjectState {
    fn new(host: Box<dyn ProjectHost>) -> Self {
        Self {
            host,
            processed: HashSet::new(),
            failed: HashMap::new(),
            last_processed: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.host.path()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Some project processed an item or waited out a rate limit.
    pub progressed: bool,
    /// Some project failed before it could pick an item.
    pub errored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStatus {
    pub path: PathBuf,
    pub processed_count: usize,
    pub last_processed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub running: bool,
    pub provider: String,
    pub projects: Vec<ProjectStatus>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    processor: Box<dyn ItemProcessor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    projects: Vec<ProjectState>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        processor: Box<dyn ItemProcessor>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            processor,
            notifier,
            clock,
            stop,
            projects: Vec::new(),
        }
    }

    pub fn add_project(&mut self, host: Box<dyn ProjectHost>) {
        info!(project = %host.path().display(), "project initialized");
        self.projects.push(ProjectState::new(host));
    }

    /// Connect every enabled project; failures are logged and the project is
    /// left out. Returns how many projects were added.
    pub fn connect_projects<F>(&mut self, config: &ForgeConfig, mut connect: F) -> usize
    where
        F: FnMut(&ProjectEntry) -> ForgeResult<Box<dyn ProjectHost>>,
    {
        let before = self.projects.len();
        for entry in config.enabled_projects() {
            match connect(entry) {
                Ok(host) => self.add_project(host),
                Err(e) => error!(project = %entry.path.display(), error = %e, "failed to initialize project"),
            }
        }
        let disabled = config.projects.len() - config.enabled_projects().count();
        if disabled > 0 {
            debug!(disabled, "skipped disabled projects");
        }
        self.projects.len() - before
    }

    pub fn projects(&self) -> &[ProjectState] {
        &self.projects
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        info!("stopping");
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn status(&self) -> Status {
        Status {
            running: self.is_running(),
            provider: self.config.provider.clone(),
            projects: self
                .projects
                .iter()
                .map(|p| ProjectStatus {
                    path: p.path().to_path_buf(),
                    processed_count: p.processed.len(),
                    last_processed: p.last_processed,
                })
                .collect(),
        }
    }

    /// Poll until the stop flag is raised. The flag is only checked between
    /// projects and while idling; an item in flight always runs to the end.
    pub fn run(&mut self) {
        info!(
            projects = self.projects.len(),
            provider = %self.config.provider,
            "orchestrator started"
        );
        while self.is_running() {
            let report = self.run_cycle();
            if !self.is_running() {
                break;
            }
            self.pause_after(report);
        }
        info!("orchestrator stopped");
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for index in 0..self.projects.len() {
            if !self.is_running() {
                break;
            }
            match self.process_next(index) {
                Ok(true) => report.progressed = true,
                Ok(false) => {}
                Err(err) => match err.retry_after_secs() {
                    Some(secs) => {
                        wait_for_rate_limit(self.clock.as_ref(), secs);
                        report.progressed = true;
                    }
                    None => {
                        error!(
                            project = %self.projects[index].path().display(),
                            error = %err,
                            "error processing project"
                        );
                        report.errored = true;
                    }
                },
            }
        }
        report
    }

    fn pause_after(&self, report: CycleReport) {
        if report.progressed {
            return;
        }
        let interval = if report.errored {
            info!(secs = self.config.error_retry_interval.as_secs(), "errors occurred, retrying soon");
            self.config.error_retry_interval
        } else {
            info!(secs = self.config.polling_interval.as_secs(), "no issues to process, waiting");
            self.config.polling_interval
        };
        self.sleep_while_running(interval);
    }

    fn sleep_while_running(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && self.is_running() {
            let slice = remaining.min(STOP_CHECK_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }

    /// Pick and process the next eligible item of one project. Returns whether
    /// an item was attempted.
    fn process_next(&mut self, index: usize) -> ForgeResult<bool> {
        let now = self.clock.now();
        let cooldown = self.config.failure_cooldown;
        let project = &mut self.projects[index];
        let Some(item) = select_next(project, now, cooldown)? else {
            return Ok(false);
        };

        wait_for_schedule(self.clock.as_ref(), self.notifier.as_ref(), &item);

        debug!(issue = item.number, project = %project.path().display(), "picked issue");
        match self.processor.process(project.host.as_ref(), &item) {
            Ok(outcome) => {
                project.processed.insert(item.number);
                project.failed.remove(&item.number);
                project.last_processed = Some(item.number);
                match outcome {
                    ProcessingOutcome::Success { pr_number, .. } => {
                        info!(issue = item.number, pr = pr_number, "issue resolved")
                    }
                    ProcessingOutcome::Escalated { .. } => warn!(issue = item.number, "issue escalated"),
                }
            }
            Err(err) => match err.retry_after_secs() {
                Some(secs) => {
                    warn!(issue = item.number, retry_after_secs = secs, "rate limited; issue will be retried");
                    wait_for_rate_limit(self.clock.as_ref(), secs);
                }
                None => {
                    error!(issue = item.number, error = %err, "failed to process issue");
                    if let Err(label_err) = project.host.remove_label(item.number, IN_PROGRESS_LABEL) {
                        debug!(issue = item.number, error = %label_err, "failed to remove in-progress label");
                    }
                    project.failed.insert(item.number, self.clock.now());
                }
            },
        }
        Ok(true)
    }
}

/// First open item that is not done, not cooling down, not handed to a
/// human and without a linked pull request.
fn select_next(
    project: &mut ProjectState,
    now: DateTime<Local>,
    cooldown: Duration,
) -> ForgeResult<Option<WorkItem>> {
    let items = project.host.fetch_open_items()?;
    for item in items {
        if project.processed.contains(&item.number) {
            continue;
        }
        if let Some(failed_at) = project.failed.get(&item.number) {
            let elapsed = (now - *failed_at).to_std().unwrap_or_default();
            if elapsed < cooldown {
                debug!(issue = item.number, "issue in cooldown, skipping");
                continue;
            }
            project.failed.remove(&item.number);
            info!(issue = item.number, "cooldown expired, retrying");
        }
        if item.has_label(NEEDS_HUMAN_LABEL) {
            debug!(issue = item.number, "issue needs human intervention, skipping");
            project.processed.insert(item.number);
            continue;
        }
        if let Some(pr) = project.host.existing_pull_request(item.number)? {
            debug!(issue = item.number, pr = pr.number, "issue already has a pull request, skipping");
            project.processed.insert(item.number);
            continue;
        }
        return Ok(Some(item));
    }
    Ok(None)
}

fn wait_for_schedule(clock: &dyn Clock, notifier: &dyn Notifier, item: &WorkItem) {
    let Some(scheduled) = schedule_wait(&item.title, &clock.now()) else {
        return;
    };
    info!(
        issue = item.number,
        target = %scheduled.target.format("%Y-%m-%d %H:%M"),
        wait_secs = scheduled.wait.as_secs(),
        "issue scheduled"
    );
    notifier.scheduled(item, scheduled.target);
    clock.sleep(scheduled.wait);
}

/// Process one item outside the polling loop: `number`, or the first open
/// item when none is given. Returns `None` when there is nothing open.
pub fn run_once(
    processor: &dyn ItemProcessor,
    host: &dyn ProjectHost,
    number: Option<u64>,
) -> ForgeResult<Option<(WorkItem, ProcessingOutcome)>> {
    let item = match number {
        Some(n) => host.get_item(n)?,
        None => match host.fetch_open_items()?.into_iter().next() {
            Some(item) => item,
            None => return Ok(None),
        },
    };
    let outcome = processor.process(host, &item)?;
    Ok(Some((item, outcome)))
}

/// Pick the project matching `path`, or the first one.
pub fn pick_project<'a>(entries: &'a [ProjectEntry], path: Option<&Path>) -> ForgeResult<&'a ProjectEntry> {
    match path {
        Some(path) => entries
            .iter()
            .find(|e| e.path == path)
            .ok_or_else(|| fatal(format!("project {} is not configured", path.display()))),
        None => entries
            .first()
            .ok_or_else(|| fatal("no projects configured")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::clock::testing::FakeClock;
    use crate::error::{ErrorKind, ForgeError};
    use crate::host::testing::{FakeHost, item};
    use crate::notify::testing::RecordingNotifier;

    enum Next {
        Succeed,
        Escalate,
        Fail,
        RateLimit(u64),
    }

    /// Answers from a script; falls back to success. Can raise the stop flag.
    struct FakeProcessor {
        script: Mutex<VecDeque<Next>>,
        seen: Arc<Mutex<Vec<u64>>>,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl ItemProcessor for FakeProcessor {
        fn process(&self, _host: &dyn ProjectHost, item: &WorkItem) -> ForgeResult<ProcessingOutcome> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(item.number);
            if let Some((after, stop)) = &self.stop_after {
                if seen.len() >= *after {
                    stop.store(true, Ordering::Relaxed);
                }
            }
            match self.script.lock().unwrap().pop_front().unwrap_or(Next::Succeed) {
                Next::Succeed => Ok(ProcessingOutcome::Success {
                    pr_number: 500 + item.number,
                    url: format!("https://example.test/pull/{}", 500 + item.number),
                }),
                Next::Escalate => Ok(ProcessingOutcome::Escalated { iterations: 3 }),
                Next::Fail => Err(fatal("provider crashed")),
                Next::RateLimit(secs) => Err(ForgeError::rate_limited(secs)),
            }
        }
    }

    struct Rig {
        clock: Arc<FakeClock>,
        notifier: Arc<RecordingNotifier>,
        seen: Arc<Mutex<Vec<u64>>>,
        stop: Arc<AtomicBool>,
        orchestrator: Orchestrator,
    }

    fn rig(script: Vec<Next>, stop_after: Option<usize>) -> Rig {
        let clock = Arc::new(FakeClock::at(Local.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));
        let notifier = Arc::new(RecordingNotifier::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let processor = FakeProcessor {
            script: Mutex::new(script.into()),
            seen: seen.clone(),
            stop_after: stop_after.map(|n| (n, stop.clone())),
        };
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Box::new(processor),
            notifier.clone(),
            clock.clone(),
            stop.clone(),
        );
        Rig {
            clock,
            notifier,
            seen,
            stop,
            orchestrator,
        }
    }

    fn host(path: &str, items: Vec<WorkItem>) -> (Box<FakeHost>, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        (Box::new(FakeHost::new(path, journal.clone()).with_items(items)), journal)
    }

    impl Rig {
        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }
    }

    fn labeled(number: u64, title: &str, label: &str) -> WorkItem {
        let mut it = item(number, title);
        it.labels.push(label.to_string());
        it
    }

    #[test]
    fn processes_first_eligible_item_and_remembers_it() {
        let mut rig = rig(vec![], None);
        let (h, _) = host("/p", vec![item(1, "first"), item(2, "second")]);
        rig.orchestrator.add_project(h);

        let first = rig.orchestrator.run_cycle();
        let second = rig.orchestrator.run_cycle();

        assert!(first.progressed && second.progressed);
        assert_eq!(rig.seen(), vec![1, 2]);
        let status = rig.orchestrator.status();
        assert_eq!(status.projects[0].processed_count, 2);
        assert_eq!(status.projects[0].last_processed, Some(2));
    }

    #[test]
    fn needs_human_items_are_never_selected() {
        let mut rig = rig(vec![], None);
        let (h, journal) = host("/p", vec![labeled(3, "stuck", NEEDS_HUMAN_LABEL)]);
        rig.orchestrator.add_project(h);

        for _ in 0..3 {
            assert!(!rig.orchestrator.run_cycle().progressed);
        }

        assert!(rig.seen().is_empty());
        assert_eq!(rig.orchestrator.status().projects[0].processed_count, 1);
        // Remembered after the first skip, so no repeated PR lookups.
        assert!(!journal.lock().unwrap().iter().any(|l| l.starts_with("pr?")));
    }

    #[test]
    fn items_with_linked_pull_requests_are_skipped() {
        let mut rig = rig(vec![], None);
        let (h, journal) = host("/p", vec![item(4, "has pr"), item(5, "free")]);
        h.linked_prs.lock().unwrap().insert(4);
        rig.orchestrator.add_project(h);

        rig.orchestrator.run_cycle();
        rig.orchestrator.run_cycle();

        assert_eq!(rig.seen(), vec![5]);
        let pr_checks = journal
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == "pr? #4")
            .count();
        assert_eq!(pr_checks, 1);
    }

    #[test]
    fn escalated_items_count_as_processed() {
        let mut rig = rig(vec![Next::Escalate], None);
        let (h, _) = host("/p", vec![item(6, "hard")]);
        rig.orchestrator.add_project(h);

        assert!(rig.orchestrator.run_cycle().progressed);
        assert!(!rig.orchestrator.run_cycle().progressed);
        assert_eq!(rig.seen(), vec![6]);
    }

    #[test]
    fn failed_item_cools_down_then_retries() {
        let mut rig = rig(vec![Next::Fail], None);
        let (h, journal) = host("/p", vec![item(8, "flaky")]);
        rig.orchestrator.add_project(h);

        assert!(rig.orchestrator.run_cycle().progressed);
        assert!(journal
            .lock()
            .unwrap()
            .contains(&"label- #8 issue-forge:in-progress".to_string()));

        rig.clock.advance(Duration::from_secs(4 * 60));
        assert!(!rig.orchestrator.run_cycle().progressed);
        assert_eq!(rig.seen(), vec![8]);

        rig.clock.advance(Duration::from_secs(61));
        assert!(rig.orchestrator.run_cycle().progressed);
        assert_eq!(rig.seen(), vec![8, 8]);
        assert_eq!(rig.orchestrator.status().projects[0].processed_count, 1);
    }

    #[test]
    fn failed_item_does_not_block_the_next_one() {
        let mut rig = rig(vec![Next::Fail], None);
        let (h, _) = host("/p", vec![item(1, "bad"), item(2, "good")]);
        rig.orchestrator.add_project(h);

        rig.orchestrator.run_cycle();
        rig.orchestrator.run_cycle();

        assert_eq!(rig.seen(), vec![1, 2]);
    }

    #[test]
    fn rate_limited_item_waits_and_is_retried_without_cooldown() {
        let mut rig = rig(vec![Next::RateLimit(45)], None);
        let (h, _) = host("/p", vec![item(9, "busy")]);
        rig.orchestrator.add_project(h);

        assert!(rig.orchestrator.run_cycle().progressed);
        assert_eq!(rig.clock.total_slept(), Duration::from_secs(45));
        assert_eq!(rig.orchestrator.status().projects[0].processed_count, 0);

        rig.orchestrator.run_cycle();
        assert_eq!(rig.seen(), vec![9, 9]);
    }

    #[test]
    fn rate_limited_fetch_waits_and_counts_as_progress() {
        let mut rig = rig(vec![], None);
        let (h, _) = host("/p", vec![item(1, "x")]);
        h.fail_next("fetch", ForgeError::rate_limited(20));
        rig.orchestrator.add_project(h);

        let report = rig.orchestrator.run_cycle();

        assert_eq!(
            report,
            CycleReport {
                progressed: true,
                errored: false
            }
        );
        assert_eq!(rig.clock.total_slept(), Duration::from_secs(20));
    }

    #[test]
    fn erroring_project_does_not_stop_others() {
        let mut rig = rig(vec![], None);
        let (broken, _) = host("/broken", vec![item(1, "x")]);
        broken.fail_next("fetch", fatal("500 from API"));
        let (healthy, _) = host("/healthy", vec![item(2, "y")]);
        rig.orchestrator.add_project(broken);
        rig.orchestrator.add_project(healthy);

        let report = rig.orchestrator.run_cycle();

        assert_eq!(
            report,
            CycleReport {
                progressed: true,
                errored: true
            }
        );
        assert_eq!(rig.seen(), vec![2]);
    }

    #[test]
    fn idle_cycles_sleep_for_the_polling_interval() {
        let rig = rig(vec![], None);
        rig.orchestrator.pause_after(CycleReport::default());
        assert_eq!(rig.clock.total_slept(), Duration::from_secs(600));
        assert!(rig.clock.sleeps().iter().all(|s| *s <= STOP_CHECK_SLICE));
    }

    #[test]
    fn errored_cycles_retry_sooner() {
        let rig = rig(vec![], None);
        rig.orchestrator.pause_after(CycleReport {
            progressed: false,
            errored: true,
        });
        assert_eq!(rig.clock.total_slept(), Duration::from_secs(30));
    }

    #[test]
    fn progress_skips_the_pause() {
        let rig = rig(vec![], None);
        rig.orchestrator.pause_after(CycleReport {
            progressed: true,
            errored: true,
        });
        assert!(rig.clock.sleeps().is_empty());
    }

    #[test]
    fn stopped_orchestrator_does_not_idle() {
        let rig = rig(vec![], None);
        rig.orchestrator.stop();
        rig.orchestrator.pause_after(CycleReport::default());
        assert!(rig.clock.sleeps().is_empty());
        assert!(!rig.orchestrator.status().running);
    }

    #[test]
    fn run_returns_once_stop_is_requested() {
        let mut rig = rig(vec![], Some(1));
        let (first, _) = host("/a", vec![item(1, "x")]);
        let (second, _) = host("/b", vec![item(2, "y")]);
        rig.orchestrator.add_project(first);
        rig.orchestrator.add_project(second);

        rig.orchestrator.run();

        // The stop flag is checked before moving on to the next project.
        assert_eq!(rig.seen(), vec![1]);
        assert!(rig.stop.load(Ordering::Relaxed));
    }

    #[test]
    fn scheduled_item_waits_for_its_time() {
        let mut rig = rig(vec![], None);
        let (h, _) = host("/p", vec![item(11, "PM2 Deploy release")]);
        rig.orchestrator.add_project(h);

        rig.orchestrator.run_cycle();

        assert_eq!(rig.clock.sleeps(), vec![Duration::from_secs(5 * 3600)]);
        assert_eq!(rig.notifier.events(), vec!["scheduled #11 14:00"]);
        assert_eq!(rig.seen(), vec![11]);
    }

    #[test]
    fn connect_skips_disabled_and_broken_projects() {
        let mut rig = rig(vec![], None);
        let projects = vec![
            ProjectEntry {
                path: "/ok".into(),
                base_branch: "main".into(),
                enabled: true,
            },
            ProjectEntry {
                path: "/off".into(),
                base_branch: "main".into(),
                enabled: false,
            },
            ProjectEntry {
                path: "/bad".into(),
                base_branch: "main".into(),
                enabled: true,
            },
        ];
        let config = ForgeConfig {
            projects,
            ..Default::default()
        };

        let mut attempted = Vec::new();
        let added = rig.orchestrator.connect_projects(&config, |entry| {
            attempted.push(entry.path.clone());
            if entry.path == Path::new("/bad") {
                return Err(fatal("cannot parse GitHub remote URL"));
            }
            let (h, _) = host(entry.path.to_str().unwrap(), vec![]);
            Ok(h as Box<dyn ProjectHost>)
        });

        assert_eq!(added, 1);
        assert_eq!(attempted, vec![PathBuf::from("/ok"), PathBuf::from("/bad")]);
        let paths: Vec<PathBuf> = rig
            .orchestrator
            .status()
            .projects
            .into_iter()
            .map(|p| p.path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/ok")]);
    }

    #[test]
    fn status_reports_provider_and_running() {
        let rig = rig(vec![], None);
        let status = rig.orchestrator.status();
        assert!(status.running);
        assert_eq!(status.provider, "claude");
        assert!(status.projects.is_empty());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], true);
    }

    #[test]
    fn run_once_uses_given_or_first_issue() {
        let rig = rig(vec![], None);
        let (h, _) = host("/p", vec![item(3, "a"), item(4, "b")]);
        let processor = &*rig.orchestrator.processor;

        let (picked, _) = run_once(processor, h.as_ref(), None).unwrap().unwrap();
        assert_eq!(picked.number, 3);
        let (picked, outcome) = run_once(processor, h.as_ref(), Some(4)).unwrap().unwrap();
        assert_eq!(picked.number, 4);
        assert!(matches!(outcome, ProcessingOutcome::Success { pr_number: 504, .. }));

        let (empty, _) = host("/q", vec![]);
        assert!(run_once(processor, empty.as_ref(), None).unwrap().is_none());
        let err = run_once(processor, empty.as_ref(), Some(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn pick_project_by_path_or_first() {
        let entries = vec![
            ProjectEntry {
                path: "/one".into(),
                base_branch: "main".into(),
                enabled: true,
            },
            ProjectEntry {
                path: "/two".into(),
                base_branch: "dev".into(),
                enabled: true,
            },
        ];
        assert_eq!(pick_project(&entries, None).unwrap().path, PathBuf::from("/one"));
        assert_eq!(
            pick_project(&entries, Some(Path::new("/two"))).unwrap().base_branch,
            "dev"
        );
        assert!(pick_project(&entries, Some(Path::new("/three"))).is_err());
        assert!(pick_project(&[], None).is_err());
    }
}
