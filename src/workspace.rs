//! Git working-tree reconciliation for a project checkout.
//!
//! Before an item is worked on, the checkout is brought onto its feature
//! branch, rooted at the current remote base. Uncommitted work found along
//! the way is parked on a `temp-backup-<timestamp>` branch rather than
//! discarded. Branch creation walks a fallback chain and only fails when
//! every strategy has failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ForgeError, ForgeResult, fatal};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

pub const BACKUP_BRANCH_PREFIX: &str = "temp-backup-";
const BACKUP_COMMIT_MESSAGE: &str = "WIP: backup of uncommitted changes before issue-forge checkout";
const GIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Remote ref operations used by the highest-confidence branch strategy.
pub trait RefApi {
    /// Commit sha at the tip of `branch` on the remote.
    fn branch_head(&self, branch: &str) -> ForgeResult<String>;
    fn create_branch_ref(&self, branch: &str, sha: &str) -> ForgeResult<()>;
}

/// How the feature branch ended up checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOrigin {
    /// Resumed a branch that already existed locally.
    Existing,
    /// Created on the remote from the base tip, then fetched.
    Remote,
    /// Branched from the local base after a pull.
    LocalBase,
    /// Branched from a freshly tracked copy of the remote base.
    TrackedBase,
    /// Branched from whatever HEAD was.
    CurrentHead,
}

pub struct Workspace {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            runner,
            clock,
            timeout: GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git<I, S>(&self, args: I) -> ForgeResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("git")
            .args(args)
            .cwd(&self.path)
            .timeout(self.timeout);
        self.runner.run(&spec)
    }

    pub fn remote_url(&self) -> ForgeResult<String> {
        let out = self.git(["remote", "get-url", "origin"])?;
        Ok(out.stdout.trim().to_string())
    }

    pub fn current_branch(&self) -> ForgeResult<String> {
        let out = self.git(["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    pub fn local_branch_exists(&self, branch: &str) -> bool {
        self.git([
            "show-ref".to_string(),
            "--verify".to_string(),
            "--quiet".to_string(),
            format!("refs/heads/{branch}"),
        ])
        .is_ok()
    }

    /// Put the checkout on `feature`, creating it from `base` if needed.
    pub fn ensure_branch(
        &self,
        refs: Option<&dyn RefApi>,
        feature: &str,
        base: &str,
    ) -> ForgeResult<BranchOrigin> {
        if let Err(e) = self.git(["fetch", "origin"]) {
            warn!(error = %e, path = %self.path.display(), "git fetch failed, continuing with local refs");
        }

        self.backup_if_dirty()?;
        self.checkout_base(base);
        self.reset_pristine();

        if self.local_branch_exists(feature) {
            self.git(["checkout", feature])?;
            info!(branch = feature, "resumed existing branch");
            return Ok(BranchOrigin::Existing);
        }

        if let Some(refs) = refs {
            match self.create_via_remote(refs, feature, base) {
                Ok(()) => {
                    info!(branch = feature, base, "created branch on remote");
                    return Ok(BranchOrigin::Remote);
                }
                Err(e) => warn!(branch = feature, error = %e, "remote branch creation failed"),
            }
        }

        match self.create_from_local_base(feature, base) {
            Ok(()) => {
                info!(branch = feature, base, "created branch from local base");
                return Ok(BranchOrigin::LocalBase);
            }
            Err(e) => warn!(branch = feature, error = %e, "branching from local base failed"),
        }

        match self.create_from_tracked_base(feature, base) {
            Ok(()) => {
                info!(branch = feature, base, "created branch from tracked remote base");
                return Ok(BranchOrigin::TrackedBase);
            }
            Err(e) => warn!(branch = feature, error = %e, "branching from tracked base failed"),
        }

        let head = self.current_branch().unwrap_or_else(|_| "unknown".into());
        match self.git(["checkout", "-b", feature]) {
            Ok(_) => {
                error!(
                    branch = feature,
                    base,
                    head = %head,
                    "created branch from current HEAD; base provenance is unverified"
                );
                Ok(BranchOrigin::CurrentHead)
            }
            Err(e) => Err(fatal(format!(
                "could not create branch {feature} from {base}: every strategy failed (last: {e})"
            ))),
        }
    }

    fn create_via_remote(&self, refs: &dyn RefApi, feature: &str, base: &str) -> ForgeResult<()> {
        let sha = refs.branch_head(base)?;
        refs.create_branch_ref(feature, &sha)?;
        self.git(["fetch", "origin"])?;
        self.git(["checkout", feature])?;
        Ok(())
    }

    fn create_from_local_base(&self, feature: &str, base: &str) -> ForgeResult<()> {
        self.git(["checkout", base])?;
        if let Err(e) = self.git(["pull"]) {
            warn!(base, error = %e, "pull failed, branching from local base as-is");
        }
        self.git(["checkout", "-b", feature])?;
        Ok(())
    }

    fn create_from_tracked_base(&self, feature: &str, base: &str) -> ForgeResult<()> {
        self.track_remote_base(base)?;
        self.git(["checkout", "-b", feature])?;
        Ok(())
    }

    fn track_remote_base(&self, base: &str) -> ForgeResult<()> {
        self.git([
            "checkout".to_string(),
            "-b".to_string(),
            base.to_string(),
            "--track".to_string(),
            format!("origin/{base}"),
        ])?;
        Ok(())
    }

    /// Park uncommitted changes (tracked or untracked) on a backup branch.
    ///
    /// Returns the backup branch name when one was created. Fails when the
    /// tree status cannot be read or the backup cannot be made; callers must
    /// not reset the tree in that case.
    pub fn backup_if_dirty(&self) -> ForgeResult<Option<String>> {
        let status = self
            .git(["status", "--porcelain"])
            .map_err(|e| fatal(format!("could not read working tree status: {e}")))?
            .stdout;
        if status.trim().is_empty() {
            return Ok(None);
        }

        let name = format!(
            "{BACKUP_BRANCH_PREFIX}{}",
            self.clock.now().format("%Y%m%d-%H%M%S")
        );
        self.git(["checkout", "-b", name.as_str()])
            .and_then(|_| self.git(["add", "-A"]))
            .and_then(|_| self.git(["commit", "--no-verify", "-m", BACKUP_COMMIT_MESSAGE]))
            .map_err(|e| fatal(format!("failed to back up uncommitted changes to {name}: {e}")))?;
        warn!(branch = %name, "uncommitted changes saved to backup branch");
        Ok(Some(name))
    }

    fn checkout_base(&self, base: &str) {
        if self.git(["checkout", base]).is_ok() {
            return;
        }
        if let Err(e) = self.track_remote_base(base) {
            warn!(base, error = %e, "could not check out base branch, staying on current branch");
        }
    }

    fn reset_pristine(&self) {
        if let Err(e) = self.git(["reset", "--hard", "HEAD"]) {
            warn!(error = %e, "git reset failed");
        }
        if let Err(e) = self.git(["clean", "-fd"]) {
            warn!(error = %e, "git clean failed");
        }
    }

    /// Stage everything and, if anything is staged, commit and push upstream.
    ///
    /// Returns whether a commit was made.
    pub fn commit_and_push(&self, message: &str) -> ForgeResult<bool> {
        self.git(["add", "-A"])?;
        match self.git(["diff", "--cached", "--quiet"]) {
            Ok(_) => {
                debug!("no changes to commit");
                return Ok(false);
            }
            Err(ForgeError::CommandFailed { exit_code: 1, .. }) => {}
            Err(e) => return Err(e),
        }
        self.git(["commit", "-m", message])?;
        self.git(["push", "-u", "origin", "HEAD"])?;
        Ok(true)
    }

    /// Return to a pristine base checkout and force-delete `branch`.
    pub fn cleanup_branch(&self, branch: &str, base: &str) {
        if let Err(e) = self.backup_if_dirty() {
            warn!(branch, error = %e, "leaving checkout untouched");
            return;
        }
        self.checkout_base(base);
        self.reset_pristine();
        match self.git(["branch", "-D", branch]) {
            Ok(_) => info!(branch, "deleted local branch"),
            Err(e) => debug!(branch, error = %e, "failed to delete branch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::clock::testing::FakeClock;
    use crate::process::ProcessRunner;
    use crate::process::testing::{FakeRunner, failed, ok_output};
    use chrono::{Local, TimeZone};
    use std::cell::RefCell;
    use std::fs;
    use std::process::Command;

    struct FakeRefs {
        head: ForgeResult<String>,
        create_fails: bool,
        created: RefCell<Vec<(String, String)>>,
    }

    impl FakeRefs {
        fn ok(sha: &str) -> Self {
            Self {
                head: Ok(sha.to_string()),
                create_fails: false,
                created: RefCell::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            Self {
                head: Err(fatal("502 bad gateway")),
                create_fails: true,
                created: RefCell::new(Vec::new()),
            }
        }
    }

    impl RefApi for FakeRefs {
        fn branch_head(&self, _branch: &str) -> ForgeResult<String> {
            match &self.head {
                Ok(sha) => Ok(sha.clone()),
                Err(e) => Err(fatal(e.to_string())),
            }
        }

        fn create_branch_ref(&self, branch: &str, sha: &str) -> ForgeResult<()> {
            if self.create_fails {
                return Err(fatal("reference already exists"));
            }
            self.created
                .borrow_mut()
                .push((branch.to_string(), sha.to_string()));
            Ok(())
        }
    }

    fn fake_workspace(runner: Arc<FakeRunner>) -> Workspace {
        let clock = FakeClock::at(Local.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        Workspace::new("/repo", runner, Arc::new(clock))
    }

    fn feature_missing(runner: &FakeRunner) {
        runner.fail(&["git", "show-ref", "--verify", "--quiet", "refs/heads/issue-forge/issue-7"]);
    }

    #[test]
    fn clean_tree_with_remote_api_creates_branch_remotely() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());
        let refs = FakeRefs::ok("abc123");

        let origin = ws.ensure_branch(Some(&refs), "issue-forge/issue-7", "main").unwrap();

        assert_eq!(origin, BranchOrigin::Remote);
        assert_eq!(
            refs.created.borrow().as_slice(),
            &[("issue-forge/issue-7".to_string(), "abc123".to_string())]
        );
        assert_eq!(
            runner.lines(),
            vec![
                "git fetch origin",
                "git status --porcelain",
                "git checkout main",
                "git reset --hard HEAD",
                "git clean -fd",
                "git show-ref --verify --quiet refs/heads/issue-forge/issue-7",
                "git fetch origin",
                "git checkout issue-forge/issue-7",
            ]
        );
        assert!(runner.calls().iter().all(|c| c.cwd.as_deref() == Some(Path::new("/repo"))));
    }

    #[test]
    fn dirty_tree_is_backed_up_before_reset() {
        let runner = Arc::new(FakeRunner::new());
        runner.stdout(&["git", "status", "--porcelain"], " M src/lib.rs\n?? notes.txt\n");
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());

        ws.ensure_branch(None, "issue-forge/issue-7", "main").unwrap();

        let backup = runner.position("git checkout -b temp-backup-20240115-140000").unwrap();
        let add = runner.position("git add -A").unwrap();
        let reset = runner.position("git reset --hard HEAD").unwrap();
        assert!(backup < add && add < reset);
        assert!(
            runner
                .lines()
                .iter()
                .any(|l| l.starts_with("git commit --no-verify -m WIP: backup"))
        );
    }

    #[test]
    fn backup_failure_stops_before_reset() {
        let runner = Arc::new(FakeRunner::new());
        runner.stdout(&["git", "status", "--porcelain"], " M a.rs\n");
        runner.fail(&["git", "commit"]);
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());

        let err = ws.ensure_branch(None, "issue-forge/issue-7", "main").unwrap_err();

        assert!(err.to_string().contains("failed to back up"));
        assert!(runner.position("git reset --hard HEAD").is_none());
        assert!(runner.position("git clean -fd").is_none());
    }

    #[test]
    fn unreadable_status_stops_before_reset() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(&["git", "status"]);
        let ws = fake_workspace(runner.clone());

        assert!(ws.ensure_branch(None, "issue-forge/issue-7", "main").is_err());
        ws.cleanup_branch("issue-forge/issue-7", "main");

        let lines = runner.lines();
        assert!(!lines.iter().any(|l| l.starts_with("git reset") || l.starts_with("git clean")));
        assert!(!lines.iter().any(|l| l.starts_with("git branch -D")));
    }

    #[test]
    fn fetch_failure_is_not_fatal() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(&["git", "fetch"]);
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());
        let origin = ws.ensure_branch(None, "issue-forge/issue-7", "main").unwrap();
        assert_eq!(origin, BranchOrigin::LocalBase);
    }

    #[test]
    fn existing_local_branch_is_resumed() {
        let runner = Arc::new(FakeRunner::new());
        let ws = fake_workspace(runner.clone());
        let refs = FakeRefs::ok("abc123");

        let origin = ws.ensure_branch(Some(&refs), "issue-forge/issue-7", "main").unwrap();

        assert_eq!(origin, BranchOrigin::Existing);
        assert!(refs.created.borrow().is_empty());
        assert_eq!(runner.lines().last().unwrap(), "git checkout issue-forge/issue-7");
    }

    #[test]
    fn missing_local_base_is_tracked_from_remote() {
        let runner = Arc::new(FakeRunner::new());
        runner.once(&["git", "checkout", "develop"], |_| Err(failed("checkout develop")));
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());

        ws.ensure_branch(Some(&FakeRefs::ok("abc")), "issue-forge/issue-7", "develop")
            .unwrap();

        let failed_checkout = runner.position("git checkout develop").unwrap();
        let track = runner
            .position("git checkout -b develop --track origin/develop")
            .unwrap();
        assert_eq!(track, failed_checkout + 1);
    }

    #[test]
    fn api_failure_falls_back_to_local_base() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        let ws = fake_workspace(runner.clone());

        let origin = ws
            .ensure_branch(Some(&FakeRefs::unreachable()), "issue-forge/issue-7", "main")
            .unwrap();

        assert_eq!(origin, BranchOrigin::LocalBase);
        let lines = runner.lines();
        let tail: Vec<&str> = lines[lines.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["git checkout main", "git pull", "git checkout -b issue-forge/issue-7"]
        );
    }

    #[test]
    fn pull_failure_still_branches_from_local_base() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        runner.fail(&["git", "pull"]);
        let ws = fake_workspace(runner.clone());

        let origin = ws.ensure_branch(None, "issue-forge/issue-7", "main").unwrap();
        assert_eq!(origin, BranchOrigin::LocalBase);
        assert_eq!(runner.lines().last().unwrap(), "git checkout -b issue-forge/issue-7");
    }

    #[test]
    fn local_base_failure_falls_back_to_tracked_base() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        runner.fail(&["git", "checkout", "main"]);
        let ws = fake_workspace(runner.clone());

        let origin = ws.ensure_branch(None, "issue-forge/issue-7", "main").unwrap();

        assert_eq!(origin, BranchOrigin::TrackedBase);
        let lines = runner.lines();
        let tail: Vec<&str> = lines[lines.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "git checkout main",
                "git checkout -b main --track origin/main",
                "git checkout -b issue-forge/issue-7",
            ]
        );
    }

    #[test]
    fn last_resort_branches_from_head() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        runner.fail(&["git", "checkout", "main"]);
        runner.fail(&["git", "checkout", "-b", "main"]);
        let ws = fake_workspace(runner.clone());

        let origin = ws
            .ensure_branch(Some(&FakeRefs::unreachable()), "issue-forge/issue-7", "main")
            .unwrap();
        assert_eq!(origin, BranchOrigin::CurrentHead);
    }

    #[test]
    fn exhausting_every_strategy_is_fatal() {
        let runner = Arc::new(FakeRunner::new());
        feature_missing(&runner);
        runner.fail(&["git", "checkout"]);
        let ws = fake_workspace(runner.clone());

        let err = ws
            .ensure_branch(Some(&FakeRefs::unreachable()), "issue-forge/issue-7", "main")
            .unwrap_err();
        assert!(err.to_string().contains("every strategy failed"));
    }

    #[test]
    fn commit_and_push_skips_when_nothing_staged() {
        let runner = Arc::new(FakeRunner::new());
        let ws = fake_workspace(runner.clone());
        assert!(!ws.commit_and_push("fix: resolve issue #7").unwrap());
        assert_eq!(runner.lines(), vec!["git add -A", "git diff --cached --quiet"]);
    }

    #[test]
    fn commit_and_push_commits_staged_changes() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(&["git", "diff", "--cached", "--quiet"]);
        let ws = fake_workspace(runner.clone());
        assert!(ws.commit_and_push("fix: resolve issue #7").unwrap());
        assert_eq!(
            runner.lines(),
            vec![
                "git add -A",
                "git diff --cached --quiet",
                "git commit -m fix: resolve issue #7",
                "git push -u origin HEAD",
            ]
        );
    }

    #[test]
    fn commit_and_push_propagates_push_failure() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(&["git", "diff", "--cached", "--quiet"]);
        runner.on(&["git", "push"], |_| Err(ForgeError::rate_limited(30)));
        let ws = fake_workspace(runner.clone());
        let err = ws.commit_and_push("msg").unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(30));
    }

    #[test]
    fn cleanup_deletes_branch_best_effort() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(&["git", "branch", "-D"]);
        let ws = fake_workspace(runner.clone());
        ws.cleanup_branch("issue-forge/issue-7", "main");
        assert_eq!(
            runner.lines(),
            vec![
                "git status --porcelain",
                "git checkout main",
                "git reset --hard HEAD",
                "git clean -fd",
                "git branch -D issue-forge/issue-7",
            ]
        );
    }

    #[test]
    fn remote_url_is_trimmed() {
        let runner = Arc::new(FakeRunner::new());
        runner.on(&["git", "remote", "get-url", "origin"], |_| {
            Ok(ok_output("git@github.com:acme/widgets.git\n"))
        });
        let ws = fake_workspace(runner);
        assert_eq!(ws.remote_url().unwrap(), "git@github.com:acme/widgets.git");
    }

    // Real git below.

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(repo: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(repo)
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A bare "origin" plus a clone of it with one commit on `main`.
    fn init_clone() -> Option<(tempfile::TempDir, PathBuf)> {
        if !git_available() {
            return None;
        }

        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin.git");
        let seed = tmp.path().join("seed");
        let clone = tmp.path().join("clone");
        fs::create_dir_all(&origin).unwrap();
        fs::create_dir_all(&seed).unwrap();
        git(&origin, &["init", "-q", "--bare"]);

        git(&seed, &["init", "-q"]);
        git(&seed, &["config", "user.email", "forge-test@example.com"]);
        git(&seed, &["config", "user.name", "Forge Test"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        fs::write(seed.join("README.md"), "init\n").unwrap();
        git(&seed, &["add", "README.md"]);
        git(&seed, &["commit", "-q", "-m", "init"]);
        git(&seed, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git(&seed, &["push", "-q", "origin", "main"]);

        git(
            tmp.path(),
            &["clone", "-q", "-b", "main", origin.to_str().unwrap(), "clone"],
        );
        git(&clone, &["config", "user.email", "forge-test@example.com"]);
        git(&clone, &["config", "user.name", "Forge Test"]);
        Some((tmp, clone))
    }

    fn real_workspace(path: &Path) -> Workspace {
        Workspace::new(path, Arc::new(ProcessRunner), Arc::new(SystemClock))
    }

    #[test]
    fn real_repo_branch_creation_preserves_dirty_work() {
        let Some((_tmp, clone)) = init_clone() else {
            return;
        };
        fs::write(clone.join("README.md"), "edited\n").unwrap();
        fs::write(clone.join("scratch.txt"), "untracked\n").unwrap();
        let ws = real_workspace(&clone);

        let origin = ws.ensure_branch(None, "issue-forge/issue-3", "main").unwrap();

        assert_eq!(origin, BranchOrigin::LocalBase);
        assert_eq!(git(&clone, &["rev-parse", "--abbrev-ref", "HEAD"]), "issue-forge/issue-3");
        assert_eq!(fs::read_to_string(clone.join("README.md")).unwrap(), "init\n");
        assert!(!clone.join("scratch.txt").exists());

        let branches = git(&clone, &["branch", "--list", "temp-backup-*"]);
        let backup = branches.trim_start_matches(['*', ' ']).trim();
        assert!(backup.starts_with(BACKUP_BRANCH_PREFIX), "branches: {branches}");
        let saved = git(&clone, &["show", &format!("{backup}:scratch.txt")]);
        assert_eq!(saved, "untracked");
    }

    #[test]
    fn real_repo_handles_issue_429() {
        let Some((_tmp, clone)) = init_clone() else {
            return;
        };
        fs::create_dir_all(clone.join("docs")).unwrap();
        fs::write(clone.join("docs/429.md"), "draft\n").unwrap();
        let ws = real_workspace(&clone);

        let origin = ws.ensure_branch(None, "issue-forge/issue-429", "main").unwrap();
        assert_eq!(origin, BranchOrigin::LocalBase);
        assert_eq!(git(&clone, &["rev-parse", "--abbrev-ref", "HEAD"]), "issue-forge/issue-429");
        let branches = git(&clone, &["branch", "--list", "temp-backup-*"]);
        let backup = branches.trim_start_matches(['*', ' ']).trim();
        assert_eq!(git(&clone, &["show", &format!("{backup}:docs/429.md")]), "draft");

        fs::write(clone.join("fix.txt"), "done\n").unwrap();
        assert!(ws.commit_and_push("fix: resolve issue #429").unwrap());
        let remote = git(&clone, &["ls-remote", "--heads", "origin", "issue-forge/issue-429"]);
        assert!(remote.ends_with("refs/heads/issue-forge/issue-429"), "remote: {remote}");
    }

    #[test]
    fn real_repo_resume_and_commit_round() {
        let Some((_tmp, clone)) = init_clone() else {
            return;
        };
        let ws = real_workspace(&clone);
        ws.ensure_branch(None, "issue-forge/issue-4", "main").unwrap();

        assert!(!ws.commit_and_push("fix: resolve issue #4").unwrap());

        fs::write(clone.join("fix.txt"), "done\n").unwrap();
        assert!(ws.commit_and_push("fix: resolve issue #4").unwrap());
        assert_eq!(git(&clone, &["log", "-1", "--format=%s"]), "fix: resolve issue #4");
        let remote = git(&clone, &["ls-remote", "--heads", "origin", "issue-forge/issue-4"]);
        assert!(remote.ends_with("refs/heads/issue-forge/issue-4"));

        let origin = ws.ensure_branch(None, "issue-forge/issue-4", "main").unwrap();
        assert_eq!(origin, BranchOrigin::Existing);
        assert!(clone.join("fix.txt").exists());

        ws.cleanup_branch("issue-forge/issue-4", "main");
        assert!(!ws.local_branch_exists("issue-forge/issue-4"));
        assert_eq!(ws.current_branch().unwrap(), "main");
    }
}
