//! The hosting surface the forge drives for one project: tracked items,
//! labels and pull requests on the remote, plus the local checkout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{ForgeResult, fatal};
use crate::github::{self, GitHubClient, Issue};
use crate::process::CommandRunner;
use crate::workspace::{RefApi, Workspace};

pub const IN_PROGRESS_LABEL: &str = "issue-forge:in-progress";
pub const NEEDS_HUMAN_LABEL: &str = "issue-forge:needs-human";

/// Feature branch the forge works on for item `number`.
pub fn branch_name(number: u64) -> String {
    format!("issue-forge/issue-{number}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<Issue> for WorkItem {
    fn from(issue: Issue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            created_at: issue.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

pub trait ProjectHost {
    fn path(&self) -> &Path;
    fn fetch_open_items(&self) -> ForgeResult<Vec<WorkItem>>;
    fn get_item(&self, number: u64) -> ForgeResult<WorkItem>;
    fn existing_pull_request(&self, number: u64) -> ForgeResult<Option<PullRequestRef>>;
    fn add_label(&self, number: u64, label: &str) -> ForgeResult<()>;
    fn remove_label(&self, number: u64, label: &str) -> ForgeResult<()>;
    /// Reconcile the checkout onto `branch`, created from the project base.
    fn prepare_branch(&self, branch: &str) -> ForgeResult<()>;
    /// Returns whether anything was committed.
    fn commit_and_push(&self, message: &str) -> ForgeResult<bool>;
    fn create_pull_request(&self, title: &str, body: &str, head: &str) -> ForgeResult<PullRequestRef>;
    fn add_comment(&self, number: u64, body: &str) -> ForgeResult<()>;
    /// Best-effort removal of a local branch.
    fn cleanup_branch(&self, branch: &str);
}

/// A project checkout whose origin lives on GitHub.
pub struct GitHubProject {
    base_branch: String,
    client: GitHubClient,
    workspace: Workspace,
}

impl GitHubProject {
    pub fn new(client: GitHubClient, workspace: Workspace, base_branch: impl Into<String>) -> Self {
        Self {
            base_branch: base_branch.into(),
            client,
            workspace,
        }
    }

    /// Resolve the repository from the checkout's `origin` remote.
    pub fn connect(
        path: impl Into<PathBuf>,
        base_branch: &str,
        token: Option<String>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
        command_timeout: Duration,
    ) -> ForgeResult<Self> {
        let workspace = Workspace::new(path, runner, clock).with_timeout(command_timeout);
        let remote = workspace.remote_url()?;
        let (owner, repo) = github::parse_remote_url(&remote)
            .ok_or_else(|| fatal(format!("cannot parse GitHub remote URL: {remote}")))?;
        debug!(owner = %owner, repo = %repo, path = %workspace.path().display(), "GitHub project connected");
        Ok(Self::new(GitHubClient::new(owner, repo, token), workspace, base_branch))
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }
}

impl ProjectHost for GitHubProject {
    fn path(&self) -> &Path {
        self.workspace.path()
    }

    fn fetch_open_items(&self) -> ForgeResult<Vec<WorkItem>> {
        Ok(self
            .client
            .list_open_issues()?
            .into_iter()
            .map(WorkItem::from)
            .collect())
    }

    fn get_item(&self, number: u64) -> ForgeResult<WorkItem> {
        Ok(self.client.get_issue(number)?.into())
    }

    fn existing_pull_request(&self, number: u64) -> ForgeResult<Option<PullRequestRef>> {
        let pr = self
            .client
            .existing_pull_request(number, &branch_name(number))?;
        Ok(pr.map(|pr| PullRequestRef {
            number: pr.number,
            url: pr.html_url,
        }))
    }

    fn add_label(&self, number: u64, label: &str) -> ForgeResult<()> {
        self.client.add_label(number, label);
        Ok(())
    }

    fn remove_label(&self, number: u64, label: &str) -> ForgeResult<()> {
        self.client.remove_label(number, label);
        Ok(())
    }

    fn prepare_branch(&self, branch: &str) -> ForgeResult<()> {
        let refs: &dyn RefApi = &self.client;
        self.workspace
            .ensure_branch(Some(refs), branch, &self.base_branch)?;
        Ok(())
    }

    fn commit_and_push(&self, message: &str) -> ForgeResult<bool> {
        self.workspace.commit_and_push(message)
    }

    fn create_pull_request(&self, title: &str, body: &str, head: &str) -> ForgeResult<PullRequestRef> {
        let pr = self
            .client
            .create_pull_request(title, body, head, &self.base_branch)?;
        Ok(PullRequestRef {
            number: pr.number,
            url: pr.html_url,
        })
    }

    fn add_comment(&self, number: u64, body: &str) -> ForgeResult<()> {
        self.client.add_comment(number, body)
    }

    fn cleanup_branch(&self, branch: &str) {
        self.workspace.cleanup_branch(branch, &self.base_branch);
    }
}
