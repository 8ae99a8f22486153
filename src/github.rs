//! Blocking GitHub REST client for one repository.
//!
//! Covers the handful of v3 endpoints the forge needs: open issues and pull
//! requests, labels, comments, branch refs and PR creation. Rate-limit
//! responses surface as [`ForgeError::RateLimited`] so callers can wait them
//! out instead of treating them as failures.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ForgeError, ForgeResult, fatal};
use crate::process::{CommandRunner, CommandSpec, DEFAULT_RETRY_AFTER_SECS};
use crate::workspace::RefApi;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY_LEN: usize = 200;
const PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
}

impl PullRequest {
    fn mentions(&self, needle: &str) -> bool {
        self.title.contains(needle) || self.body.as_deref().is_some_and(|b| b.contains(needle))
    }
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Token from `env_token` (normally `GITHUB_TOKEN`), falling back to the
/// `gh` CLI's stored credentials.
pub fn resolve_token(env_token: Option<String>, runner: &dyn CommandRunner) -> Option<String> {
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        return Some(token);
    }
    let spec = CommandSpec::new("gh")
        .args(["auth", "token"])
        .timeout(Duration::from_secs(30));
    match runner.run(&spec) {
        Ok(out) if !out.stdout.trim().is_empty() => Some(out.stdout.trim().to_string()),
        Ok(_) | Err(_) => {
            warn!("no GitHub token found; set GITHUB_TOKEN or run `gh auth login`");
            None
        }
    }
}

fn remote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"github\.com(?:-[^:/]+)?[:/]([^/]+)/(.+?)(?:\.git)?/?$").unwrap())
}

/// Extract `(owner, repo)` from a git remote URL.
///
/// Supports HTTPS, SSH and SSH host aliases such as
/// `git@github.com-work:owner/repo.git`.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let caps = remote_pattern().captures(url.trim())?;
    let owner = caps[1].to_string();
    let repo = caps[2].to_string();
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// Truncate an API error body and redact anything that looks like a secret.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghu_",
        "github_pat_",
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{head}... (truncated)")
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

fn describe_error_body(body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(body) {
        let detail = api_error
            .errors
            .first()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();
        if detail.is_empty() {
            return sanitize_error_body(&api_error.message);
        }
        return sanitize_error_body(&format!("{}: {detail}", api_error.message));
    }
    sanitize_error_body(body)
}

/// Seconds to back off after a rate-limit response.
///
/// `retry-after` wins; otherwise the distance to `x-ratelimit-reset` (epoch
/// seconds, at least 1); otherwise the default.
pub fn rate_limit_delay(retry_after: Option<&str>, reset: Option<&str>, now_epoch: i64) -> u64 {
    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        return secs;
    }
    if let Some(reset) = reset.and_then(|v| v.trim().parse::<i64>().ok()) {
        return (reset - now_epoch).max(1) as u64;
    }
    DEFAULT_RETRY_AFTER_SECS
}

/// Minimal percent-encoding for a single URL path segment.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b':' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

pub struct GitHubClient {
    agent: ureq::Agent,
    api_base: String,
    token: Option<String>,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(API_TIMEOUT)
            .user_agent(concat!("issue-forge/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!(
            "{}/repos/{}/{}{path}",
            self.api_base, self.owner, self.repo
        );
        let mut req = self
            .agent
            .request(method, &url)
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        req
    }

    fn execute(
        &self,
        what: &str,
        req: ureq::Request,
        body: Option<serde_json::Value>,
    ) -> ForgeResult<ureq::Response> {
        let result = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };
        result.map_err(|e| self.map_error(what, e))
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        what: &str,
        req: ureq::Request,
        body: Option<serde_json::Value>,
    ) -> ForgeResult<T> {
        let resp = self.execute(what, req, body)?;
        resp.into_json::<T>()
            .map_err(|e| fatal(format!("failed to parse GitHub response for {what}: {e}")))
    }

    fn map_error(&self, what: &str, err: ureq::Error) -> ForgeError {
        match err {
            ureq::Error::Status(code, resp) => {
                let exhausted = resp.header("x-ratelimit-remaining") == Some("0");
                if code == 429 || (code == 403 && exhausted) {
                    let delay = rate_limit_delay(
                        resp.header("retry-after"),
                        resp.header("x-ratelimit-reset"),
                        Utc::now().timestamp(),
                    );
                    warn!(
                        repo = %format!("{}/{}", self.owner, self.repo),
                        status = code,
                        retry_after_secs = delay,
                        "GitHub rate limit"
                    );
                    return ForgeError::rate_limited(delay);
                }
                let body = resp.into_string().unwrap_or_default();
                fatal(format!(
                    "GitHub API error ({code}) during {what}: {}",
                    describe_error_body(&body)
                ))
            }
            ureq::Error::Transport(t) => fatal(format!("GitHub request failed during {what}: {t}")),
        }
    }

    /// Open issues, oldest first. Pull requests are filtered out.
    pub fn list_open_issues(&self) -> ForgeResult<Vec<Issue>> {
        let req = self
            .request("GET", "/issues")
            .query("state", "open")
            .query("sort", "created")
            .query("direction", "asc")
            .query("per_page", PAGE_SIZE);
        let issues: Vec<Issue> = self.fetch("list issues", req, None)?;
        Ok(issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .collect())
    }

    pub fn get_issue(&self, number: u64) -> ForgeResult<Issue> {
        let req = self.request("GET", &format!("/issues/{number}"));
        self.fetch("get issue", req, None)
    }

    /// Open pull requests, optionally restricted to a `owner:branch` head.
    pub fn list_open_pulls(&self, head: Option<&str>) -> ForgeResult<Vec<PullRequest>> {
        let mut req = self
            .request("GET", "/pulls")
            .query("state", "open")
            .query("per_page", PAGE_SIZE);
        if let Some(head) = head {
            req = req.query("head", head);
        }
        self.fetch("list pull requests", req, None)
    }

    /// An open PR already linked to issue `number`, if any.
    ///
    /// Checks the forge's own branch first, then falls back to any open PR
    /// whose title or body mentions `#<number>`.
    pub fn existing_pull_request(&self, number: u64, branch: &str) -> ForgeResult<Option<PullRequest>> {
        let head = format!("{}:{branch}", self.owner);
        if let Some(pr) = self.list_open_pulls(Some(&head))?.into_iter().next() {
            return Ok(Some(pr));
        }
        let needle = format!("#{number}");
        Ok(self
            .list_open_pulls(None)?
            .into_iter()
            .find(|pr| pr.mentions(&needle)))
    }

    /// Failures are logged and swallowed.
    pub fn add_label(&self, number: u64, label: &str) {
        let req = self.request("POST", &format!("/issues/{number}/labels"));
        if let Err(e) = self.execute("add label", req, Some(json!({ "labels": [label] }))) {
            debug!(issue = number, label, error = %e, "failed to add label");
        }
    }

    /// Failures are logged and swallowed.
    pub fn remove_label(&self, number: u64, label: &str) {
        let path = format!("/issues/{number}/labels/{}", encode_segment(label));
        let req = self.request("DELETE", &path);
        if let Err(e) = self.execute("remove label", req, None) {
            debug!(issue = number, label, error = %e, "failed to remove label");
        }
    }

    pub fn add_comment(&self, number: u64, body: &str) -> ForgeResult<()> {
        let req = self.request("POST", &format!("/issues/{number}/comments"));
        self.execute("add comment", req, Some(json!({ "body": body })))?;
        Ok(())
    }

    pub fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> ForgeResult<PullRequest> {
        let req = self.request("POST", "/pulls");
        let pr: PullRequest = self.fetch(
            "create pull request",
            req,
            Some(json!({ "title": title, "body": body, "head": head, "base": base })),
        )?;
        info!(pr = pr.number, url = %pr.html_url, "created pull request");
        Ok(pr)
    }
}

impl RefApi for GitHubClient {
    fn branch_head(&self, branch: &str) -> ForgeResult<String> {
        let req = self.request("GET", &format!("/git/ref/heads/{branch}"));
        let git_ref: GitRef = self.fetch("get branch ref", req, None)?;
        Ok(git_ref.object.sha)
    }

    fn create_branch_ref(&self, branch: &str, sha: &str) -> ForgeResult<()> {
        let req = self.request("POST", "/git/refs");
        self.execute(
            "create branch ref",
            req,
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": sha })),
        )?;
        Ok(())
    }
}
