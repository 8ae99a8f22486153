//! AI provider adapters.
//!
//! Each provider wraps a non-interactive CLI (`claude`, `gemini`) that takes a
//! prompt on the command line, works inside the project checkout and prints
//! its answer to stdout. Timeouts and transient failures are retried here;
//! rate limits are passed up untouched.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::error::ForgeResult;
use crate::process::{CommandRunner, CommandSpec};
use crate::retry::RetryPolicy;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Claude,
    Gemini,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn program(&self) -> &'static str {
        self.name()
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "sonnet",
            ProviderKind::Gemini => "pro",
        }
    }

    /// Arguments for a one-shot, non-interactive run.
    pub fn build_args(&self, model: &str, prompt: &str) -> Vec<String> {
        match self {
            ProviderKind::Claude => vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
                "--model".to_string(),
                model.to_string(),
                prompt.to_string(),
            ],
            ProviderKind::Gemini => vec!["-m".to_string(), model.to_string(), prompt.to_string()],
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        match self {
            ProviderKind::Claude => vec![("NO_COLOR".to_string(), "1".to_string())],
            ProviderKind::Gemini => vec![],
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub output: String,
    pub duration: Duration,
    pub provider: String,
    pub model: String,
}

pub trait Provider {
    fn complete(&self, prompt: &str, cwd: &Path) -> ForgeResult<Completion>;
}

/// Runs a provider CLI through the shared command runner.
pub struct CliProvider {
    kind: ProviderKind,
    model: String,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CliProvider {
    pub fn new(
        kind: ProviderKind,
        model: Option<String>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            model: model.unwrap_or_else(|| kind.default_model().to_string()),
            runner,
            clock,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn spec(&self, prompt: &str, cwd: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(self.kind.program())
            .args(self.kind.build_args(&self.model, prompt))
            .cwd(cwd)
            .timeout(self.timeout);
        for (key, value) in self.kind.env() {
            spec = spec.env(key, value);
        }
        spec
    }
}

impl Provider for CliProvider {
    fn complete(&self, prompt: &str, cwd: &Path) -> ForgeResult<Completion> {
        let spec = self.spec(prompt, cwd);
        info!(provider = %self.kind, model = %self.model, cwd = %cwd.display(), "running provider");

        self.retry.run(self.clock.as_ref(), |_attempt| {
            let started = Instant::now();
            let out = self.runner.run(&spec)?;
            let duration = started.elapsed();
            info!(provider = %self.kind, secs = duration.as_secs(), "provider completed");
            Ok(Completion {
                output: out.stdout,
                duration,
                provider: self.kind.name().to_string(),
                model: self.model.clone(),
            })
        })
    }
}
