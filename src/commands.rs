//! Wiring and rendering behind the CLI subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::audit::MarkdownAuditLogFactory;
use crate::clock::{Clock, SystemClock};
use crate::config::{ForgeConfig, ProjectEntry, STARTER_FILENAME, starter_config};
use crate::error::ForgeResult;
use crate::github;
use crate::host::{GitHubProject, ProjectHost, WorkItem};
use crate::notify::{Notifier, build_notifier};
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::provider::CliProvider;
use crate::pipeline::stages::standard_stages;
use crate::process::{CommandRunner, ProcessRunner};
use crate::processor::{IssueProcessor, ProcessingOutcome};
use crate::retry::RetryPolicy;

/// Shared collaborators built once from the resolved config.
pub struct Services {
    pub config: ForgeConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub clock: Arc<dyn Clock>,
    token: Option<String>,
}

impl Services {
    pub fn new(config: ForgeConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let token = github::resolve_token(config.global.github_token.clone(), runner.as_ref());
        Self {
            config,
            runner,
            clock: Arc::new(SystemClock),
            token,
        }
    }

    pub fn connect(&self, entry: &ProjectEntry) -> ForgeResult<Box<dyn ProjectHost>> {
        let project = GitHubProject::connect(
            entry.path.clone(),
            &entry.base_branch,
            self.token.clone(),
            self.runner.clone(),
            self.clock.clone(),
            self.config.global.command_timeout(),
        )?;
        Ok(Box::new(project))
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::from(build_notifier(&self.config.notifications))
    }

    pub fn processor(&self, notifier: Arc<dyn Notifier>) -> IssueProcessor {
        let global = &self.config.global;
        let provider = CliProvider::new(
            global.ai_provider,
            global.model.clone(),
            self.runner.clone(),
            self.clock.clone(),
        )
        .with_retry(RetryPolicy::new(global.max_retries, global.retry_delay()))
        .with_timeout(global.provider_timeout());
        IssueProcessor::new(
            standard_stages(Arc::new(provider)),
            Box::new(MarkdownAuditLogFactory::new(self.clock.clone())),
            notifier,
            self.clock.clone(),
            global.max_iterations,
        )
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let global = &self.config.global;
        OrchestratorConfig {
            polling_interval: global.polling_interval(),
            error_retry_interval: global.error_retry_interval(),
            failure_cooldown: global.failure_cooldown(),
            provider: global.ai_provider.name().to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
}

/// Write the starter config into `dir` unless one is already there.
pub fn init_config(dir: &Path) -> Result<InitOutcome> {
    let path = dir.join(STARTER_FILENAME);
    if path.exists() {
        return Ok(InitOutcome::AlreadyExists(path));
    }
    std::fs::write(&path, starter_config(dir))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(InitOutcome::Created(path))
}

pub fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no config file found)".to_string())
}

pub fn render_status(config_path: Option<&Path>) -> String {
    match config_path {
        Some(path) => format!("Config file: {}", path.display()),
        None => "No config file found. Run \"issue-forge init\" to create one.".to_string(),
    }
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<24} {value}\n"));
}

fn secret_label(value: &Option<String>) -> &'static str {
    if value.is_some() { "(set)" } else { "(none)" }
}

pub fn render_config_human(config: &ForgeConfig, config_path: Option<&Path>) -> String {
    let global = &config.global;
    let mut output = String::new();
    output.push_str("Global\n");
    push_kv(&mut output, "polling_interval", format!("{}s", global.polling_interval));
    push_kv(&mut output, "ai_provider", global.ai_provider);
    push_kv(&mut output, "model", global.model());
    push_kv(&mut output, "max_iterations", global.max_iterations);
    push_kv(&mut output, "command_timeout", format!("{}s", global.command_timeout_secs));
    push_kv(&mut output, "provider_timeout", format!("{}s", global.provider_timeout_secs));
    push_kv(&mut output, "max_retries", global.max_retries);
    push_kv(&mut output, "retry_delay", format!("{}s", global.retry_delay_secs));
    push_kv(&mut output, "github_token", secret_label(&global.github_token));
    output.push('\n');

    output.push_str("Logging\n");
    push_kv(&mut output, "level", &config.logging.level);
    push_kv(&mut output, "file_enabled", config.logging.file_enabled);
    push_kv(&mut output, "file_path", config.logging.file_path.display());
    push_kv(&mut output, "max_files", config.logging.max_files);
    output.push('\n');

    let notifications = &config.notifications;
    output.push_str("Notifications\n");
    push_kv(&mut output, "enabled", notifications.enabled);
    push_kv(&mut output, "provider", notifications.provider.name());
    push_kv(&mut output, "webhook_url", secret_label(&notifications.webhook_url));
    push_kv(&mut output, "bot_token", secret_label(&notifications.bot_token));
    push_kv(
        &mut output,
        "chat_id",
        notifications.chat_id.as_deref().unwrap_or("(none)"),
    );
    push_kv(&mut output, "send_all_responses", notifications.send_all_responses);
    output.push('\n');

    output.push_str("Projects\n");
    if config.projects.is_empty() {
        push_kv(&mut output, "entries", "(none)");
    } else {
        for project in &config.projects {
            let state = if project.enabled { "" } else { " (disabled)" };
            output.push_str(&format!(
                "  - {} [{}]{state}\n",
                project.path.display(),
                project.base_branch
            ));
        }
    }
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));
    output
}

pub fn render_config_json(config: &ForgeConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config.redacted()).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

/// One line per open item, as printed by `scan`.
pub fn render_scan(items: &[WorkItem]) -> String {
    if items.is_empty() {
        return "  No open issues\n".to_string();
    }
    let mut output = String::new();
    for item in items {
        output.push_str(&format!("  #{} {}", item.number, item.title));
        if !item.labels.is_empty() {
            output.push_str(&format!(" [{}]", item.labels.join(", ")));
        }
        output.push('\n');
    }
    output
}

pub fn describe_outcome(outcome: &ProcessingOutcome) -> String {
    match outcome {
        ProcessingOutcome::Success { pr_number, url } => format!("Created PR #{pr_number}: {url}"),
        ProcessingOutcome::Escalated { .. } => "Issue escalated for human review".to_string(),
    }
}
