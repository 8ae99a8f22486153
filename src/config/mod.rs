use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::NotifierKind;
use crate::pipeline::provider::ProviderKind;

/// Looked for in this order in every directory on the way up.
const CONFIG_FILENAMES: [&str; 5] = [
    "config.yaml",
    "config.yml",
    ".issue-forge.yaml",
    ".issue-forge.yml",
    ".issue-forge.toml",
];

pub const STARTER_FILENAME: &str = "config.yaml";

const REDACTED: &str = "***";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Seconds between polls when nothing was processed.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default)]
    pub ai_provider: ProviderKind,
    /// Falls back to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_error_retry_interval_secs")]
    pub error_retry_interval_secs: u64,
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    /// Only ever set from `GITHUB_TOKEN`.
    #[serde(skip)]
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub file_path: PathBuf,
    /// Daily log files kept in `file_path`.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: NotifierKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_send_all_responses")]
    pub send_all_responses: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub path: PathBuf,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_polling_interval() -> u64 {
    600
}

fn default_max_iterations() -> u32 {
    3
}

fn default_command_timeout_secs() -> u64 {
    30 * 60
}

fn default_provider_timeout_secs() -> u64 {
    10 * 60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_error_retry_interval_secs() -> u64 {
    30
}

fn default_failure_cooldown_secs() -> u64 {
    5 * 60
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_max_files() -> usize {
    7
}

fn default_send_all_responses() -> bool {
    true
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            ai_provider: ProviderKind::default(),
            model: None,
            max_iterations: default_max_iterations(),
            command_timeout_secs: default_command_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            error_retry_interval_secs: default_error_retry_interval_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            github_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_enabled: false,
            file_path: default_log_dir(),
            max_files: default_max_files(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: NotifierKind::default(),
            webhook_url: None,
            bot_token: None,
            chat_id: None,
            send_all_responses: default_send_all_responses(),
        }
    }
}

impl GlobalConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.ai_provider.default_model())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn error_retry_interval(&self) -> Duration {
        Duration::from_secs(self.error_retry_interval_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

impl ForgeConfig {
    /// Discover a config file from `start` upward. Returns the defaults and
    /// `None` when there is none.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        match Self::find_config_file(start) {
            Some(path) => Ok((Self::load_file(&path)?, Some(path))),
            None => Ok((ForgeConfig::default(), None)),
        }
    }

    /// Parse one file, YAML or TOML by extension. Relative project paths are
    /// taken relative to the file's directory.
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: ForgeConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        };
        if let Some(dir) = path.parent() {
            for project in &mut config.projects {
                if project.path.is_relative() {
                    project.path = dir.join(&project.path);
                }
            }
        }
        Ok(config)
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            for name in CONFIG_FILENAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in the binary.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(flag) = lookup("LOG_TO_FILE") {
            self.logging.file_enabled = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.file_path = PathBuf::from(dir);
        }
        if let Some(url) = lookup("SLACK_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url);
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.notifications.bot_token = Some(token);
        }
        if let Some(chat) = lookup("TELEGRAM_CHAT_ID") {
            self.notifications.chat_id = Some(chat);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.global.github_token = Some(token);
        }
    }

    /// Checks needed before polling starts.
    pub fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            bail!("no projects configured");
        }
        for project in &self.projects {
            if !project.path.is_dir() {
                bail!("project path does not exist: {}", project.path.display());
            }
        }
        if self.global.max_iterations == 0 {
            bail!("global.max_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn enabled_projects(&self) -> impl Iterator<Item = &ProjectEntry> {
        self.projects.iter().filter(|p| p.enabled)
    }

    /// Copy safe to print: secrets replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let notifications = &mut copy.notifications;
        for secret in [
            &mut notifications.webhook_url,
            &mut notifications.bot_token,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        copy
    }
}

/// Contents written by `init`.
pub fn starter_config(project: &Path) -> String {
    let provider = ProviderKind::default();
    let mut text = String::new();
    text.push_str("global:\n");
    text.push_str(&format!("  polling_interval: {}\n", default_polling_interval()));
    text.push_str(&format!("  ai_provider: {}\n", provider.name()));
    text.push_str(&format!("  model: {}\n", provider.default_model()));
    text.push_str(&format!("  max_iterations: {}\n", default_max_iterations()));
    text.push('\n');
    text.push_str("logging:\n");
    text.push_str(&format!("  level: {}\n", default_log_level()));
    text.push_str("  file_enabled: false\n");
    text.push('\n');
    text.push_str("notifications:\n");
    text.push_str("  enabled: false\n");
    text.push_str("  provider: none\n");
    text.push('\n');
    text.push_str("projects:\n");
    text.push_str(&format!("  - path: \"{}\"\n", project.display()));
    text.push_str(&format!("    base_branch: {}\n", default_base_branch()));
    text
}
