//! Chat notifications for processing milestones.
//!
//! Delivery is fire-and-forget: every failure is logged and dropped, nothing
//! is retried and nothing propagates to the caller.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::NotificationConfig;
use crate::host::WorkItem;
use crate::pipeline::StageOutput;
use crate::processor::ProcessingOutcome;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const PREVIEW_CHARS: usize = 500;
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    None,
    Slack,
    Telegram,
}

impl NotifierKind {
    pub fn name(&self) -> &'static str {
        match self {
            NotifierKind::None => "none",
            NotifierKind::Slack => "slack",
            NotifierKind::Telegram => "telegram",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn scheduled(&self, item: &WorkItem, target: DateTime<Local>);
    fn issue_started(&self, item: &WorkItem, project: &Path, iteration: u32, max_iterations: u32);
    fn stage_response(&self, item: &WorkItem, output: &StageOutput);
    fn completed(&self, item: &WorkItem, outcome: &ProcessingOutcome);
}

/// Used when notifications are disabled or misconfigured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn scheduled(&self, _item: &WorkItem, _target: DateTime<Local>) {}
    fn issue_started(&self, _: &WorkItem, _: &Path, _: u32, _: u32) {}
    fn stage_response(&self, _item: &WorkItem, _output: &StageOutput) {}
    fn completed(&self, _item: &WorkItem, _outcome: &ProcessingOutcome) {}
}

/// Build the notifier described by `config`, falling back to a no-op one.
pub fn build_notifier(config: &NotificationConfig) -> Box<dyn Notifier> {
    if !config.enabled {
        return Box::new(NoopNotifier);
    }
    let channel = match config.provider {
        NotifierKind::None => return Box::new(NoopNotifier),
        NotifierKind::Slack => match &config.webhook_url {
            Some(url) => Channel::Slack {
                webhook_url: url.clone(),
            },
            None => {
                warn!("slack notifications enabled without a webhook URL; disabling");
                return Box::new(NoopNotifier);
            }
        },
        NotifierKind::Telegram => match (&config.bot_token, &config.chat_id) {
            (Some(token), Some(chat_id)) => Channel::Telegram {
                api_url: format!("{TELEGRAM_API_BASE}/bot{token}/sendMessage"),
                chat_id: chat_id.clone(),
            },
            _ => {
                warn!("telegram notifications need both a bot token and a chat id; disabling");
                return Box::new(NoopNotifier);
            }
        },
    };
    info!(provider = config.provider.name(), "notifications enabled");
    Box::new(ChatNotifier::new(channel, config.send_all_responses))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Slack { webhook_url: String },
    Telegram { api_url: String, chat_id: String },
}

pub struct ChatNotifier {
    channel: Channel,
    send_all_responses: bool,
    agent: ureq::Agent,
}

impl ChatNotifier {
    pub fn new(channel: Channel, send_all_responses: bool) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(SEND_TIMEOUT).build();
        Self {
            channel,
            send_all_responses,
            agent,
        }
    }

    fn deliver(&self, notice: &Notice<'_>) {
        let (url, payload) = match &self.channel {
            Channel::Slack { webhook_url } => (webhook_url.as_str(), notice.slack_payload()),
            Channel::Telegram { api_url, chat_id } => (
                api_url.as_str(),
                json!({
                    "chat_id": chat_id,
                    "text": notice.telegram_text(),
                    "parse_mode": "Markdown",
                }),
            ),
        };
        match self.agent.post(url).send_json(payload) {
            Ok(_) => debug!(issue = notice.issue_number(), kind = notice.kind(), "notification sent"),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                error!(
                    issue = notice.issue_number(),
                    kind = notice.kind(),
                    status = code,
                    body = %body.chars().take(200).collect::<String>(),
                    "notification rejected"
                );
            }
            Err(e) => error!(
                issue = notice.issue_number(),
                kind = notice.kind(),
                error = %e,
                "notification failed"
            ),
        }
    }
}

impl Notifier for ChatNotifier {
    fn scheduled(&self, item: &WorkItem, target: DateTime<Local>) {
        self.deliver(&Notice::Scheduled { item, target });
    }

    fn issue_started(&self, item: &WorkItem, project: &Path, iteration: u32, max_iterations: u32) {
        self.deliver(&Notice::Started {
            item,
            project,
            iteration,
            max_iterations,
        });
    }

    fn stage_response(&self, item: &WorkItem, output: &StageOutput) {
        if self.send_all_responses {
            self.deliver(&Notice::StageResponse { item, output });
        }
    }

    fn completed(&self, item: &WorkItem, outcome: &ProcessingOutcome) {
        self.deliver(&Notice::Completed { item, outcome });
    }
}

/// One message, renderable for either chat platform.
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    Scheduled {
        item: &'a WorkItem,
        target: DateTime<Local>,
    },
    Started {
        item: &'a WorkItem,
        project: &'a Path,
        iteration: u32,
        max_iterations: u32,
    },
    StageResponse {
        item: &'a WorkItem,
        output: &'a StageOutput,
    },
    Completed {
        item: &'a WorkItem,
        outcome: &'a ProcessingOutcome,
    },
}

fn stage_emoji(stage: &str, slack: bool) -> &'static str {
    match (stage, slack) {
        ("Strategist", true) => ":dart:",
        ("Architect", true) => ":building_construction:",
        ("Coder", true) => ":computer:",
        ("Tester", true) => ":test_tube:",
        ("Reviewer", true) => ":memo:",
        (_, true) => ":robot_face:",
        ("Strategist", false) => "🎯",
        ("Architect", false) => "🏗️",
        ("Coder", false) => "💻",
        ("Tester", false) => "🧪",
        ("Reviewer", false) => "📝",
        (_, false) => "🤖",
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn format_target(target: &DateTime<Local>) -> String {
    target.format("%b %-d, %Y, %I:%M %p").to_string()
}

fn field(title: &str, value: impl Into<String>, short: bool) -> Value {
    json!({ "title": title, "value": value.into(), "short": short })
}

impl Notice<'_> {
    fn item(&self) -> &WorkItem {
        match self {
            Notice::Scheduled { item, .. }
            | Notice::Started { item, .. }
            | Notice::StageResponse { item, .. }
            | Notice::Completed { item, .. } => item,
        }
    }

    pub fn issue_number(&self) -> u64 {
        self.item().number
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notice::Scheduled { .. } => "scheduled",
            Notice::Started { .. } => "started",
            Notice::StageResponse { .. } => "stage_response",
            Notice::Completed { .. } => "completed",
        }
    }

    fn issue_line(&self) -> String {
        let item = self.item();
        format!("#{}: {}", item.number, item.title)
    }

    pub fn slack_payload(&self) -> Value {
        let issue = field("Issue", self.issue_line(), false);
        let attachment = match self {
            Notice::Scheduled { target, .. } => json!({
                "color": "#f39c12",
                "title": ":alarm_clock: Issue Scheduled",
                "fields": [
                    issue,
                    field("Scheduled Time", format_target(target), true),
                    field("Status", "Waiting to execute", true),
                ],
            }),
            Notice::Started {
                project,
                iteration,
                max_iterations,
                ..
            } => json!({
                "color": "#3498db",
                "title": ":rocket: Issue Processing Started",
                "fields": [
                    issue,
                    field("Project", project.display().to_string(), true),
                    field("Iteration", format!("{iteration}/{max_iterations}"), true),
                ],
            }),
            Notice::StageResponse { output, .. } => {
                let stage = output.stage.name();
                let mut attachment = json!({
                    "color": "#36a64f",
                    "title": format!("{} {stage} Agent", stage_emoji(stage, true)),
                    "fields": [
                        issue,
                        field("Action", output.action, true),
                        field("Duration", format!("{}s", output.duration.as_secs()), true),
                    ],
                });
                if !output.raw.is_empty() {
                    attachment["text"] = Value::String(format!("```{}```", preview(&output.raw)));
                }
                attachment
            }
            Notice::Completed { outcome, .. } => match outcome {
                ProcessingOutcome::Success { pr_number, url } => json!({
                    "color": "good",
                    "title": "✅ Issue Analysis Complete",
                    "fields": [
                        issue,
                        field("Status", "Pull Request Created", true),
                        field("PR", format!("<{url}|#{pr_number}>"), true),
                    ],
                }),
                ProcessingOutcome::Escalated { iterations } => json!({
                    "color": "warning",
                    "title": "⚠️ Issue Analysis Escalated",
                    "fields": [
                        issue,
                        field("Status", format!("Escalated after {iterations} iterations"), true),
                        field("Action Required", "Manual review needed", true),
                    ],
                }),
            },
        };
        json!({ "attachments": [attachment] })
    }

    pub fn telegram_text(&self) -> String {
        let issue = self.issue_line();
        match self {
            Notice::Scheduled { target, .. } => format!(
                "⏰ *Issue Scheduled*\n\n*Issue:* {issue}\n*Scheduled Time:* {}\n*Status:* Waiting to execute",
                format_target(target)
            ),
            Notice::Started {
                project,
                iteration,
                max_iterations,
                ..
            } => format!(
                "🚀 *Issue Processing Started*\n\n*Issue:* {issue}\n*Project:* `{}`\n*Iteration:* {iteration}/{max_iterations}",
                project.display()
            ),
            Notice::StageResponse { output, .. } => {
                let stage = output.stage.name();
                let mut text = format!(
                    "{} *{stage} Agent*\n\n*Issue:* {issue}\n*Action:* {}\n*Duration:* {}s",
                    stage_emoji(stage, false),
                    output.action,
                    output.duration.as_secs()
                );
                if !output.raw.is_empty() {
                    text.push_str(&format!("\n\n```\n{}\n```", preview(&output.raw)));
                }
                text
            }
            Notice::Completed { outcome, .. } => match outcome {
                ProcessingOutcome::Success { pr_number, url } => format!(
                    "✅ *Issue Analysis Complete*\n\n*Issue:* {issue}\n*Status:* Pull Request Created\n*PR:* [#{pr_number}]({url})"
                ),
                ProcessingOutcome::Escalated { iterations } => format!(
                    "⚠️ *Issue Analysis Escalated*\n\n*Issue:* {issue}\n*Status:* Escalated after {iterations} iterations\n*Action Required:* Manual review needed"
                ),
            },
        }
    }
}
