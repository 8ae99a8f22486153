//! Tracing setup for the binary.
//!
//! Verbosity flags win over the configured level, and `RUST_LOG` wins over
//! both. With file logging on, output goes to `issue-forge-YYYY-MM-DD.log`
//! in the configured directory instead of stderr; only the newest
//! `max_files` of those are kept.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

const FILE_PREFIX: &str = "issue-forge-";
const FILE_SUFFIX: &str = ".log";

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(verbose: u8, configured_level: &str) -> String {
    let level = match verbose {
        0 => normalize_level(configured_level),
        1 => "debug",
        _ => "trace",
    };
    format!("issue_forge={level}")
}

fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

pub fn log_file_name(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d"))
}

/// Delete the oldest daily log files beyond `keep`. Returns how many went.
pub fn prune_old_logs(dir: &Path, keep: usize) -> Result<usize> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
        })
        .collect();
    if logs.len() <= keep {
        return Ok(0);
    }
    // Date-stamped names sort chronologically.
    logs.sort();
    let excess = logs.len() - keep;
    for path in &logs[..excess] {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(excess)
}

pub fn init(verbose: u8, config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, &config.level)));

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
        return Ok(());
    }

    let dir = &config.file_path;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(log_file_name(chrono::Local::now().date_naive()));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    match prune_old_logs(dir, config.max_files.max(1)) {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "pruned old log files"),
        Err(e) => tracing::warn!(error = %e, "failed to prune old log files"),
    }
    Ok(())
}
