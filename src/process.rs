//! External command execution with failure classification.
//!
//! Every subprocess (git, `gh`, the AI CLIs) goes through a [`CommandRunner`].
//! The runner turns raw process results into the shared error taxonomy. A
//! failed run whose output carries a rate-limit signature becomes
//! [`ForgeError::RateLimited`], a blown deadline becomes
//! [`ForgeError::TimedOut`], and any other non-zero exit becomes
//! [`ForgeError::CommandFailed`] with a short output excerpt.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use regex::Regex;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::clock::Clock;
use crate::error::{ForgeError, ForgeResult};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Per-stream capture cap. Whole lines past the cap are drained and dropped.
pub const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const EXCERPT_CHARS: usize = 500;
const WAIT_SLICE_SECS: u64 = 10;

/// A command to execute, built up fluently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Short human-readable rendering for logs (long prompts are clipped).
    pub fn display(&self) -> String {
        let joined = self.args.join(" ");
        let clipped: String = joined.chars().take(100).collect();
        if clipped.len() < joined.len() {
            format!("{} {clipped}...", self.program)
        } else {
            format!("{} {clipped}", self.program)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion. Non-success outcomes are reported as errors.
    fn run(&self, spec: &CommandSpec) -> ForgeResult<CommandOutput>;
}

/// Runs real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> ForgeResult<CommandOutput> {
        debug!(command = %spec.display(), "executing");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to execute {}", spec.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let stdout_handle = thread::spawn(move || read_lines_capped(stdout, MAX_OUTPUT_BYTES));
        let stderr_handle = thread::spawn(move || read_lines_capped(stderr, MAX_OUTPUT_BYTES));

        let status = match child
            .wait_timeout(spec.timeout)
            .with_context(|| format!("failed to wait for {}", spec.program))?
        {
            Some(status) => status,
            None => {
                warn!(
                    command = %spec.program,
                    timeout_secs = spec.timeout.as_secs(),
                    "command timed out, killing"
                );
                child
                    .kill()
                    .with_context(|| format!("failed to kill {}", spec.program))?;
                child
                    .wait()
                    .with_context(|| format!("failed to reap {}", spec.program))?;
                return Err(ForgeError::TimedOut {
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
        };

        let stdout = join_reader(stdout_handle)?;
        let stderr = join_reader(stderr_handle)?;
        classify(
            &spec.program,
            CommandOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            },
        )
    }
}

fn join_reader(handle: thread::JoinHandle<std::io::Result<String>>) -> ForgeResult<String> {
    match handle.join() {
        Ok(result) => Ok(result.context("failed to read command output")?),
        Err(_) => Err(anyhow!("output reader thread panicked").into()),
    }
}

/// Read a stream line by line, keeping whole lines until `limit` bytes.
fn read_lines_capped<R: Read>(reader: R, limit: usize) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if dropped == 0 && kept.len() + n <= limit {
            kept.extend_from_slice(&line);
        } else {
            dropped += n;
        }
    }

    if dropped > 0 {
        warn!(dropped_bytes = dropped, "command output exceeded capture cap");
    }
    Ok(String::from_utf8_lossy(&kept).into_owned())
}

/// Apply the exit-code / rate-limit rules to a finished process.
///
/// Output of a successful run is never scanned: git echoes branch names and
/// commit messages such as `issue-forge/issue-429`.
pub fn classify(program: &str, output: CommandOutput) -> ForgeResult<CommandOutput> {
    let code = match output.exit_code {
        Some(0) | None => return Ok(output),
        Some(code) => code,
    };

    let combined = output.combined();
    if is_rate_limited(&combined) {
        let retry_after_secs = extract_retry_after(&combined);
        warn!(command = %program, exit_code = code, retry_after_secs, "rate limit detected in output");
        return Err(ForgeError::RateLimited { retry_after_secs });
    }
    Err(ForgeError::CommandFailed {
        command: program.to_string(),
        exit_code: code,
        output: excerpt(&combined, EXCERPT_CHARS),
    })
}

fn rate_limit_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)rate limit").unwrap(),
            Regex::new(r"(?i)too many requests").unwrap(),
            Regex::new(r"\b429\b").unwrap(),
            Regex::new(r"(?i)quota exceeded").unwrap(),
        ]
    })
}

fn retry_after_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)retry after (\d+)").unwrap(),
            Regex::new(r"(?i)wait (\d+) seconds").unwrap(),
        ]
    })
}

pub fn is_rate_limited(output: &str) -> bool {
    rate_limit_patterns().iter().any(|re| re.is_match(output))
}

pub fn extract_retry_after(output: &str) -> u64 {
    retry_after_patterns()
        .iter()
        .find_map(|re| {
            re.captures(output)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Block for `seconds`, in slices of at most ten seconds, calling
/// `on_progress(remaining)` after every slice that leaves time on the clock.
pub fn wait_in_slices<F>(clock: &dyn Clock, seconds: u64, mut on_progress: F)
where
    F: FnMut(u64),
{
    let mut remaining = seconds;
    while remaining > 0 {
        let slice = remaining.min(WAIT_SLICE_SECS);
        clock.sleep(Duration::from_secs(slice));
        remaining -= slice;
        if remaining > 0 {
            on_progress(remaining);
        }
    }
}

/// Blocking wait after a rate-limit signal, with remaining-time progress logs.
pub fn wait_for_rate_limit(clock: &dyn Clock, seconds: u64) {
    warn!(seconds, "rate limit hit, waiting");
    wait_in_slices(clock, seconds, |remaining| {
        info!(remaining_secs = remaining, "rate limit wait");
    });
    info!("rate limit wait complete, resuming");
}
