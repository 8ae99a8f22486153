//! Bounded retry with linear backoff for calls into the AI provider CLIs.
//!
//! Timeouts and transient network failures are retried; rate limits are
//! handed straight back because waiting them out is the caller's job.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;
use tracing::warn;

use crate::clock::Clock;
use crate::error::{ErrorKind, ForgeError, ForgeResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

fn transient_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"ECONNRESET",
            r"ETIMEDOUT",
            r"ENOTFOUND",
            r"(?i)socket hang up",
            r"(?i)network error",
            r"(?i)connection (reset|refused)",
            r"(?i)temporarily unavailable",
            r"\b50[23]\b",
        ])
        .unwrap()
    })
}

/// Whether `err` is worth another attempt at the provider layer.
pub fn is_retryable(err: &ForgeError) -> bool {
    match err.kind() {
        ErrorKind::RateLimit => false,
        ErrorKind::Timeout => true,
        ErrorKind::Fatal => transient_patterns().is_match(&format!("{err:#}")),
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. Attempt `n` failing sleeps `retry_delay * n`
    /// before the next one.
    pub fn run<T, F>(&self, clock: &dyn Clock, mut op: F) -> ForgeResult<T>
    where
        F: FnMut(u32) -> ForgeResult<T>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_retryable(&err) => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        attempt,
                        max = attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "provider call failed, retrying"
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
