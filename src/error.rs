//! Error taxonomy shared by every component that talks to the outside world.
//!
//! Callers branch on [`ForgeError::kind`] instead of string matching:
//!
//! | Kind        | Raised by                                   | Handled by                        |
//! |-------------|---------------------------------------------|-----------------------------------|
//! | `RateLimit` | executor output / HTTP 429                  | blocking wait at the catch site   |
//! | `Timeout`   | executor deadline                           | provider retry, then fatal        |
//! | `Fatal`     | non-zero exit, HTTP error, I/O, parse, ...  | label rollback + cooldown         |

use thiserror::Error;

/// Discriminant used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Timeout => write!(f, "timeout"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ForgeError {
    /// An external dependency asked us to back off.
    #[error("rate limit hit; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A subprocess was killed after exceeding its deadline.
    #[error("command timed out after {elapsed_secs}s")]
    TimedOut { elapsed_secs: u64 },

    /// A subprocess exited non-zero. `output` is a truncated excerpt.
    #[error("{command} failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::CommandFailed { .. } | Self::Other(_) => ErrorKind::Fatal,
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Suggested delay when this is a rate-limit signal.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Process exit status for an error reaching `main`: a failed external
/// command passes its own status through, everything else exits with 1.
pub fn exit_status(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ForgeError>()
        .and_then(ForgeError::exit_code)
        .filter(|code| *code > 0)
        .unwrap_or(1)
}

/// Wrap a plain message as a fatal error.
pub fn fatal(message: impl std::fmt::Display) -> ForgeError {
    ForgeError::Other(anyhow::anyhow!("{message}"))
}
