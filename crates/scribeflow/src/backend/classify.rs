//! Maps backend failures onto retry decisions.

use std::time::Duration;

use super::error::BackendFailure;
use crate::config::RetryConfig;
use crate::sanitize;

/// What the worker should do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Fail the job now with `message` as its error detail.
    Terminal { message: String },
    /// Put the job back in the queue, eligible again after `delay`.
    Retry { delay: Duration, message: String },
}

impl Verdict {
    pub fn is_retry(&self) -> bool {
        matches!(self, Verdict::Retry { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Verdict::Terminal { message } | Verdict::Retry { message, .. } => message,
        }
    }
}

/// Fixed-delay retry policy.
///
/// 5xx responses and transport failures are transient; everything else
/// (4xx, timeouts, malformed bodies) means the request itself will not
/// succeed by repeating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub server_error_delay: Duration,
    pub transport_error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            server_error_delay: Duration::from_secs(config.server_error_delay_secs),
            transport_error_delay: Duration::from_secs(config.transport_error_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Classifies a failure, ignoring the retry budget.
    pub fn classify(&self, failure: &BackendFailure) -> Verdict {
        let message = sanitize::error_detail(&failure.to_string());
        match failure {
            BackendFailure::Http { status, .. } if (500..600).contains(status) => Verdict::Retry {
                delay: self.server_error_delay,
                message,
            },
            BackendFailure::Transport(_) => Verdict::Retry {
                delay: self.transport_error_delay,
                message,
            },
            BackendFailure::Http { .. }
            | BackendFailure::Timeout
            | BackendFailure::MalformedResponse(_)
            | BackendFailure::InvalidRequest(_) => Verdict::Terminal { message },
        }
    }

    /// Classifies a failure given how many retries the job has left. A
    /// retryable failure with nothing left becomes terminal and keeps the
    /// last error as its detail.
    pub fn decide(&self, failure: &BackendFailure, attempts_remaining: u32) -> Verdict {
        match self.classify(failure) {
            Verdict::Retry { message, .. } if attempts_remaining == 0 => {
                Verdict::Terminal { message }
            }
            verdict => verdict,
        }
    }
}
