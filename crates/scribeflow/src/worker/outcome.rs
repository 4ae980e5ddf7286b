use std::fmt;
use std::time::Duration;

use crate::job::JobStatus;

/// What one delivery of a queue entry achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        detail: String,
    },
    /// Back in `pending`, eligible again after `retry_in`.
    Retrying {
        job_id: String,
        retry_in: Duration,
        attempts_remaining: u32,
    },
    /// Another execution of the same job holds the lease.
    Deferred {
        job_id: String,
    },
    /// The job was not `pending` when delivered.
    Skipped {
        job_id: String,
        status: JobStatus,
    },
    /// The queue entry pointed at a job that no longer exists.
    Missing {
        job_id: String,
    },
    /// An internal error interrupted processing.
    Error {
        job_id: String,
        message: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Completed { job_id }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::Retrying { job_id, .. }
            | JobOutcome::Deferred { job_id }
            | JobOutcome::Skipped { job_id, .. }
            | JobOutcome::Missing { job_id }
            | JobOutcome::Error { job_id, .. } => job_id,
        }
    }

    /// Whether this delivery left the job in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. } | JobOutcome::Failed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { job_id } => write!(f, "{} completed", job_id),
            JobOutcome::Failed { job_id, detail } => write!(f, "{} failed: {}", job_id, detail),
            JobOutcome::Retrying {
                job_id,
                retry_in,
                attempts_remaining,
            } => write!(
                f,
                "{} retrying in {}s ({} retries left)",
                job_id,
                retry_in.as_secs(),
                attempts_remaining
            ),
            JobOutcome::Deferred { job_id } => write!(f, "{} deferred (already running)", job_id),
            JobOutcome::Skipped { job_id, status } => write!(f, "{} skipped ({})", job_id, status),
            JobOutcome::Missing { job_id } => write!(f, "{} missing", job_id),
            JobOutcome::Error { job_id, message } => write!(f, "{} error: {}", job_id, message),
        }
    }
}
