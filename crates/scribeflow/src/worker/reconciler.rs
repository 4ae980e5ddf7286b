use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::{job_repo, queue_repo, Database, DatabaseError};

pub const LEASE_EXPIRED_DETAIL: &str = "Worker lost while processing (lease expired)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Processing jobs failed because their lease ran out.
    pub expired: usize,
    /// Pending jobs that had no queue entry and were queued again.
    pub requeued: usize,
}

/// Repairs state left behind by crashed workers or failed enqueues.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    max_retries: u32,
}

impl Reconciler {
    pub fn new(db: Database, max_retries: u32) -> Self {
        Self { db, max_retries }
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, DatabaseError> {
        let mut report = SweepReport::default();

        for job_id in job_repo::find_expired_leases(&self.db, now)? {
            if job_repo::mark_failed(&self.db, &job_id, LEASE_EXPIRED_DETAIL, now)? {
                queue_repo::ack(&self.db, &job_id)?;
                warn!(job_id = %job_id, "Failed job whose worker lease expired");
                report.expired += 1;
            }
        }

        for (job_id, retry_count) in job_repo::find_pending_unqueued(&self.db)? {
            let attempts = self.max_retries.saturating_sub(retry_count);
            queue_repo::enqueue(&self.db, &job_id, now, attempts)?;
            info!(job_id = %job_id, attempts, "Re-queued pending job without queue entry");
            report.requeued += 1;
        }

        Ok(report)
    }
}
