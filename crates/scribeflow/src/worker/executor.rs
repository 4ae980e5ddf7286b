//! Executes one queue delivery: lease, transition, backend call, verdict.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::lease::LeaseTable;
use super::outcome::JobOutcome;
use crate::backend::{BackendClient, BackendFailure, RetryPolicy, TranscriptResult, Verdict};
use crate::config::Config;
use crate::db::job_repo::{self, Completion};
use crate::db::owner_repo::{self, OwnerSettings};
use crate::db::queue_repo::{self, QueueEntry};
use crate::db::Database;
use crate::error::WorkerError;
use crate::job::{Job, JobStatus};
use crate::notify::{CompletionNotice, Notifier};
use crate::sanitize;
use crate::storage::AudioStore;

/// Processes queue entries against the job store and the backend.
///
/// Shared by every worker thread of a pool; per-job exclusivity comes from
/// the in-process [`LeaseTable`] plus the conditional `pending -> processing`
/// update, which also guards against other processes.
pub struct JobWorker {
    db: Database,
    store: Arc<dyn AudioStore>,
    backend: BackendClient,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    leases: LeaseTable,
    worker_id: String,
    lease_duration: chrono::Duration,
    default_language: String,
    default_model: String,
}

impl JobWorker {
    pub fn new(
        db: Database,
        store: Arc<dyn AudioStore>,
        backend: BackendClient,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            store,
            backend,
            notifier,
            policy: RetryPolicy::from(&config.retry),
            leases: LeaseTable::new(),
            worker_id: format!("scribeflow-{}", std::process::id()),
            lease_duration: lease_duration(config),
            default_language: config.submission.default_language.clone(),
            default_model: config.submission.default_model.clone(),
        }
    }

    /// Shares a lease table with other workers in this process.
    pub fn with_leases(mut self, leases: LeaseTable) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        self.lease_duration
    }

    /// Handles one delivery of `entry`. Never fails: internal errors are
    /// recorded on the job where possible and reported as
    /// [`JobOutcome::Error`].
    pub async fn process(&self, entry: QueueEntry) -> JobOutcome {
        let job_id = entry.job_id.clone();

        let Some(_lease) = self.leases.try_acquire(&job_id) else {
            debug!(job_id = %job_id, "Job already running in this process, deferring");
            return JobOutcome::Deferred { job_id };
        };

        let job = match self.start(&entry) {
            Ok(Start::Running(job)) => job,
            Ok(Start::Done(outcome)) => return outcome,
            Err(e) => {
                // Nothing was taken over yet; the claim lapses and the entry
                // is redelivered.
                error!(job_id = %job_id, error = %e, "Failed to start job");
                return JobOutcome::Error {
                    job_id,
                    message: e.to_string(),
                };
            }
        };

        let span = info_span!(
            "job",
            job_id = %job.id,
            owner = %job.owner_id,
            attempt = job.retry_count + 1
        );
        async {
            match self.execute(job, &entry).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Job processing failed");
                    self.fail_after_error(&job_id, &e);
                    JobOutcome::Error {
                        job_id: job_id.clone(),
                        message: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Moves the job from `pending` to `processing` under this worker's id.
    fn start(&self, entry: &QueueEntry) -> Result<Start, WorkerError> {
        let job_id = entry.job_id.as_str();

        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            warn!(job_id, "Queued job no longer exists, dropping entry");
            queue_repo::ack(&self.db, job_id)?;
            return Ok(Start::Done(JobOutcome::Missing {
                job_id: job_id.to_string(),
            }));
        };

        if job.status != JobStatus::Pending {
            // A processing job belongs to another execution that will ack or
            // reschedule the entry itself.
            if job.status.is_terminal() {
                self.ack_settled(job_id);
            }
            debug!(job_id, status = %job.status, "Job not pending, skipping");
            return Ok(Start::Done(JobOutcome::Skipped {
                job_id: job_id.to_string(),
                status: job.status,
            }));
        }

        job.status.transition(JobStatus::Processing)?;
        let now = Utc::now();
        if !job_repo::begin_processing(
            &self.db,
            job_id,
            &self.worker_id,
            now + self.lease_duration,
            now,
        )? {
            debug!(job_id, "Lost the race to start job");
            return Ok(Start::Done(JobOutcome::Skipped {
                job_id: job_id.to_string(),
                status: JobStatus::Processing,
            }));
        }

        Ok(Start::Running(job))
    }

    /// Runs a job that this worker just moved to `processing`.
    async fn execute(&self, mut job: Job, entry: &QueueEntry) -> Result<JobOutcome, WorkerError> {
        job.status = JobStatus::Processing;

        let settings = owner_repo::get_or_default(&self.db, &job.owner_id)?;
        let client = self.backend.for_owner(&settings);
        let language = job.language_hint(settings.default_language.as_deref(), &self.default_language);
        let model = job.resolved_model(settings.default_model.as_deref(), &self.default_model);

        let audio = self.store.read(&job.audio_ref)?;
        info!(
            backend = %sanitize::redact_url(client.base_url()),
            bytes = audio.len(),
            language = language.as_deref().unwrap_or("auto"),
            "Starting transcription"
        );

        match client
            .execute(audio, &job.filename, &job.content_type, language.as_deref())
            .await
        {
            Ok(transcript) => {
                self.complete(job, &settings, transcript, language, model)
                    .await
            }
            Err(failure) => self.handle_failure(&job, entry, failure),
        }
    }

    async fn complete(
        &self,
        mut job: Job,
        settings: &OwnerSettings,
        transcript: TranscriptResult,
        language: Option<String>,
        model: String,
    ) -> Result<JobOutcome, WorkerError> {
        job.status = job.status.transition(JobStatus::Completed)?;
        let completion = Completion {
            text: transcript.text,
            language: transcript.language.or(language),
            model_name: Some(transcript.model.unwrap_or(model)),
            segments_count: transcript.segments_count,
        };

        let now = Utc::now();
        if !job_repo::mark_completed(&self.db, &job.id, &completion, now)? {
            return Err(WorkerError::JobVanished(job.id));
        }
        self.ack_settled(&job.id);

        info!(
            chars = completion.text.chars().count(),
            segments = completion.segments_count,
            "Transcription completed"
        );

        job.transcribed_text = completion.text;
        job.language = completion.language;
        job.model_name = completion.model_name;
        job.segments_count = completion.segments_count;
        job.completed_at = Some(now);
        job.updated_at = now;

        if settings.notifications_enabled {
            let notice = CompletionNotice::for_job(settings.email.as_deref(), &job);
            if let Err(e) = self.notifier.notify(&notice).await {
                warn!(error = %e, "Failed to send completion notice");
            }
        }

        if settings.auto_delete_audio {
            if let Err(e) = self.store.delete(&job.audio_ref) {
                warn!(audio_ref = %job.audio_ref, error = %e, "Failed to delete audio");
            }
        }

        Ok(JobOutcome::Completed { job_id: job.id })
    }

    fn handle_failure(
        &self,
        job: &Job,
        entry: &QueueEntry,
        failure: BackendFailure,
    ) -> Result<JobOutcome, WorkerError> {
        let remaining = entry
            .attempts_remaining
            .min(self.policy.max_retries.saturating_sub(job.retry_count));
        let now = Utc::now();

        match self.policy.decide(&failure, remaining) {
            Verdict::Terminal { message } => {
                job.status.transition(JobStatus::Failed)?;
                if !job_repo::mark_failed(&self.db, &job.id, &message, now)? {
                    return Err(WorkerError::JobVanished(job.id.clone()));
                }
                self.ack_settled(&job.id);
                error!(error = %message, "Transcription failed");
                Ok(JobOutcome::Failed {
                    job_id: job.id.clone(),
                    detail: message,
                })
            }
            Verdict::Retry { delay, message } => {
                job.status.transition(JobStatus::Pending)?;
                if !job_repo::requeue(&self.db, &job.id, &message, now)? {
                    return Err(WorkerError::JobVanished(job.id.clone()));
                }

                let attempts_remaining = remaining - 1;
                let eligible_at = now + to_chrono(delay);
                let scheduled = match queue_repo::reschedule(
                    &self.db,
                    &job.id,
                    eligible_at,
                    attempts_remaining,
                ) {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        queue_repo::enqueue(&self.db, &job.id, eligible_at, attempts_remaining)
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = scheduled {
                    // The job is already pending; the lapsed claim or the
                    // reconciliation sweep brings it back.
                    warn!(error = %e, "Failed to schedule retry");
                }

                warn!(
                    error = %message,
                    retry_in_secs = delay.as_secs(),
                    attempts_remaining,
                    "Transcription attempt failed, retrying"
                );
                Ok(JobOutcome::Retrying {
                    job_id: job.id.clone(),
                    retry_in: delay,
                    attempts_remaining,
                })
            }
        }
    }

    /// Drops the queue entry of a job whose terminal state is committed.
    /// A leftover entry is acked on redelivery, so failures only get logged.
    fn ack_settled(&self, job_id: &str) {
        if let Err(e) = queue_repo::ack(&self.db, job_id) {
            warn!(job_id, error = %e, "Failed to ack queue entry");
        }
    }

    /// Best-effort: records an internal error on a job this worker moved to
    /// `processing`. A job already back in `pending` is left alone.
    fn fail_after_error(&self, job_id: &str, err: &WorkerError) {
        let detail = sanitize::error_detail(&format!("Internal error: {}", err));
        match job_repo::mark_failed(&self.db, job_id, &detail, Utc::now()) {
            Ok(true) => self.ack_settled(job_id),
            Ok(false) => {}
            Err(e) => {
                error!(
                    job_id,
                    error = %e,
                    "Failed to record job failure, leaving job for reconciliation"
                );
            }
        }
    }
}

enum Start {
    Running(Job),
    Done(JobOutcome),
}

/// Upper bound for leases and retry delays.
const MAX_SCHEDULE_SECS: u64 = 365 * 24 * 60 * 60;

/// How long a job may stay in `processing` before it counts as lost.
pub fn lease_duration(config: &Config) -> chrono::Duration {
    let secs = config
        .backend
        .timeout_secs
        .saturating_add(config.workers.lease_grace_secs);
    to_chrono(Duration::from_secs(secs))
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::seconds(delay.as_secs().min(MAX_SCHEDULE_SECS) as i64)
}
