//! Test harness for isolated pipeline execution.
//!
//! The `TestHarness` struct provides:
//! - A temporary audio directory and an in-memory database
//! - A `wiremock` server standing in for the transcription backend
//! - Service and worker instances wired to both, plus queue-driving helpers

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use wiremock::MockServer;

use scribeflow::backend::BackendClient;
use scribeflow::config::{resolve_api_key, Config};
use scribeflow::db::{job_repo, queue_repo, Database};
use scribeflow::job::Job;
use scribeflow::service::{SubmitRequest, TranscriptionService};
use scribeflow::storage::FilesystemAudioStore;
use scribeflow::worker::{JobOutcome, JobWorker};

use super::builders::{ConfigBuilder, RecordingNotifier, SubmitBuilder};

pub struct TestHarness {
    temp_dir: TempDir,
    pub server: MockServer,
    pub config: Config,
    pub db: Database,
    pub store: Arc<FilesystemAudioStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestHarness {
    /// Harness with default retry settings and a recording notifier.
    pub async fn start() -> Self {
        Self::start_with(|b| b, RecordingNotifier::default()).await
    }

    pub async fn start_with(
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        notifier: RecordingNotifier,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let server = MockServer::start().await;
        let audio_dir = temp_dir.path().join("blobs");
        let config = configure(ConfigBuilder::new(
            audio_dir.to_str().expect("utf-8 temp path"),
            &server.uri(),
        ))
        .build();

        Self {
            store: Arc::new(FilesystemAudioStore::new(&audio_dir)),
            db: Database::open_in_memory().expect("Failed to open database"),
            notifier: Arc::new(notifier),
            temp_dir,
            server,
            config,
        }
    }

    pub fn backend(&self) -> BackendClient {
        let key = resolve_api_key(&self.config.backend).expect("api key");
        BackendClient::new(&self.config.backend, key).expect("backend client")
    }

    pub fn service(&self) -> TranscriptionService {
        TranscriptionService::new(
            self.db.clone(),
            self.store.clone(),
            self.backend(),
            self.config.submission.clone(),
            &self.config.retry,
        )
    }

    pub fn worker(&self) -> JobWorker {
        JobWorker::new(
            self.db.clone(),
            self.store.clone(),
            self.backend(),
            self.notifier.clone(),
            &self.config,
        )
    }

    /// Submits a default upload for `owner` and returns the job id.
    pub fn submit(&self, owner: &str) -> String {
        self.submit_request(SubmitBuilder::new(owner).build())
    }

    pub fn submit_request(&self, request: SubmitRequest) -> String {
        self.service().submit(request).expect("submit").job_id
    }

    /// Claims whatever is due `offset_secs` from now and runs it.
    pub async fn run_due(&self, worker: &JobWorker, offset_secs: i64) -> Option<JobOutcome> {
        let at = Utc::now() + Duration::seconds(offset_secs);
        let entry = queue_repo::claim_due(&self.db, at, worker.lease_duration())
            .expect("claim_due")?;
        Some(worker.process(entry).await)
    }

    pub fn job(&self, id: &str) -> Job {
        let job = job_repo::find_by_id(&self.db, id)
            .expect("find_by_id")
            .expect("job exists");
        assert_invariants(&job);
        job
    }

    pub fn audio_path(&self, job: &Job) -> std::path::PathBuf {
        self.store.root().join(&job.audio_ref)
    }
}

/// Record invariants that must hold after every transition.
pub fn assert_invariants(job: &Job) {
    if let Some(violation) = job.invariant_violation() {
        panic!("job {} violates an invariant: {}", job.id, violation);
    }
}
