pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod notify;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod worker;

pub use backend::{BackendClient, BackendFailure, RetryPolicy, TranscriptResult, Verdict};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{
    ConfigError, Result, ScribeflowError, StorageError, ValidationError, WorkerError,
};
pub use job::{Job, JobStatus, JobStatusView, StateError};
pub use notify::{CompletionNotice, LogNotifier, NoopNotifier, Notifier, NotifyError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::{
    HealthReport, ServiceError, SubmitReceipt, SubmitRequest, TranscriptionService,
};
pub use storage::{AudioStore, FilesystemAudioStore};
pub use worker::{JobOutcome, JobWorker, LeaseTable, Reconciler, WorkerPool};
