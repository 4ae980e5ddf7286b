//! Owner-facing operations: submit audio, query job state, probe the backend.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::BackendClient;
use crate::config::{RetryConfig, SubmissionConfig};
use crate::db::{job_repo, owner_repo, queue_repo, Database, DatabaseError};
use crate::error::{StorageError, ValidationError};
use crate::job::{Job, JobStatus, JobStatusView};
use crate::storage::{content_type_for, AudioStore};

pub use crate::db::job_repo::JobFilter;

pub const MAX_LANGUAGE_CHARS: usize = 10;
pub const MAX_MODEL_CHARS: usize = 50;
pub const MAX_TITLE_CHARS: usize = 255;

static RE_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+(-[A-Za-z]+)*$").unwrap());

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Unknown id, or an id owned by someone else.
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The job row exists but could not be queued; a reconciliation sweep
    /// will queue it later.
    #[error("Failed to enqueue job '{job_id}': {source}")]
    Enqueue {
        job_id: String,
        #[source]
        source: DatabaseError,
    },
}

/// A new audio upload.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub filename: String,
    /// Derived from the filename when absent.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
}

/// Result of a backend probe. Always produced, even when the backend is down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub model: Option<String>,
    pub have_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TranscriptionService {
    db: Database,
    store: Arc<dyn AudioStore>,
    backend: BackendClient,
    submission: SubmissionConfig,
    max_retries: u32,
}

impl TranscriptionService {
    pub fn new(
        db: Database,
        store: Arc<dyn AudioStore>,
        backend: BackendClient,
        submission: SubmissionConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            db,
            store,
            backend,
            submission,
            max_retries: retry.max_retries,
        }
    }

    /// Validates and stores an upload, creates its `pending` job and queues it.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, ServiceError> {
        let content_type = self.validate(&request)?;
        let SubmitRequest {
            owner_id,
            filename,
            bytes,
            language,
            model,
            title,
            ..
        } = request;

        let audio_ref = self.store.put(&filename, &bytes)?;
        let job = Job::new_pending(
            owner_id,
            filename,
            content_type,
            bytes.len() as u64,
            audio_ref,
            non_blank(language),
            non_blank(model),
            non_blank(title),
        );

        if let Err(e) = job_repo::insert(&self.db, &job) {
            if let Err(cleanup) = self.store.delete(&job.audio_ref) {
                warn!(audio_ref = %job.audio_ref, error = %cleanup, "Failed to remove orphaned audio");
            }
            return Err(e.into());
        }

        queue_repo::enqueue(&self.db, &job.id, Utc::now(), self.max_retries).map_err(|source| {
            ServiceError::Enqueue {
                job_id: job.id.clone(),
                source,
            }
        })?;

        info!(
            job_id = %job.id,
            owner = %job.owner_id,
            bytes = job.file_size,
            content_type = %job.content_type,
            "Transcription job submitted"
        );

        Ok(SubmitReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    /// Runs the submission checks in order and returns the effective
    /// content type.
    fn validate(&self, request: &SubmitRequest) -> Result<String, ValidationError> {
        if request.owner_id.trim().is_empty() {
            return Err(ValidationError::MissingOwner);
        }
        if request.bytes.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        let size = request.bytes.len() as u64;
        if size > self.submission.max_upload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                max: self.submission.max_upload_bytes,
            });
        }

        let content_type = match request.content_type.as_deref().map(normalize_content_type) {
            Some(ct) if !ct.is_empty() => ct,
            _ => content_type_for(&request.filename),
        };
        if !self
            .submission
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&content_type))
        {
            return Err(ValidationError::UnsupportedContentType(content_type));
        }

        if let Some(language) = request.language.as_deref().map(str::trim) {
            if !language.is_empty()
                && (language.chars().count() > MAX_LANGUAGE_CHARS
                    || !RE_LANGUAGE.is_match(language))
            {
                return Err(ValidationError::InvalidLanguage(language.to_string()));
            }
        }

        if let Some(model) = request.model.as_deref() {
            let len = model.chars().count();
            if len > MAX_MODEL_CHARS {
                return Err(ValidationError::ModelNameTooLong {
                    len,
                    max: MAX_MODEL_CHARS,
                });
            }
        }

        if let Some(title) = request.title.as_deref() {
            let len = title.chars().count();
            if len > MAX_TITLE_CHARS {
                return Err(ValidationError::TitleTooLong {
                    len,
                    max: MAX_TITLE_CHARS,
                });
            }
        }

        Ok(content_type)
    }

    pub fn status(&self, owner_id: &str, job_id: &str) -> Result<JobStatusView, ServiceError> {
        let job = self.get(owner_id, job_id)?;
        Ok(JobStatusView::from(&job))
    }

    pub fn get(&self, owner_id: &str, job_id: &str) -> Result<Job, ServiceError> {
        job_repo::find_for_owner(&self.db, owner_id, job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))
    }

    /// An owner's jobs, newest first, with the unpaginated total.
    pub fn list(&self, owner_id: &str, filter: &JobFilter) -> Result<(Vec<Job>, u64), ServiceError> {
        Ok(job_repo::query(&self.db, owner_id, filter)?)
    }

    /// Probes the backend the owner's jobs would use.
    pub async fn health(&self, owner_id: &str) -> HealthReport {
        let settings = match owner_repo::get_or_default(&self.db, owner_id) {
            Ok(settings) => settings,
            Err(e) => {
                return HealthReport {
                    status: "error".to_string(),
                    model: None,
                    have_key: self.backend.has_api_key(),
                    error: Some(e.to_string()),
                }
            }
        };
        let client = self.backend.for_owner(&settings);
        let have_key = client.has_api_key();

        match client.health().await {
            Ok(health) => HealthReport {
                status: health.status,
                model: health.model,
                have_key,
                error: None,
            },
            Err(e) => HealthReport {
                status: "error".to_string(),
                model: None,
                have_key,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Lowercases and strips parameters such as `; codecs=opus`.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::storage::FilesystemAudioStore;
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> TranscriptionService {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(FilesystemAudioStore::new(temp.path()));
        let backend = BackendClient::new(&BackendConfig::new("http://127.0.0.1:9"), None).unwrap();
        let submission = SubmissionConfig {
            max_upload_bytes: 16,
            ..SubmissionConfig::default()
        };
        TranscriptionService::new(db, store, backend, submission, &RetryConfig::default())
    }

    fn request(bytes: &[u8]) -> SubmitRequest {
        SubmitRequest {
            owner_id: "owner-1".to_string(),
            filename: "memo.mp3".to_string(),
            bytes: bytes.to_vec(),
            ..SubmitRequest::default()
        }
    }

    #[test]
    fn test_submit_creates_pending_job_and_queue_entry() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let receipt = service.submit(request(b"ID3audio")).unwrap();
        assert_eq!(receipt.status, JobStatus::Pending);

        let job = service.get("owner-1", &receipt.job_id).unwrap();
        assert_eq!(job.content_type, "audio/mpeg");
        assert_eq!(job.file_size, 8);

        let entry = queue_repo::find(&service.db, &receipt.job_id).unwrap().unwrap();
        assert_eq!(entry.attempts_remaining, 3);
    }

    #[test]
    fn test_validation_order() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        assert!(matches!(
            service.submit(request(b"")),
            Err(ServiceError::Validation(ValidationError::EmptyPayload))
        ));

        // oversize wins over a bad content type
        let mut big = request(&[0u8; 17]);
        big.content_type = Some("video/mp4".to_string());
        assert!(matches!(
            service.submit(big),
            Err(ServiceError::Validation(ValidationError::PayloadTooLarge { size: 17, max: 16 }))
        ));

        let mut video = request(b"x");
        video.content_type = Some("video/mp4".to_string());
        assert!(matches!(
            service.submit(video),
            Err(ServiceError::Validation(ValidationError::UnsupportedContentType(_)))
        ));

        let mut lang = request(b"x");
        lang.language = Some("de_DE".to_string());
        assert!(matches!(
            service.submit(lang),
            Err(ServiceError::Validation(ValidationError::InvalidLanguage(_)))
        ));

        let mut model = request(b"x");
        model.model = Some("m".repeat(51));
        assert!(matches!(
            service.submit(model),
            Err(ServiceError::Validation(ValidationError::ModelNameTooLong { len: 51, .. }))
        ));

        let mut title = request(b"x");
        title.title = Some("t".repeat(256));
        assert!(matches!(
            service.submit(title),
            Err(ServiceError::Validation(ValidationError::TitleTooLong { len: 256, .. }))
        ));

        let (_, total) = service.list("owner-1", &JobFilter::default()).unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_content_type_parameters_are_ignored() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut req = request(b"OggS");
        req.filename = "voice.webm".to_string();
        req.content_type = Some("Audio/WebM; codecs=opus".to_string());
        let receipt = service.submit(req).unwrap();
        let job = service.get("owner-1", &receipt.job_id).unwrap();
        assert_eq!(job.content_type, "audio/webm");
    }

    #[test]
    fn test_language_codes() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        for ok in ["de", "en-US", "auto"] {
            let mut req = request(b"x");
            req.language = Some(ok.to_string());
            assert!(service.submit(req).is_ok(), "{} should be accepted", ok);
        }
        let mut req = request(b"x");
        req.language = Some("abcdefghijk".to_string());
        assert!(service.submit(req).is_err());
    }

    #[test]
    fn test_other_owner_sees_not_found() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let receipt = service.submit(request(b"x")).unwrap();

        assert!(matches!(
            service.status("owner-2", &receipt.job_id),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.status("owner-1", "no-such-job"),
            Err(ServiceError::NotFound(_))
        ));

        let view = service.status("owner-1", &receipt.job_id).unwrap();
        assert!(view.is_processing);
        assert!(!view.is_complete);
        assert_eq!(view.error_detail, "");
    }

    #[tokio::test]
    async fn test_health_never_fails() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let report = service.health("owner-1").await;
        assert_eq!(report.status, "error");
        assert!(!report.have_key);
        assert!(report.error.is_some());
    }
}
