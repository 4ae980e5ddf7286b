//! Transcription job model.

pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use status::{JobStatus, StateError};

/// A single transcription request, from submission to terminal resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// Identity that submitted the job. Never changes after creation.
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Original filename of the uploaded audio.
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    /// Blob store key of the audio payload.
    pub audio_ref: String,
    /// Language hint given at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_language: Option<String>,
    /// Model requested at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<String>,
    /// Detected or used language (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Model actually used (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub transcribed_text: String,
    pub segments_count: u32,
    pub status: JobStatus,
    /// Failure diagnostic; non-empty only when `status` is `failed`.
    pub error_detail: String,
    /// Diagnostic of the most recent retryable failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by every transition.
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a fresh `pending` job.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        owner_id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        file_size: u64,
        audio_ref: impl Into<String>,
        requested_language: Option<String>,
        requested_model: Option<String>,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title,
            filename: filename.into(),
            content_type: content_type.into(),
            file_size,
            audio_ref: audio_ref.into(),
            requested_language,
            requested_model,
            language: None,
            model_name: None,
            transcribed_text: String::new(),
            segments_count: 0,
            status: JobStatus::Pending,
            error_detail: String::new(),
            last_error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_complete(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Language to send to the backend: the job's hint, else the owner's
    /// default, else `fallback`. `auto` or blank means no hint.
    pub fn language_hint(&self, owner_default: Option<&str>, fallback: &str) -> Option<String> {
        let chosen = self
            .requested_language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .or(owner_default.filter(|l| !l.trim().is_empty()))
            .unwrap_or(fallback)
            .trim();
        if chosen.is_empty() || chosen.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(chosen.to_string())
        }
    }

    /// Model recorded on the job: its own request, else the owner's default,
    /// else `fallback`.
    pub fn resolved_model(&self, owner_default: Option<&str>, fallback: &str) -> String {
        self.requested_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or(owner_default.filter(|m| !m.trim().is_empty()))
            .unwrap_or(fallback)
            .to_string()
    }

    /// Returns a description of the first violated record invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        let completed = self.status == JobStatus::Completed;
        if completed != self.completed_at.is_some() {
            return Some(format!(
                "completed_at is {} while status is {}",
                if self.completed_at.is_some() { "set" } else { "unset" },
                self.status
            ));
        }
        let failed = self.status == JobStatus::Failed;
        if failed == self.error_detail.is_empty() {
            return Some(format!(
                "error_detail is {} while status is {}",
                if self.error_detail.is_empty() { "empty" } else { "set" },
                self.status
            ));
        }
        if self.error_detail.chars().count() > crate::sanitize::MAX_ERROR_DETAIL_CHARS {
            return Some("error_detail exceeds its bound".to_string());
        }
        None
    }
}

/// Status projection returned to job owners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: String,
    pub is_processing: bool,
    pub is_complete: bool,
    pub retry_count: u32,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            error_detail: job.error_detail.clone(),
            is_processing: job.is_processing(),
            is_complete: job.is_complete(),
            retry_count: job.retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::new_pending(
            "owner-1",
            "talk.mp3",
            "audio/mpeg",
            1024,
            "audio/2026/01/abc.mp3",
            Some("de".to_string()),
            None,
            None,
        )
    }

    #[test]
    fn test_new_job_is_pending_and_consistent() {
        let job = sample();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.is_processing());
        assert!(!job.is_complete());
        assert!(job.invariant_violation().is_none());
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_language_hint_resolution() {
        let mut job = sample();
        assert_eq!(job.language_hint(Some("en"), "de").as_deref(), Some("de"));

        job.requested_language = None;
        assert_eq!(job.language_hint(Some("en"), "de").as_deref(), Some("en"));
        assert_eq!(job.language_hint(None, "fr").as_deref(), Some("fr"));
        assert_eq!(job.language_hint(Some(" "), "fr").as_deref(), Some("fr"));

        job.requested_language = Some("AUTO".to_string());
        assert_eq!(job.language_hint(Some("en"), "de"), None);
        job.requested_language = None;
        assert_eq!(job.language_hint(None, "auto"), None);
    }

    #[test]
    fn test_model_resolution() {
        let mut job = sample();
        assert_eq!(job.resolved_model(None, "whisper-large-v3"), "whisper-large-v3");
        assert_eq!(job.resolved_model(Some("tiny"), "whisper-large-v3"), "tiny");
        job.requested_model = Some("medium".to_string());
        assert_eq!(job.resolved_model(Some("tiny"), "whisper-large-v3"), "medium");
    }

    #[test]
    fn test_completed_without_timestamp_is_violation() {
        let mut job = sample();
        job.status = JobStatus::Completed;
        assert!(job.invariant_violation().unwrap().contains("completed_at"));
    }

    #[test]
    fn test_failed_without_detail_is_violation() {
        let mut job = sample();
        job.status = JobStatus::Failed;
        assert!(job.invariant_violation().unwrap().contains("error_detail"));
    }

    #[test]
    fn test_pending_with_detail_is_violation() {
        let mut job = sample();
        job.error_detail = "leftover".to_string();
        assert!(job.invariant_violation().is_some());
    }

    #[test]
    fn test_status_view_flags() {
        let mut job = sample();
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        let view = JobStatusView::from(&job);
        assert!(view.is_complete);
        assert!(!view.is_processing);
        assert_eq!(view.id, job.id);
    }
}
