//! Completion notices for job owners.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::job::Job;

const UNTITLED: &str = "Untitled";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Owner '{0}' has no notification address")]
    NoRecipient(String),

    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
}

/// Message sent to an owner when one of their jobs completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionNotice {
    pub job_id: String,
    pub owner_id: String,
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
}

impl CompletionNotice {
    pub fn for_job(recipient: Option<&str>, job: &Job) -> Self {
        let title = job
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(UNTITLED);
        let greeting = recipient.unwrap_or(job.owner_id.as_str());
        let language = job.language.as_deref().unwrap_or("auto-detected");
        let completed = job
            .completed_at
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());

        let body = format!(
            "Hello {greeting},\n\n\
             Your transcription is now complete!\n\n\
             Title: {title}\n\
             Language: {language}\n\
             Created: {created}\n\
             Completed: {completed}\n\n\
             Text length: {chars} characters\n",
            created = job.created_at.format(TIME_FORMAT),
            chars = job.transcribed_text.chars().count(),
        );

        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            recipient: recipient.map(str::to_string),
            subject: format!("Transcription Complete: {}", title),
            body,
        }
    }
}

/// Delivers completion notices. Delivery is best-effort: callers log
/// failures and never reopen the job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError>;
}

/// Emits the notice as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        info!(
            job_id = %notice.job_id,
            owner = %notice.owner_id,
            recipient = notice.recipient.as_deref().unwrap_or("-"),
            subject = %notice.subject,
            "Completion notice"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notice: &CompletionNotice) -> Result<(), NotifyError> {
        Ok(())
    }
}
