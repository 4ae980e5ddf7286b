//! Builders and fakes for creating test scenarios programmatically.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use scribeflow::config::{BackendConfig, Config};
use scribeflow::notify::{CompletionNotice, Notifier, NotifyError};
use scribeflow::service::SubmitRequest;

/// Builder for creating `Config` instances pointed at a test backend.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(audio_directory: &str, backend_url: &str) -> Self {
        let mut config = Config::new(audio_directory, BackendConfig::new(backend_url));
        config.workers.count = 2;
        config.workers.poll_interval_ms = 20;
        Self { config }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.submission.max_upload_bytes = bytes;
        self
    }

    pub fn backend_timeout_secs(mut self, secs: u64) -> Self {
        self.config.backend.timeout_secs = secs;
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.config.backend.api_key = Some(key.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Builder for `SubmitRequest`s with a small valid MP3-ish payload.
pub struct SubmitBuilder {
    request: SubmitRequest,
}

impl SubmitBuilder {
    pub fn new(owner_id: &str) -> Self {
        Self {
            request: SubmitRequest {
                owner_id: owner_id.to_string(),
                filename: "meeting.mp3".to_string(),
                content_type: Some("audio/mpeg".to_string()),
                bytes: b"ID3 test audio payload".to_vec(),
                ..SubmitRequest::default()
            },
        }
    }

    pub fn language(mut self, language: &str) -> Self {
        self.request.language = Some(language.to_string());
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.request.title = Some(title.to_string());
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.request.bytes = bytes;
        self
    }

    pub fn build(self) -> SubmitRequest {
        self.request
    }
}

/// Successful backend body.
pub fn ok_body(text: &str, language: &str) -> Value {
    json!({
        "status": "ok",
        "text": text,
        "segments": [{"start": 0.0, "end": 1.0, "text": text}],
        "language": language,
        "model": "whisper-large-v3"
    })
}

/// Notifier that records every notice, optionally failing delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn notices(&self) -> Vec<CompletionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(NotifyError::Delivery("smtp unavailable".to_string()));
        }
        Ok(())
    }
}
