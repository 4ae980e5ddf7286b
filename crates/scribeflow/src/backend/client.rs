use std::time::Duration;

use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::error::BackendFailure;
use super::types::{HealthStatus, TranscribeResponse, TranscriptResult, STATUS_OK};
use crate::config::BackendConfig;
use crate::db::owner_repo::OwnerSettings;
use crate::sanitize::redact_url;

const API_KEY_HEADER: &str = "X-API-KEY";

/// HTTP client for one transcription endpoint.
///
/// Cloning is cheap: the underlying connection pool is shared.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    health_timeout: Duration,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &redact_url(&self.base_url))
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl BackendClient {
    pub fn new(
        config: &BackendConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, BackendFailure> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendFailure::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&config.url),
            api_key,
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        })
    }

    /// Same client, pointed at another endpoint (an owner's override).
    pub fn with_endpoint(&self, url: &str, api_key: Option<SecretString>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: normalize_base_url(url),
            api_key,
            health_timeout: self.health_timeout,
        }
    }

    /// Client for one owner's jobs: their endpoint and key override the
    /// configured ones when set.
    pub fn for_owner(&self, settings: &OwnerSettings) -> Self {
        let url = settings
            .backend_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.base_url);
        let api_key = if settings.has_api_key() {
            settings.api_key.clone()
        } else {
            self.api_key.clone()
        };
        self.with_endpoint(url, api_key)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.expose_secret().is_empty() => {
                request.header(API_KEY_HEADER, key.expose_secret())
            }
            _ => request,
        }
    }

    /// Uploads one audio payload and waits for its transcript.
    ///
    /// `language_hint` is sent as the `language` form field when present.
    pub async fn execute(
        &self,
        audio: Vec<u8>,
        filename: &str,
        content_type: &str,
        language_hint: Option<&str>,
    ) -> Result<TranscriptResult, BackendFailure> {
        let url = format!("{}/transcribe", self.base_url);
        let size = audio.len();

        let part = Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| BackendFailure::InvalidRequest(e.to_string()))?;
        let mut form = Form::new().part("file", part);
        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        debug!(
            url = %redact_url(&url),
            filename,
            content_type,
            bytes = size,
            language = language_hint.unwrap_or("-"),
            "Calling transcription backend"
        );

        let response = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail_from_body(&body);
            warn!(status = status.as_u16(), "Transcription backend rejected request");
            return Err(BackendFailure::Http {
                status: status.as_u16(),
                detail,
            });
        }

        let body = response.bytes().await?;
        let parsed = parse_transcribe_body(&body)?;
        info!(
            chars = parsed.text.chars().count(),
            segments = parsed.segments_count,
            "Transcription backend returned transcript"
        );
        Ok(parsed)
    }

    /// Probes `GET /health` with the short health timeout.
    pub async fn health(&self) -> Result<HealthStatus, BackendFailure> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .authorize(self.http.get(&url))
            .timeout(self.health_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::Http {
                status: status.as_u16(),
                detail: error_detail_from_body(&body),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<HealthStatus>(&body)
            .map_err(|e| BackendFailure::MalformedResponse(e.to_string()))
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Extracts `detail` from a JSON error body. Non-string details are rendered
/// as JSON.
fn error_detail_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Validates a 2xx body. HTTP success alone is not enough: the body must
/// carry `status == "ok"` and a text payload.
fn parse_transcribe_body(body: &[u8]) -> Result<TranscriptResult, BackendFailure> {
    let response: TranscribeResponse = serde_json::from_slice(body)
        .map_err(|e| BackendFailure::MalformedResponse(format!("invalid JSON: {}", e)))?;

    match response.status.as_deref() {
        Some(STATUS_OK) => {}
        Some(other) => {
            return Err(BackendFailure::MalformedResponse(format!(
                "unexpected status '{}'",
                other
            )))
        }
        None => {
            return Err(BackendFailure::MalformedResponse(
                "missing status field".to_string(),
            ))
        }
    }

    let text = response.text.ok_or_else(|| {
        BackendFailure::MalformedResponse("missing text field".to_string())
    })?;

    let segments_count = response
        .segments
        .as_ref()
        .map(|s| u32::try_from(s.len()).unwrap_or(u32::MAX))
        .unwrap_or(0);

    Ok(TranscriptResult {
        text,
        language: response.language.filter(|l| !l.is_empty()),
        model: response.model.filter(|m| !m.is_empty()),
        segments_count,
    })
}
