use serde::{Deserialize, Serialize};

/// Success marker the backend puts in `status`.
pub const STATUS_OK: &str = "ok";

/// Raw JSON body of `POST /transcribe`. Every field is optional so that a
/// body missing the expected fields is reported as malformed instead of as
/// a JSON error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscribeResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub segments: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// A successful transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    pub text: String,
    /// Language reported by the backend, if any.
    pub language: Option<String>,
    /// Model reported by the backend, if any.
    pub model: Option<String>,
    pub segments_count: u32,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
}
