use thiserror::Error;

/// Outcome of a backend call that did not produce a transcript.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// Non-2xx response. `detail` is the `detail` field of a JSON error body.
    #[error("{}", http_message(*status, detail.as_deref()))]
    Http { status: u16, detail: Option<String> },

    /// The request never produced a response (connect, DNS, reset).
    #[error("Transcription backend connection error: {0}")]
    Transport(String),

    #[error("Transcription backend timeout (audio too long?)")]
    Timeout,

    /// 2xx response without the success marker or the text payload.
    #[error("Transcription backend returned a malformed response: {0}")]
    MalformedResponse(String),

    /// The request could not be built from the job's data.
    #[error("Invalid transcription request: {0}")]
    InvalidRequest(String),
}

fn http_message(status: u16, detail: Option<&str>) -> String {
    let base = match status {
        401 => "Invalid transcription backend API key".to_string(),
        413 => "Audio file too large for the transcription backend".to_string(),
        429 => "Transcription backend rate limit exceeded".to_string(),
        other => format!("Transcription backend HTTP error: {}", other),
    };
    match detail {
        Some(d) if !d.trim().is_empty() => format!("{}: {}", base, d.trim()),
        _ => base,
    }
}

impl From<reqwest::Error> for BackendFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendFailure::Timeout
        } else if err.is_decode() {
            BackendFailure::MalformedResponse(err.to_string())
        } else if err.is_builder() {
            BackendFailure::InvalidRequest(err.to_string())
        } else {
            // reqwest errors embed the URL; keep userinfo out of diagnostics
            let err = err.without_url();
            BackendFailure::Transport(err.to_string())
        }
    }
}
