use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::config::schema::{BackendConfig, Config};
use crate::error::ConfigError;
use crate::secrets;

const SUPPORTED_VERSION: &str = "1.0";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    validate_backend(&config.backend)?;

    if config.storage.audio_directory.trim().is_empty() {
        return Err(invalid("storage.audioDirectory must not be empty"));
    }

    if config.submission.max_upload_bytes == 0 {
        return Err(invalid("submission.maxUploadBytes must be > 0"));
    }
    if config.submission.allowed_content_types.is_empty() {
        return Err(invalid(
            "submission.allowedContentTypes must list at least one type",
        ));
    }
    for content_type in &config.submission.allowed_content_types {
        if !content_type.starts_with("audio/") {
            return Err(invalid(format!(
                "submission.allowedContentTypes: '{}' is not an audio type",
                content_type
            )));
        }
    }

    if config.workers.count == 0 {
        return Err(invalid("workers.count must be > 0"));
    }
    if config.workers.poll_interval_ms == 0 {
        return Err(invalid("workers.pollIntervalMs must be > 0"));
    }

    Ok(())
}

fn validate_backend(backend: &BackendConfig) -> Result<(), ConfigError> {
    let url = backend.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(invalid(format!(
            "backend.url must be an http(s) URL, got '{}'",
            crate::sanitize::redact_url(url)
        )));
    }
    if backend.timeout_secs == 0
        || backend.connect_timeout_secs == 0
        || backend.health_timeout_secs == 0
    {
        return Err(invalid("backend timeouts must be > 0"));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Resolves the configured backend API key from its direct, file or env source.
pub fn resolve_api_key(backend: &BackendConfig) -> Result<Option<SecretString>, ConfigError> {
    secrets::resolve_secret_optional(
        backend.api_key.as_deref(),
        backend.api_key_file.as_deref(),
        backend.api_key_env_var.as_deref(),
    )
    .map_err(|source| ConfigError::Secret {
        field: "backend.apiKey",
        source,
    })
}

/// Returns the database path from config, falling back to the per-user default.
pub fn resolve_database_path(config: &Config) -> Option<PathBuf> {
    match &config.database.path {
        Some(path) => Some(PathBuf::from(secrets::expand_home(path))),
        None => crate::db::default_database_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use secrecy::ExposeSecret;

    const MINIMAL: &str = r#"{
        "version": "1.0",
        "storage": { "audioDirectory": "/tmp/scribeflow-audio" },
        "backend": { "url": "https://asr.example.com" }
    }"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.backend.timeout_secs, 1800);
        assert_eq!(config.backend.health_timeout_secs, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.server_error_delay_secs, 120);
        assert_eq!(config.retry.transport_error_delay_secs, 60);
        assert_eq!(config.submission.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.submission.allowed_content_types.len(), 6);
        assert_eq!(config.submission.default_model, "whisper-large-v3");
        assert!(config.workers.count > 0);
        assert_eq!(config.logging.format, LogFormat::Plain);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let content = MINIMAL.replace("\"1.0\"", "\"2.0\"");
        let err = load_config_from_str(&content).unwrap_err();
        assert!(err.to_string().contains("Unsupported config version"));
    }

    #[test]
    fn test_non_http_backend_rejected() {
        let content = MINIMAL.replace("https://asr.example.com", "ftp://asr.example.com");
        assert!(matches!(
            load_config_from_str(&content),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_non_audio_content_type_rejected() {
        let content = r#"{
            "version": "1.0",
            "storage": { "audioDirectory": "/tmp/a" },
            "backend": { "url": "http://localhost:8000" },
            "submission": { "allowedContentTypes": ["application/pdf"] }
        }"#;
        assert!(load_config_from_str(content).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let content = r#"{
            "version": "1.0",
            "storage": { "audioDirectory": "/tmp/a" },
            "backend": { "url": "http://localhost:8000" },
            "workers": { "count": 0 }
        }"#;
        assert!(load_config_from_str(content).is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let content = r#"{
            "version": "1.0",
            "storage": { "audioDirectory": "/tmp/a" },
            "backend": { "url": "http://localhost:8000", "connectTimeoutSecs": 0 }
        }"#;
        let err = load_config_from_str(content).unwrap_err();
        assert!(err.to_string().contains("backend timeouts must be > 0"));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/scribeflow.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_resolve_api_key_direct() {
        let mut backend = BackendConfig::new("https://asr.example.com");
        backend.api_key = Some("k-123".to_string());
        let key = resolve_api_key(&backend).unwrap().unwrap();
        assert_eq!(key.expose_secret(), "k-123");
    }

    #[test]
    fn test_resolve_api_key_absent() {
        let backend = BackendConfig::new("https://asr.example.com");
        assert!(resolve_api_key(&backend).unwrap().is_none());
    }

    #[test]
    fn test_explicit_database_path() {
        let content = r#"{
            "version": "1.0",
            "database": { "path": "/var/lib/scribeflow/jobs.db" },
            "storage": { "audioDirectory": "/tmp/a" },
            "backend": { "url": "http://localhost:8000" }
        }"#;
        let config = load_config_from_str(content).unwrap();
        assert_eq!(
            resolve_database_path(&config),
            Some(PathBuf::from("/var/lib/scribeflow/jobs.db"))
        );
    }
}
