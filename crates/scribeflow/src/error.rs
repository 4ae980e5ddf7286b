use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendFailure),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve secret for '{field}': {source}")]
    Secret {
        field: &'static str,
        #[source]
        source: crate::secrets::SecretError,
    },
}

/// Rejections raised at submission time, before any job row exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Audio file is empty")]
    EmptyPayload,

    #[error("Audio file is too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Unsupported audio format: {0}")]
    UnsupportedContentType(String),

    #[error("Invalid language code '{0}'")]
    InvalidLanguage(String),

    #[error("Model name is too long ({len} chars, max {max})")]
    ModelNameTooLong { len: usize, max: usize },

    #[error("Title is too long ({len} chars, max {max})")]
    TitleTooLong { len: usize, max: usize },

    #[error("Owner id must not be empty")]
    MissingOwner,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid audio reference: {0}")]
    InvalidReference(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Illegal state transition: {0}")]
    State(#[from] crate::job::StateError),

    #[error("Job '{0}' vanished during processing")]
    JobVanished(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ScribeflowError>;
