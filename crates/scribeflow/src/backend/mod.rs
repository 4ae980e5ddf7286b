//! Client for the external transcription service and the classification of
//! its failures.

pub mod classify;
pub mod client;
pub mod error;
pub mod types;

pub use classify::{RetryPolicy, Verdict};
pub use client::BackendClient;
pub use error::BackendFailure;
pub use types::{HealthStatus, TranscribeResponse, TranscriptResult};
