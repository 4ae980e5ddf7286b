//! Audio payload storage.

pub mod filesystem;

pub use filesystem::FilesystemAudioStore;

use crate::error::StorageError;

/// Fallback when neither the extension table nor `mime_guess` knows the file.
pub const DEFAULT_AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Blob store holding uploaded audio until it has been transcribed.
pub trait AudioStore: Send + Sync {
    /// Stores `content` and returns the reference to persist on the job.
    fn put(&self, filename: &str, content: &[u8]) -> Result<String, StorageError>;

    fn read(&self, audio_ref: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes a blob. Missing blobs are not an error.
    fn delete(&self, audio_ref: &str) -> Result<(), StorageError>;
}

/// Content type for an audio filename, as sent to the backend.
pub fn content_type_for(filename: &str) -> String {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let known = match ext.as_deref() {
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("m4a") | Some("mp4") => Some("audio/mp4"),
        Some("ogg") => Some("audio/ogg"),
        Some("flac") => Some("audio/flac"),
        Some("webm") => Some("audio/webm"),
        _ => None,
    };
    if let Some(content_type) = known {
        return content_type.to_string();
    }

    mime_guess::from_path(filename)
        .iter()
        .find(|m| m.type_() == mime_guess::mime::AUDIO)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_AUDIO_CONTENT_TYPE.to_string())
}
