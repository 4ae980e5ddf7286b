use std::path::{Component, Path, PathBuf};

use chrono::{Datelike, Utc};

use super::AudioStore;
use crate::error::StorageError;

/// Audio blob store rooted at a local directory.
///
/// Blobs land at `audio/<YYYY>/<MM>/<uuid>.<ext>` and the relative path is
/// the reference stored on the job.
pub struct FilesystemAudioStore {
    root: PathBuf,
}

impl FilesystemAudioStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Maps a reference back onto the root, rejecting anything that could
    /// escape it.
    fn resolve(&self, audio_ref: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(audio_ref);
        if audio_ref.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidReference(audio_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Lowercased extension, restricted to characters that are safe in a path.
fn safe_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
}

impl AudioStore for FilesystemAudioStore {
    fn put(&self, filename: &str, content: &[u8]) -> Result<String, StorageError> {
        use std::io::Write;

        let now = Utc::now();
        let relative_dir = format!("audio/{:04}/{:02}", now.year(), now.month());
        let dir_path = self.root.join(&relative_dir);
        self.ensure_directory(&dir_path)?;

        let blob_name = match safe_extension(filename) {
            Some(ext) => format!("{}.{}", uuid::Uuid::new_v4(), ext),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let path = dir_path.join(&blob_name);

        // create_new: a fresh UUID never collides, but never overwrite either
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        Ok(format!("{}/{}", relative_dir, blob_name))
    }

    fn read(&self, audio_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(audio_ref)?;
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    fn delete(&self, audio_ref: &str) -> Result<(), StorageError> {
        let path = self.resolve(audio_ref)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }
}
