//! Local filesystem backend.
//!
//! Segments are already written under the streams root by the transcoder, so
//! "upload" only validates the file and returns the URL it is served from.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{verify_segment, StorageBackend, StorageError};

pub struct LocalBackend {
    streams_root: PathBuf,
    public_url: String,
}

impl LocalBackend {
    pub const NAME: &'static str = "LOCAL";

    pub fn new(streams_root: PathBuf, public_url: impl Into<String>) -> Self {
        Self {
            streams_root,
            public_url: public_url.into(),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn upload_segment(
        &self,
        segment_path: &Path,
        session_id: &str,
    ) -> Result<String, StorageError> {
        verify_segment(segment_path).await?;
        let segment_name = segment_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StorageError::UploadFailed(format!(
                    "segment path has no file name: {}",
                    segment_path.display()
                ))
            })?;
        Ok(self.segment_url(session_id, segment_name))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StorageError> {
        let dir = self.streams_root.join(session_id);
        remove_dir_tolerant(&dir);
        tracing::info!(session_id = %session_id, "Deleted local session directory");
        Ok(())
    }

    fn segment_url(&self, session_id: &str, segment_name: &str) -> String {
        format!(
            "{}/streams/{}/{}",
            self.public_url.trim_end_matches('/'),
            session_id,
            segment_name
        )
    }
}

/// Deletes a directory tree depth-first, tolerating individual failures so a
/// stuck file never aborts the rest of the cleanup.
pub(crate) fn remove_dir_tolerant(dir: &Path) {
    if !dir.exists() {
        return;
    }
    for entry in WalkDir::new(dir)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if let Err(e) = result {
            tracing::warn!("Failed to delete {}: {}", entry.path().display(), e);
        }
    }
}
