//! Storage backends and the registry that resolves them by name.

pub mod local;
pub mod s3;

pub use local::LocalBackend;
pub use s3::S3Backend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Upload retry ceiling.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Base delay before each upload attempt; grows linearly with the attempt
/// number so a freshly flushed segment has time to settle.
pub const UPLOAD_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Segment file missing or empty: {0}")]
    InvalidSegment(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A storage destination able to host segment files and serve URLs for them.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable uppercase identifier, used as the manifest/storage-type key.
    fn name(&self) -> &'static str;

    /// Uploads one segment and returns its public URL.
    async fn upload_segment(
        &self,
        segment_path: &Path,
        session_id: &str,
    ) -> Result<String, StorageError>;

    /// Removes every stored object belonging to the session.
    async fn delete_session(&self, session_id: &str) -> Result<(), StorageError>;

    /// Public URL for a segment, derived from backend configuration alone.
    fn segment_url(&self, session_id: &str, segment_name: &str) -> String;
}

/// Checks that a segment exists and is non-empty before any transfer is
/// attempted. Returns the file size.
pub(crate) async fn verify_segment(path: &Path) -> Result<u64, StorageError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(StorageError::InvalidSegment(format!(
            "empty file: {}",
            path.display()
        ))),
        Err(_) => Err(StorageError::InvalidSegment(format!(
            "missing file: {}",
            path.display()
        ))),
    }
}

/// Runs `attempt` up to [`MAX_UPLOAD_ATTEMPTS`] times with linearly
/// increasing backoff, surfacing the last error once the ceiling is hit.
pub async fn upload_with_retry<F, Fut>(label: &str, mut attempt: F) -> Result<String, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, StorageError>>,
{
    let mut last_error = None;
    for try_number in 1..=MAX_UPLOAD_ATTEMPTS {
        tokio::time::sleep(UPLOAD_BACKOFF * try_number).await;
        match attempt().await {
            Ok(url) => return Ok(url),
            Err(e) => {
                tracing::warn!(
                    attempt = try_number,
                    max = MAX_UPLOAD_ATTEMPTS,
                    "Upload attempt failed for {}: {}",
                    label,
                    e
                );
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| StorageError::UploadFailed(format!("{label}: retries exhausted"))))
}

/// Resolves requested backend names to live instances.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Self {
        let backends = backends
            .into_iter()
            .map(|backend| (backend.name().to_string(), backend))
            .collect();
        Self { backends }
    }

    /// Builds the registry from the storage configuration flags.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();
        if config.storage.local.enabled {
            backends.push(Arc::new(LocalBackend::new(
                config.stream.streams_root.clone(),
                config.server.public_url.clone(),
            )));
        }
        if config.storage.s3.enabled {
            backends.push(Arc::new(S3Backend::new(&config.storage.s3)?));
        }
        Ok(Self::new(backends))
    }

    /// Live backends for the requested names; unknown names are dropped.
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn StorageBackend>> {
        names
            .iter()
            .filter_map(|name| self.backends.get(&name.to_uppercase()).cloned())
            .collect()
    }

    /// The subset of `names` that maps to a configured backend, preserving
    /// request order. This is what gets recorded on a session.
    pub fn filter_available(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.backends.contains_key(&name.to_uppercase()))
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.backends.get(&name.to_uppercase()).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
