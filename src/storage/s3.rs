//! S3 backend.
//!
//! Uploads go through [`upload_with_retry`]; deletion lists the session
//! prefix and bulk-deletes, with pagination handled by the object store.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;

use super::{upload_with_retry, verify_segment, StorageBackend, StorageError};
use crate::config::S3Config;

pub struct S3Backend {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3Backend {
    pub const NAME: &'static str = "S3";

    /// Credentials come from the environment (standard AWS variables); the
    /// bucket, region and optional custom endpoint come from config.
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(config.bucket.clone())
            .with_region(config.region.clone());

        if let Some(ref endpoint) = config.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn upload_segment(
        &self,
        segment_path: &Path,
        session_id: &str,
    ) -> Result<String, StorageError> {
        let segment_name = segment_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                StorageError::UploadFailed(format!(
                    "segment path has no file name: {}",
                    segment_path.display()
                ))
            })?;
        let key = format!("{session_id}/{segment_name}");
        let label = format!("s3://{}/{}", self.bucket, key);

        upload_with_retry(&label, || {
            let key = key.clone();
            async move {
                // Re-checked every attempt: the transcoder may still be
                // flushing the file on the first try.
                let size = verify_segment(segment_path).await?;
                let data = tokio::fs::read(segment_path).await?;
                let location = ObjectPath::from(key.clone());
                self.store
                    .put(&location, PutPayload::from(data))
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                tracing::info!(key = %key, size_bytes = size, "Uploaded segment to S3");
                Ok(self.segment_url(session_id, segment_name))
            }
        })
        .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StorageError> {
        let prefix = ObjectPath::from(session_id);
        let locations = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .boxed();

        let deleted = self
            .store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;

        tracing::info!(
            session_id = %session_id,
            count = deleted.len(),
            "Deleted session objects from S3"
        );
        Ok(())
    }

    fn segment_url(&self, session_id: &str, segment_name: &str) -> String {
        format_segment_url(
            &self.bucket,
            &self.region,
            self.endpoint.as_deref(),
            session_id,
            segment_name,
        )
    }
}

/// Virtual-hosted-style URL on AWS proper, path-style under a custom
/// endpoint (MinIO and friends).
fn format_segment_url(
    bucket: &str,
    region: &str,
    endpoint: Option<&str>,
    session_id: &str,
    segment_name: &str,
) -> String {
    match endpoint {
        Some(endpoint) => format!(
            "{}/{}/{}/{}",
            endpoint.trim_end_matches('/'),
            bucket,
            session_id,
            segment_name
        ),
        None => format!(
            "https://{bucket}.s3.{region}.amazonaws.com/{session_id}/{segment_name}"
        ),
    }
}
