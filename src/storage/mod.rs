//! Blob storage for media and its metadata.
//!
//! Bytes go to an [`ObjectStore`] under a path; the `uploads` table keeps the
//! path, kind tag and size so callers only ever deal in upload ids.

pub mod local;
pub mod mime;
pub mod s3;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{self, Database, Upload, UploadKind};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;

pub use self::local::LocalObjectStore;
pub use self::s3::S3ObjectStore;

/// Raw blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Bytes `start..=end_inclusive`, truncated at the end of the object.
    async fn get_range(&self, path: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Build the configured object store: MinIO when an endpoint is set, a local directory otherwise.
///
/// # Errors
///
/// Returns an error if the S3 client cannot be configured.
pub fn object_store_from_config(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    if config.minio_endpoint.is_some() {
        info!(bucket = %config.minio_bucket, "Using S3 object store");
        Ok(Arc::new(S3ObjectStore::new(config)?))
    } else {
        info!(dir = %config.upload_dir.display(), "Using local object store");
        Ok(Arc::new(LocalObjectStore::new(config.upload_dir.clone())))
    }
}

/// A slice of a stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRead {
    pub data: Vec<u8>,
    pub offset: i64,
    pub total_size: i64,
}

/// Upload metadata in the relational store plus bytes in the object store.
#[derive(Clone)]
pub struct UploadStore {
    db: Database,
    objects: Arc<dyn ObjectStore>,
}

impl UploadStore {
    #[must_use]
    pub fn new(db: Database, objects: Arc<dyn ObjectStore>) -> Self {
        Self { db, objects }
    }

    /// Store `data` at `path` and record it, returning the upload id.
    pub async fn upload(
        &self,
        path: &str,
        data: &[u8],
        kind: UploadKind,
        user_id: Option<i64>,
    ) -> CoreResult<i64> {
        let content_type = mime::mime_from_name(path);
        with_retry("object put", || self.objects.put(path, data, &content_type))
            .await
            .map_err(CoreError::store)?;

        let id = db::insert_upload(self.db.pool(), path, kind, user_id, data.len() as i64)
            .await
            .map_err(CoreError::store)?;

        debug!(upload_id = id, path = %path, kind = kind.as_str(), size = data.len(), "Stored upload");
        Ok(id)
    }

    /// Store downloaded platform media under `<prefix>/<uuid>.<ext>`.
    ///
    /// The extension comes from content sniffing; `fallback_ext` is used when
    /// sniffing only finds an opaque binary.
    pub async fn store_media(
        &self,
        prefix: &str,
        data: &[u8],
        kind: UploadKind,
        fallback_ext: Option<&str>,
    ) -> CoreResult<i64> {
        let detected = mime::detect_mime(data);
        let ext = match (detected, fallback_ext) {
            ("application/octet-stream", Some(ext)) => ext,
            _ => mime::extension_for(detected),
        };
        let path = format!("{prefix}/{}.{ext}", uuid::Uuid::new_v4());
        self.upload(&path, data, kind, None).await
    }

    pub async fn info(&self, id: i64) -> CoreResult<Upload> {
        db::get_upload(self.db.pool(), id)
            .await
            .map_err(CoreError::store)?
            .ok_or_else(|| CoreError::NotFound(format!("upload {id}")))
    }

    /// Read `bytes[offset..min(offset + length, size)]`. A zero length or an
    /// offset at or past the end yields no data.
    pub async fn read_range(&self, id: i64, offset: i64, length: i64) -> CoreResult<RangeRead> {
        if offset < 0 {
            return Err(CoreError::InvalidArgument("offset must not be negative".into()));
        }
        if length < 0 {
            return Err(CoreError::InvalidArgument("length must not be negative".into()));
        }

        let upload = self.info(id).await?;
        let total_size = upload.size;

        if length == 0 || offset >= total_size {
            return Ok(RangeRead {
                data: Vec::new(),
                offset,
                total_size,
            });
        }

        let remaining = total_size - offset;
        let length = length.min(remaining);
        let start = offset as u64;
        let end = (offset + length - 1) as u64;

        let data = with_retry("object ranged get", || {
            self.objects.get_range(&upload.path, start, end)
        })
        .await
        .map_err(CoreError::store)?;

        Ok(RangeRead {
            data,
            offset,
            total_size,
        })
    }

    /// Whole blob plus its metadata.
    pub async fn read_all(&self, id: i64) -> CoreResult<(Upload, Vec<u8>)> {
        let upload = self.info(id).await?;
        let data = with_retry("object get", || self.objects.get(&upload.path))
            .await
            .map_err(CoreError::store)?;
        Ok((upload, data))
    }

    /// Delete the blob and its record. Returns `false` if the id is unknown.
    pub async fn delete(&self, id: i64) -> CoreResult<bool> {
        let Some(upload) = db::get_upload(self.db.pool(), id)
            .await
            .map_err(CoreError::store)?
        else {
            return Ok(false);
        };

        with_retry("object delete", || self.objects.delete(&upload.path))
            .await
            .map_err(CoreError::store)?;

        db::delete_upload(self.db.pool(), id)
            .await
            .map_err(CoreError::store)
    }
}

impl std::fmt::Debug for UploadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStore").finish_non_exhaustive()
    }
}
