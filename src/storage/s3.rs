use anyhow::{Context, Result};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use tracing::debug;

use super::ObjectStore;
use crate::config::Config;

/// MinIO / S3 bucket holding upload blobs.
#[derive(Clone)]
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    /// Create a store from the `MINIO_*` settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or credentials are missing or invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = config
            .minio_endpoint
            .as_deref()
            .context("MINIO_ENDPOINT not set")?;
        let access_key = config
            .minio_access_key
            .as_deref()
            .context("MINIO_ACCESS_KEY not set")?;
        let secret_key = config
            .minio_secret_key
            .as_deref()
            .context("MINIO_SECRET_KEY not set")?;

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .context("Failed to create S3 credentials")?;

        let region = Region::Custom {
            region: "us-east-1".to_string(),
            endpoint: endpoint_url(endpoint, config.minio_use_ssl),
        };

        let bucket = Bucket::new(&config.minio_bucket, region, credentials)
            .context("Failed to create S3 bucket")?
            .with_path_style();

        Ok(Self { bucket })
    }
}

fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

fn ensure_success(status: u16, what: &str, path: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        anyhow::bail!("S3 {what} for {path} failed with status {status}")
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()> {
        debug!(key = %path, content_type = %content_type, size = data.len(), "Uploading object");

        let response = self
            .bucket
            .put_object_with_content_type(path, data, content_type)
            .await
            .context("Failed to upload object to S3")?;
        ensure_success(response.status_code(), "put", path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .bucket
            .get_object(path)
            .await
            .context("Failed to download object from S3")?;
        ensure_success(response.status_code(), "get", path)?;
        Ok(response.bytes().to_vec())
    }

    async fn get_range(&self, path: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>> {
        let response = self
            .bucket
            .get_object_range(path, start, Some(end_inclusive))
            .await
            .context("Failed to read object range from S3")?;
        ensure_success(response.status_code(), "ranged get", path)?;
        Ok(response.bytes().to_vec())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!(key = %path, "Deleting object");

        let response = self
            .bucket
            .delete_object(path)
            .await
            .context("Failed to delete object from S3")?;
        ensure_success(response.status_code(), "delete", path)
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket.name())
            .finish()
    }
}
