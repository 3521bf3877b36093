use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The target bucket does not exist
    #[error("Bucket does not exist: {bucket}")]
    BucketNotFound { bucket: String },

    /// Credentials are not allowed to use the bucket
    #[error("Access denied to bucket {bucket}: {message}")]
    AccessDenied { bucket: String, message: String },

    /// Invalid configuration
    #[error("Invalid storage configuration: {message}")]
    InvalidConfig { message: String },

    /// One part of a multipart upload failed
    #[error("Upload of part {part_number} failed: {message}")]
    PartFailed { part_number: i32, message: String },

    /// Any other failed request
    #[error("Transfer failed: {message}")]
    Transfer { message: String },

    /// The upload did not finish in time
    #[error("Upload timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl StorageError {
    /// Errors that retrying cannot fix
    pub fn is_config_error(&self) -> bool {
        match self {
            StorageError::BucketNotFound { .. } => true,
            StorageError::AccessDenied { .. } => true,
            StorageError::InvalidConfig { .. } => true,
            StorageError::PartFailed { .. } => false,
            StorageError::Transfer { .. } => false,
            StorageError::Timeout { .. } => false,
        }
    }
}

/// A part accepted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub e_tag: String,
}

/// Low-level object store operations
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Succeeds when the bucket exists and is reachable
    async fn head_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Upload a whole object in one request
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError>;

    /// Open a multipart session and return its upload ID
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StorageError>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError>;

    /// Close a session from its ordered part list
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartInfo>,
    ) -> Result<(), StorageError>;

    /// Discard a session and every part uploaded to it
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;
}

/// S3 implementation of [`ObjectStore`].
///
/// The SDK client is built on first use. Concurrent first callers wait on the
/// same initialisation, so one process holds exactly one client.
pub struct S3ObjectStore {
    config: S3Config,
    client: OnceCell<S3Client>,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Self {
        Self {
            config: config.clone(),
            client: OnceCell::new(),
        }
    }

    /// Shared SDK client, built on first call
    pub async fn client(&self) -> &S3Client {
        self.client
            .get_or_init(|| build_client(&self.config))
            .await
    }

    /// Whether the SDK client has been built yet
    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }
}

async fn build_client(config: &S3Config) -> S3Client {
    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;

    let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

    // Custom endpoint for S3-compatible stores
    if let Some(ref endpoint_url) = config.endpoint_url {
        s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
    }

    if config.force_path_style {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }

    let client = S3Client::from_conf(s3_config_builder.build());

    info!(
        bucket = %config.bucket,
        region = %config.region,
        endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
        "S3 client initialized"
    );

    client
}

fn transfer_error<E>(context: &str, err: E) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Transfer {
        message: format!("{}: {}", context, DisplayErrorContext(&err)),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        match self.client().await.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    return Err(StorageError::BucketNotFound {
                        bucket: bucket.to_string(),
                    });
                }

                match e.raw_response().map(|r| r.status().as_u16()) {
                    Some(404) => Err(StorageError::BucketNotFound {
                        bucket: bucket.to_string(),
                    }),
                    Some(403) => Err(StorageError::AccessDenied {
                        bucket: bucket.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }),
                    _ => Err(transfer_error("Failed to check bucket", e)),
                }
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        self.client()
            .await
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| transfer_error("Failed to upload object", e))?;

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StorageError> {
        let response = self
            .client()
            .await
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| transfer_error("Failed to create multipart upload", e))?;

        response
            .upload_id()
            .map(String::from)
            .ok_or_else(|| StorageError::Transfer {
                message: "No upload ID in response".to_string(),
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        let response = self
            .client()
            .await
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| transfer_error("Failed to upload part", e))?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartInfo>,
    ) -> Result<(), StorageError> {
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client()
            .await
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| transfer_error("Failed to complete multipart upload", e))?;

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client()
            .await
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| transfer_error("Failed to abort multipart upload", e))?;

        Ok(())
    }
}

/// A finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub url: String,
    pub size_bytes: usize,
    /// 1 for a single-shot upload
    pub parts: usize,
}

/// Uploads assets to one bucket
pub struct StorageUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    public_domain: String,
    multipart_threshold: usize,
    part_size: usize,
    part_concurrency: usize,
    upload_timeout: Duration,
}

impl StorageUploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: &S3Config) -> Self {
        Self {
            store,
            bucket: config.bucket.clone(),
            public_domain: config.resolved_public_domain(),
            multipart_threshold: config.multipart_threshold_bytes,
            part_size: config.part_size_bytes.max(1),
            part_concurrency: config.part_concurrency.max(1),
            upload_timeout: config.upload_timeout(),
        }
    }

    /// Public URL of an object key
    pub fn get_url(&self, key: &str) -> String {
        object_url(&self.public_domain, key)
    }

    /// Upload `data` under `key`.
    ///
    /// A missing bucket fails before any bytes are sent. Payloads above the
    /// multipart threshold go up in ordered parts; any failed part aborts the
    /// session.
    #[instrument(skip(self, data, metadata), fields(key = %key, size_bytes = data.len()))]
    pub async fn upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<UploadReceipt, StorageError> {
        self.store.head_bucket(&self.bucket).await.map_err(|e| {
            error!(bucket = %self.bucket, error = %e, "Bucket preflight failed");
            e
        })?;

        let size_bytes = data.len();

        debug!(
            key = %key,
            size_bytes,
            multipart = size_bytes > self.multipart_threshold,
            "Uploading object"
        );

        let parts = if size_bytes > self.multipart_threshold {
            self.multipart_upload(data, key, content_type, metadata)
                .await?
        } else {
            self.simple_upload(data, key, content_type, metadata)
                .await?;
            1
        };

        metrics::counter!("storage.bytes.uploaded").increment(size_bytes as u64);

        let url = self.get_url(key);
        info!(key = %key, size_bytes, parts, url = %url, "Object uploaded");

        Ok(UploadReceipt {
            key: key.to_string(),
            url,
            size_bytes,
            parts,
        })
    }

    /// Single-shot upload for small payloads
    async fn simple_upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let put = self
            .store
            .put_object(&self.bucket, key, data, content_type, metadata);

        tokio::time::timeout(self.upload_timeout, put)
            .await
            .map_err(|_| StorageError::Timeout {
                seconds: self.upload_timeout.as_secs(),
            })?
    }

    /// Multipart upload for large payloads
    async fn multipart_upload(
        &self,
        data: Bytes,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<usize, StorageError> {
        let upload_id = self
            .store
            .create_multipart_upload(&self.bucket, key, content_type, metadata)
            .await?;

        let transfer = self.transfer_parts(&data, key, &upload_id);
        let result = match tokio::time::timeout(self.upload_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                seconds: self.upload_timeout.as_secs(),
            }),
        };

        match result {
            Ok(parts) => Ok(parts),
            Err(e) => {
                warn!(key = %key, upload_id = %upload_id, error = %e, "Aborting multipart upload");
                metrics::counter!("storage.multipart.aborted").increment(1);
                if let Err(abort_err) = self
                    .store
                    .abort_multipart_upload(&self.bucket, key, &upload_id)
                    .await
                {
                    error!(
                        key = %key,
                        upload_id = %upload_id,
                        error = %abort_err,
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    /// Upload every part, then complete the session
    async fn transfer_parts(
        &self,
        data: &Bytes,
        key: &str,
        upload_id: &str,
    ) -> Result<usize, StorageError> {
        let bucket = self.bucket.as_str();

        let completed: Vec<CompletedPartInfo> = stream::iter(split_parts(data, self.part_size))
            .map(|(part_number, chunk)| async move {
                let e_tag = self
                    .store
                    .upload_part(bucket, key, upload_id, part_number, chunk)
                    .await
                    .map_err(|e| StorageError::PartFailed {
                        part_number,
                        message: e.to_string(),
                    })?;

                Ok::<_, StorageError>(CompletedPartInfo {
                    part_number,
                    e_tag,
                })
            })
            .buffered(self.part_concurrency)
            .try_collect()
            .await?;

        let count = completed.len();
        self.store
            .complete_multipart_upload(bucket, key, upload_id, completed)
            .await?;

        Ok(count)
    }
}

/// Split `data` into numbered parts, starting at 1
fn split_parts(data: &Bytes, part_size: usize) -> Vec<(i32, Bytes)> {
    let part_size = part_size.max(1);
    (0..data.len())
        .step_by(part_size)
        .enumerate()
        .map(|(index, start)| {
            let end = (start + part_size).min(data.len());
            ((index + 1) as i32, data.slice(start..end))
        })
        .collect()
}

/// Build `https://{domain}/{key}`, keeping an `http://` scheme if configured.
///
/// Any scheme already present on the domain is stripped first, so the result
/// never carries two.
pub fn object_url(domain: &str, key: &str) -> String {
    let mut host = domain.trim();
    let mut scheme = "https";

    loop {
        if let Some(rest) = host.strip_prefix("https://") {
            host = rest;
        } else if let Some(rest) = host.strip_prefix("http://") {
            scheme = "http";
            host = rest;
        } else {
            break;
        }
    }

    format!(
        "{}://{}/{}",
        scheme,
        host.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
