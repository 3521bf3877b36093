use crate::catalog::{CatalogMetadata, CatalogStore};
use crate::compression::{compress_blocking, CompressionResult};
use crate::config::CompressionConfig;
use crate::error::IngestError;
use crate::key::{derive_key, fallback_key};
use crate::search_client::{ImageBrief, SearchHit, SearchIndex};
use crate::storage::{StorageUploader, UploadReceipt};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Content type assumed when the client sends none
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Stages an ingestion passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStage {
    Start,
    Compressed,
    Registered,
    KeyDerived,
    Uploaded,
    Reconciled,
    Done,
    RegistrationFailed,
    UploadFailed,
    ReconcileFailed,
}

/// One image to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub image: Bytes,
    pub content_type: String,
    pub filename: String,
}

impl IngestRequest {
    pub fn new(image: Bytes, content_type: Option<&str>, filename: Option<&str>) -> Self {
        Self {
            image,
            content_type: content_type
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            filename: filename
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or("upload.png")
                .to_string(),
        }
    }

    fn validate(&self) -> Result<(), IngestError> {
        if self.image.is_empty() {
            return Err(IngestError::Validation("image is empty".to_string()));
        }
        Ok(())
    }
}

/// Result of a successful ingestion; later-stage failures ride along as diagnostics
#[derive(Debug)]
pub struct IngestReport {
    pub signature: String,
    pub is_existing: bool,
    pub is_compressed: bool,
    pub storage_key: String,
    /// Set once the upload succeeded
    pub image_url: Option<String>,
    pub filename: String,
    pub filesize: u64,
    pub compressed_size: Option<u64>,
    pub metadata_update_success: bool,
    pub compression_error: Option<IngestError>,
    pub storage_error: Option<IngestError>,
    pub reconcile_error: Option<IngestError>,
    pub stages: Vec<IngestStage>,
}

impl IngestReport {
    /// Human-readable summary
    pub fn message(&self) -> String {
        let indexed = if self.is_existing {
            "Image already present in search index"
        } else {
            "Image added to search index"
        };
        let compressed = if self.is_compressed {
            " (search copy compressed)"
        } else {
            ""
        };

        if self.storage_error.is_some() {
            format!("{}, but storing the original failed{}", indexed, compressed)
        } else {
            format!("{} and stored{}", indexed, compressed)
        }
    }

    pub fn final_stage(&self) -> IngestStage {
        self.stages.last().copied().unwrap_or(IngestStage::Start)
    }
}

/// Where a search hit's image URL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    Catalog,
    Metadata,
    DerivedKey,
}

/// Search hit with a resolved image URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedHit {
    pub signature: String,
    pub score: f32,
    pub image_url: String,
    pub url_source: UrlSource,
}

/// Runs ingestion requests against the injected collaborators.
///
/// ```text
/// START -> (COMPRESSED) -> REGISTERED -> KEY_DERIVED -> UPLOADED -> RECONCILED -> DONE
///                |                               |             |
///                v                               v             v
///       REGISTRATION_FAILED               UPLOAD_FAILED  RECONCILE_FAILED
///           (request fails)           (success + storage error)  (logged only)
/// ```
pub struct IngestionPipeline {
    search: Arc<dyn SearchIndex>,
    uploader: Arc<StorageUploader>,
    catalog: Arc<dyn CatalogStore>,
    compression: CompressionConfig,
}

impl IngestionPipeline {
    pub fn new(
        search: Arc<dyn SearchIndex>,
        uploader: Arc<StorageUploader>,
        catalog: Arc<dyn CatalogStore>,
        compression: CompressionConfig,
    ) -> Self {
        Self {
            search,
            uploader,
            catalog,
            compression,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Ingest one image.
    ///
    /// Fails only on validation or registration errors.
    #[instrument(skip(self, request), fields(filename = %request.filename, size_bytes = request.image.len()))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestError> {
        request.validate()?;

        let started = Instant::now();
        metrics::counter!("ingest.requests").increment(1);

        let mut stages = vec![IngestStage::Start];
        let original = request.image.clone();
        let filesize = original.len() as u64;

        // Search copy
        let mut search_bytes = original.clone();
        let mut search_content_type = request.content_type.clone();
        let mut is_compressed = false;
        let mut compression_error = None;

        if original.len() > self.compression.threshold_bytes {
            let result = compress_blocking(original.clone(), self.compression.constraints()).await;

            if let Some(err) = result.error() {
                warn!(error = %err, "Registering original bytes");
                compression_error = Some(IngestError::Compression(err.clone()));
            } else if result.is_reencoded() {
                search_content_type = result.content_type(&request.content_type).to_string();
                search_bytes = result.bytes;
                is_compressed = true;
                stages.push(IngestStage::Compressed);
                metrics::counter!("ingest.compressed").increment(1);
                debug!(
                    original_bytes = filesize,
                    compressed_bytes = search_bytes.len(),
                    "Search copy compressed"
                );
            }
        }
        let compressed_size = is_compressed.then(|| search_bytes.len() as u64);

        // Registration
        let registration = match self
            .search
            .register(search_bytes, &search_content_type)
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                error!(error = %e, stage = ?IngestStage::RegistrationFailed, "Registration failed");
                metrics::counter!("ingest.registration.failed").increment(1);
                return Err(IngestError::Registration(e));
            }
        };
        stages.push(IngestStage::Registered);

        let signature = registration.signature;
        let storage_key = derive_key(&signature);
        stages.push(IngestStage::KeyDerived);

        debug!(signature = %signature, storage_key = %storage_key, duplicate = registration.is_duplicate, "Key derived");

        let mut report = IngestReport {
            signature,
            is_existing: registration.is_duplicate,
            is_compressed,
            storage_key,
            image_url: None,
            filename: request.filename.clone(),
            filesize,
            compressed_size,
            metadata_update_success: false,
            compression_error,
            storage_error: None,
            reconcile_error: None,
            stages,
        };

        // Upload the original
        let metadata = object_metadata(&request.filename);
        let receipt = match self
            .uploader
            .upload(original, &report.storage_key, &request.content_type, &metadata)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let err = IngestError::from(e);
                error!(
                    signature = %report.signature,
                    storage_key = %report.storage_key,
                    error = %err,
                    code = err.code(),
                    "Upload failed after registration"
                );
                metrics::counter!("ingest.storage.failed").increment(1);
                report.storage_error = Some(err);
                report.stages.push(IngestStage::UploadFailed);
                report.stages.push(IngestStage::Done);
                record_duration(started);
                return Ok(report);
            }
        };
        report.stages.push(IngestStage::Uploaded);
        report.image_url = Some(receipt.url.clone());

        // Attach metadata in the index
        let brief = ImageBrief {
            image_url: receipt.url.clone(),
            filename: report.filename.clone(),
            filesize,
            storage_key: report.storage_key.clone(),
            is_compressed,
            original_size: filesize,
            compressed_size,
            update_time: Utc::now(),
        };
        report.metadata_update_success = match self
            .search
            .update_metadata(&report.signature, &brief)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(signature = %report.signature, error = %e, "Metadata update failed");
                false
            }
        };

        // Reconcile catalog
        let catalog_metadata = CatalogMetadata {
            filename: report.filename.clone(),
            filesize,
            is_compressed,
        };
        match self
            .catalog
            .upsert(&report.signature, &receipt.url, &catalog_metadata)
            .await
        {
            Ok(_) => report.stages.push(IngestStage::Reconciled),
            Err(e) => {
                warn!(signature = %report.signature, error = %e, "Catalog reconcile failed");
                metrics::counter!("ingest.catalog.failed").increment(1);
                report.reconcile_error = Some(IngestError::Reconcile(e));
                report.stages.push(IngestStage::ReconcileFailed);
            }
        }

        report.stages.push(IngestStage::Done);
        record_duration(started);

        info!(
            signature = %report.signature,
            storage_key = %report.storage_key,
            is_existing = report.is_existing,
            is_compressed = report.is_compressed,
            "Image ingested"
        );

        Ok(report)
    }

    /// Compress an image with the configured constraints
    pub async fn compress(&self, image: Bytes) -> Result<CompressionResult, IngestError> {
        if image.is_empty() {
            return Err(IngestError::Validation("image is empty".to_string()));
        }

        let result = compress_blocking(image, self.compression.constraints()).await;
        match result.error() {
            Some(err) => Err(IngestError::Compression(err.clone())),
            None => Ok(result),
        }
    }

    /// Upload bytes directly, bypassing registration.
    ///
    /// With a signature the key is the derived one; without, a timestamped
    /// fallback key built from the filename.
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn direct_upload(
        &self,
        data: Bytes,
        content_type: Option<&str>,
        filename: Option<&str>,
        signature: Option<&str>,
    ) -> Result<UploadReceipt, IngestError> {
        if data.is_empty() {
            return Err(IngestError::Validation("file is empty".to_string()));
        }

        let key = match signature.map(str::trim).filter(|s| !s.is_empty()) {
            Some(signature) => derive_key(signature),
            None => fallback_key(filename),
        };
        let content_type = content_type
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let metadata = object_metadata(filename.unwrap_or("image.png"));

        self.uploader
            .upload(data, &key, content_type, &metadata)
            .await
            .map_err(IngestError::from)
    }

    /// Search the index and resolve an image URL for every hit.
    ///
    /// URL precedence: catalog entry, then `imageUrl` in the hit's metadata,
    /// then the derived key. Hits found only through their metadata are
    /// written back to the catalog.
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    pub async fn search(
        &self,
        image: Bytes,
        content_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ResolvedHit>, IngestError> {
        if image.is_empty() {
            return Err(IngestError::Validation("image is empty".to_string()));
        }

        let content_type = content_type
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let (query, query_type) = if image.len() > self.compression.threshold_bytes {
            let result = compress_blocking(image, self.compression.constraints()).await;
            let query_type = result.content_type(content_type).to_string();
            (result.bytes, query_type)
        } else {
            (image, content_type.to_string())
        };

        let hits = self
            .search
            .search(query, &query_type, limit)
            .await
            .map_err(IngestError::Search)?;

        let mut resolved = Vec::with_capacity(hits.len());
        for hit in hits {
            let cached = match self.catalog.get(&hit.signature).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(signature = %hit.signature, error = %e, "Catalog lookup failed");
                    None
                }
            };

            let (image_url, url_source) = if let Some(entry) = cached {
                (entry.storage_url, UrlSource::Catalog)
            } else if let Some(url) = hit.metadata_image_url() {
                self.reconcile_from_metadata(&hit, &url).await;
                (url, UrlSource::Metadata)
            } else {
                (
                    self.uploader.get_url(&derive_key(&hit.signature)),
                    UrlSource::DerivedKey,
                )
            };

            resolved.push(ResolvedHit {
                signature: hit.signature,
                score: hit.score,
                image_url,
                url_source,
            });
        }

        Ok(resolved)
    }

    async fn reconcile_from_metadata(&self, hit: &SearchHit, url: &str) {
        let field = |name: &str| {
            hit.metadata.as_ref().and_then(|m| match m {
                serde_json::Value::String(raw) => serde_json::from_str::<serde_json::Value>(raw)
                    .ok()
                    .and_then(|v| v.get(name).cloned()),
                other => other.get(name).cloned(),
            })
        };

        let metadata = CatalogMetadata {
            filename: field("filename")
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            filesize: field("filesize").and_then(|v| v.as_u64()).unwrap_or(0),
            is_compressed: field("isCompressed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        match self.catalog.upsert(&hit.signature, url, &metadata).await {
            Ok(_) => debug!(signature = %hit.signature, "Catalog entry reconciled from index metadata"),
            Err(e) => warn!(signature = %hit.signature, error = %e, "Opportunistic reconcile failed"),
        }
    }
}

/// User metadata stored with the object. Header values must be ASCII.
fn object_metadata(filename: &str) -> HashMap<String, String> {
    let ascii_filename: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();

    let mut metadata = HashMap::new();
    metadata.insert("original-filename".to_string(), ascii_filename);
    metadata.insert("upload-time".to_string(), Utc::now().to_rfc3339());
    metadata
}

fn record_duration(started: Instant) {
    metrics::histogram!("ingest.duration_seconds").record(started.elapsed().as_secs_f64());
}
