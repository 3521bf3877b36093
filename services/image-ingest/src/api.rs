use crate::catalog::CatalogEntry;
use crate::config::ApiConfig;
use crate::error::IngestError;
use crate::pipeline::{
    IngestReport, IngestRequest, IngestionPipeline, ResolvedHit, DEFAULT_CONTENT_TYPE,
};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Upper bound on search results per request
const MAX_SEARCH_LIMIT: u32 = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub search_limit: u32,
}

/// Ingestion response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    pub signature: String,
    pub image_url: Option<String>,
    pub storage_key: String,
    pub filename: String,
    pub filesize: u64,
    pub is_existing: bool,
    pub is_compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    pub metadata_update_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<ErrorDetail>,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            success: true,
            message: report.message(),
            storage_error: report.storage_error.as_ref().map(ErrorDetail::from),
            signature: report.signature,
            image_url: report.image_url,
            storage_key: report.storage_key,
            filename: report.filename,
            filesize: report.filesize,
            is_existing: report.is_existing,
            is_compressed: report.is_compressed,
            compressed_size: report.compressed_size,
            metadata_update_success: report.metadata_update_success,
        }
    }
}

/// Error carried on an otherwise successful response
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&IngestError> for ErrorDetail {
    fn from(err: &IngestError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Direct upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub key: String,
}

/// Search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<ResolvedHit>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

fn ingest_error(err: IngestError) -> ApiError {
    let status = match &err {
        IngestError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestError::Registration(_)
        | IngestError::Search(_)
        | IngestError::StorageTransfer(_) => StatusCode::BAD_GATEWAY,
        IngestError::StorageConfig(_)
        | IngestError::Reconcile(_)
        | IngestError::Compression(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.code(), err.to_string())
}

/// One multipart field
struct FormField {
    data: Bytes,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl FormField {
    fn text(&self) -> Option<String> {
        std::str::from_utf8(&self.data)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

async fn read_form(mut multipart: Multipart) -> Result<HashMap<String, FormField>, ApiError> {
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", format!("Malformed form: {}", e))
    })? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Failed to read field '{}': {}", name, e),
            )
        })?;

        fields.insert(
            name,
            FormField {
                data,
                file_name,
                content_type,
            },
        );
    }

    Ok(fields)
}

fn required_file<'a>(
    fields: &'a HashMap<String, FormField>,
    names: &[&str],
) -> Result<&'a FormField, ApiError> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .filter(|field| !field.data.is_empty())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Missing image field '{}'", names[0]),
            )
        })
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/images", post(ingest_image))
        .route("/api/v1/images/compress", post(compress_image))
        .route("/api/v1/upload", post(direct_upload))
        .route("/api/v1/search", post(search_images))
        .route("/api/v1/catalog/:signature", get(get_catalog_entry))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-ingest"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.catalog().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Register an image with the search index and archive the original
#[instrument(skip(state, multipart))]
async fn ingest_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let fields = read_form(multipart).await?;
    let image = required_file(&fields, &["image", "file"])?;

    let display_name = fields
        .get("filename")
        .and_then(FormField::text)
        .or_else(|| image.file_name.clone());

    let request = IngestRequest::new(
        image.data.clone(),
        image.content_type.as_deref(),
        display_name.as_deref(),
    );

    let report = state.pipeline.ingest(request).await.map_err(|e| {
        error!(error = %e, code = e.code(), "Ingestion failed");
        ingest_error(e)
    })?;

    if let Some(storage_error) = &report.storage_error {
        warn!(
            signature = %report.signature,
            error = %storage_error,
            "Ingestion succeeded without stored asset"
        );
    }

    Ok(Json(report.into()))
}

/// Compress an image and return the encoded bytes
#[instrument(skip(state, multipart))]
async fn compress_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let fields = read_form(multipart).await?;
    let image = required_file(&fields, &["image"])?;
    let declared_type = image
        .content_type
        .as_deref()
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let result = state
        .pipeline
        .compress(image.data.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "Image compression failed");
            ingest_error(e)
        })?;

    let content_type = result.content_type(declared_type).to_string();
    Ok(([(header::CONTENT_TYPE, content_type)], result.bytes).into_response())
}

/// Upload bytes straight to the object store
#[instrument(skip(state, multipart))]
async fn direct_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let fields = read_form(multipart).await?;
    let file = required_file(&fields, &["file", "image"])?;
    let signature = fields.get("signature").and_then(FormField::text);

    let receipt = state
        .pipeline
        .direct_upload(
            file.data.clone(),
            file.content_type.as_deref(),
            file.file_name.as_deref(),
            signature.as_deref(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, code = e.code(), "Direct upload failed");
            ingest_error(e)
        })?;

    Ok(Json(UploadResponse {
        success: true,
        url: receipt.url,
        key: receipt.key,
    }))
}

/// Search by image
#[instrument(skip(state, multipart))]
async fn search_images(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let fields = read_form(multipart).await?;
    let image = required_file(&fields, &["image", "file"])?;

    let limit = match fields.get("limit").and_then(FormField::text) {
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            api_error(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Invalid limit '{}'", raw),
            )
        })?,
        None => state.search_limit,
    }
    .clamp(1, MAX_SEARCH_LIMIT);

    let results = state
        .pipeline
        .search(image.data.clone(), image.content_type.as_deref(), limit)
        .await
        .map_err(|e| {
            error!(error = %e, "Search failed");
            ingest_error(e)
        })?;

    Ok(Json(SearchResponse {
        success: true,
        results,
    }))
}

/// Get the catalog entry for a signature
#[instrument(skip(state))]
async fn get_catalog_entry(
    State(state): State<AppState>,
    Path(signature): Path<String>,
) -> Result<Json<CatalogEntry>, ApiError> {
    let entry = state
        .pipeline
        .catalog()
        .get(&signature)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to get catalog entry");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "QUERY_ERROR",
                "Failed to get catalog entry",
            )
        })?;

    entry
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Catalog entry not found"))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image ingest API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::MemoryCatalog;
    use crate::catalog::{CatalogError, CatalogMetadata, CatalogStore, MockCatalogStore};
    use crate::config::{CompressionConfig, S3Config};
    use crate::search_client::{MockSearchIndex, Registration, SearchError, SearchHit};
    use crate::storage::testing::MemoryObjectStore;
    use crate::storage::StorageUploader;
    use reqwest::multipart::{Form, Part};

    fn s3_config() -> S3Config {
        S3Config {
            bucket: "catalog-images".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_domain: Some("img.example.com".to_string()),
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
            part_concurrency: 4,
            upload_timeout_secs: 30,
        }
    }

    async fn spawn_app(
        search: MockSearchIndex,
        store: Arc<MemoryObjectStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> String {
        let pipeline = IngestionPipeline::new(
            Arc::new(search),
            Arc::new(StorageUploader::new(store, &s3_config())),
            catalog,
            CompressionConfig::default(),
        );
        let state = AppState {
            pipeline: Arc::new(pipeline),
            search_limit: 20,
        };
        let router = create_router(state, &ApiConfig::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn registering() -> MockSearchIndex {
        let mut search = MockSearchIndex::new();
        search.expect_register().returning(|_, _| {
            Ok(Registration {
                signature: "abc123".to_string(),
                is_duplicate: false,
            })
        });
        search.expect_update_metadata().returning(|_, _| Ok(()));
        search
    }

    fn image_form(bytes: &'static [u8]) -> Form {
        Form::new().part(
            "image",
            Part::bytes(bytes)
                .file_name("shoe.png")
                .mime_str("image/png")
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_ingest_returns_response_shape() {
        let store = Arc::new(MemoryObjectStore::default());
        let base = spawn_app(registering(), store.clone(), Arc::new(MemoryCatalog::default())).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/images", base))
            .multipart(image_form(b"png-bytes"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["signature"], "abc123");
        assert_eq!(body["storageKey"], "images/abc123.png");
        assert_eq!(body["imageUrl"], "https://img.example.com/images/abc123.png");
        assert_eq!(body["filename"], "shoe.png");
        assert_eq!(body["filesize"], 9);
        assert_eq!(body["isExisting"], false);
        assert_eq!(body["isCompressed"], false);
        assert_eq!(body["metadataUpdateSuccess"], true);
        assert!(body.get("storageError").is_none());

        assert_eq!(
            store.object("images/abc123.png").unwrap(),
            Bytes::from_static(b"png-bytes")
        );
    }

    #[tokio::test]
    async fn test_ingest_storage_failure_is_flagged_success() {
        let store = Arc::new(MemoryObjectStore {
            fail_put: true,
            ..Default::default()
        });
        let base = spawn_app(registering(), store, Arc::new(MemoryCatalog::default())).await;

        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/api/v1/images", base))
            .multipart(image_form(b"png-bytes"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["signature"], "abc123");
        assert_eq!(body["storageError"]["code"], "STORAGE_TRANSFER_ERROR");
        assert!(body["imageUrl"].is_null());
    }

    #[tokio::test]
    async fn test_ingest_registration_failure_is_bad_gateway() {
        let mut search = MockSearchIndex::new();
        search.expect_register().returning(|_, _| {
            Err(SearchError::Rejected {
                code: 216201,
                message: "image format error".to_string(),
            })
        });

        let store = Arc::new(MemoryObjectStore::default());
        let base = spawn_app(search, store.clone(), Arc::new(MemoryCatalog::default())).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/images", base))
            .multipart(image_form(b"png-bytes"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "REGISTRATION_ERROR");
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_ingest_without_image_is_bad_request() {
        let base = spawn_app(
            MockSearchIndex::new(),
            Arc::new(MemoryObjectStore::default()),
            Arc::new(MemoryCatalog::default()),
        )
        .await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/images", base))
            .multipart(Form::new().text("filename", "shoe.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    fn noise_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x2545_F491;
        let image = image::RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            };
            image::Rgb([next(), next(), next()])
        });

        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn test_compress_endpoint_fits_budget() {
        let original = noise_png(1200, 1200);
        let max_bytes = CompressionConfig::default().max_bytes;
        assert!(original.len() > max_bytes);

        let base = spawn_app(
            MockSearchIndex::new(),
            Arc::new(MemoryObjectStore::default()),
            Arc::new(MemoryCatalog::default()),
        )
        .await;

        let form = Form::new().part(
            "image",
            Part::bytes(original)
                .file_name("big.png")
                .mime_str("image/png")
                .unwrap(),
        );
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/images/compress", base))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "image/png"
        );

        let body = response.bytes().await.unwrap();
        assert!(body.len() <= max_bytes);
        let decoded = image::load_from_memory(&body).unwrap();
        assert!(decoded.width().max(decoded.height()) <= 1024);
    }

    #[tokio::test]
    async fn test_compress_endpoint_requires_image() {
        let base = spawn_app(
            MockSearchIndex::new(),
            Arc::new(MemoryObjectStore::default()),
            Arc::new(MemoryCatalog::default()),
        )
        .await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/images/compress", base))
            .multipart(Form::new().text("filename", "big.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_direct_upload_with_signature() {
        let store = Arc::new(MemoryObjectStore::default());
        let base = spawn_app(
            MockSearchIndex::new(),
            store.clone(),
            Arc::new(MemoryCatalog::default()),
        )
        .await;

        let form = Form::new()
            .part("file", Part::bytes(&b"raw"[..]).file_name("a.png"))
            .text("signature", "111,222");

        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/api/v1/upload", base))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["key"], "images/111_222.png");
        assert_eq!(body["url"], "https://img.example.com/images/111_222.png");
        assert!(store.object("images/111_222.png").is_some());
    }

    #[tokio::test]
    async fn test_direct_upload_missing_bucket_is_server_error() {
        let store = Arc::new(MemoryObjectStore {
            missing_bucket: true,
            ..Default::default()
        });
        let base = spawn_app(MockSearchIndex::new(), store, Arc::new(MemoryCatalog::default())).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/upload", base))
            .multipart(Form::new().part("file", Part::bytes(&b"raw"[..]).file_name("a.png")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "STORAGE_CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_search_endpoint_clamps_limit() {
        let mut search = MockSearchIndex::new();
        search
            .expect_search()
            .withf(|_, _, limit| *limit == MAX_SEARCH_LIMIT)
            .returning(|_, _, _| {
                Ok(vec![SearchHit {
                    signature: "abc123".to_string(),
                    score: 0.9,
                    metadata: None,
                }])
            });

        let base = spawn_app(
            search,
            Arc::new(MemoryObjectStore::default()),
            Arc::new(MemoryCatalog::default()),
        )
        .await;

        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/api/v1/search", base))
            .multipart(image_form(b"query-image").text("limit", "5000"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["success"], true);
        assert_eq!(body["results"][0]["signature"], "abc123");
        assert_eq!(body["results"][0]["urlSource"], "derived_key");
        assert_eq!(
            body["results"][0]["imageUrl"],
            "https://img.example.com/images/abc123.png"
        );
    }

    #[tokio::test]
    async fn test_catalog_lookup() {
        let catalog = Arc::new(MemoryCatalog::default());
        catalog
            .upsert(
                "abc123",
                "https://img.example.com/images/abc123.png",
                &CatalogMetadata {
                    filename: "shoe.png".to_string(),
                    filesize: 9,
                    is_compressed: false,
                },
            )
            .await
            .unwrap();

        let base = spawn_app(
            MockSearchIndex::new(),
            Arc::new(MemoryObjectStore::default()),
            catalog,
        )
        .await;
        let client = reqwest::Client::new();

        let found: serde_json::Value = client
            .get(format!("{}/api/v1/catalog/abc123", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(found["storageUrl"], "https://img.example.com/images/abc123.png");

        let missing = client
            .get(format!("{}/api/v1/catalog/nope", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ready_reports_database_state() {
        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_ping()
            .returning(|| Err(CatalogError::Database("connection refused".to_string())));

        let base = spawn_app(
            MockSearchIndex::new(),
            Arc::new(MemoryObjectStore::default()),
            Arc::new(catalog),
        )
        .await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let ready = client.get(format!("{}/ready", base)).send().await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, Json(body)) = ingest_error(IngestError::Validation("empty".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert_eq!(body.code, "VALIDATION_ERROR");

        let (status, _) = ingest_error(IngestError::Registration(SearchError::Transport(
            "timeout".to_string(),
        )));
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, Json(body)) = ingest_error(IngestError::Search(SearchError::Transport(
            "down".to_string(),
        )));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.code, "SEARCH_ERROR");
    }
}
