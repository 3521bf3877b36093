use crate::compression::{CompressionConstraints, FormatPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the image ingestion service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Object store configuration
    pub s3: S3Config,
    /// Search index configuration
    pub search: SearchConfig,
    /// Catalog database configuration
    pub database: DatabaseConfig,
    /// Compression of the search copy
    #[serde(default)]
    pub compression: CompressionConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Object store configuration (S3 or any S3-compatible store)
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the full-resolution assets
    pub bucket: String,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint_url: Option<String>,
    /// Force path-style access
    #[serde(default)]
    pub force_path_style: bool,
    /// Public domain used to build object URLs, with or without a scheme.
    /// Falls back to `{bucket}.{endpoint host}`.
    pub public_domain: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    /// Parts in flight for a single multipart upload
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
    /// Upper bound for one whole upload, in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

/// Search index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search index API
    pub endpoint: String,
    /// API key sent as a bearer token
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_search_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum hits returned by a search
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Request body limit in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Compression of the copy sent to the search index
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Raw size above which the search copy gets compressed
    #[serde(default = "default_compression_threshold")]
    pub threshold_bytes: usize,
    #[serde(default = "default_compression_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_initial_quality")]
    pub initial_quality: u8,
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
    #[serde(default = "default_quality_step")]
    pub quality_step: u8,
    #[serde(default = "default_dimension_step")]
    pub dimension_step: f32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub format_policy: FormatPolicy,
}

// Default value functions
fn default_service_name() -> String {
    "image-ingest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_concurrency() -> usize {
    4
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_search_timeout_secs() -> u64 {
    30
}

fn default_search_limit() -> u32 {
    20
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_compression_threshold() -> usize {
    3 * 1024 * 1024 // 3MB, practical input limit of the search index
}

fn default_compression_max_bytes() -> usize {
    CompressionConstraints::default().max_bytes
}

fn default_min_dimension() -> u32 {
    CompressionConstraints::default().min_dimension
}

fn default_max_dimension() -> u32 {
    CompressionConstraints::default().max_dimension
}

fn default_initial_quality() -> u8 {
    CompressionConstraints::default().initial_quality
}

fn default_min_quality() -> u8 {
    CompressionConstraints::default().min_quality
}

fn default_quality_step() -> u8 {
    CompressionConstraints::default().quality_step
}

fn default_dimension_step() -> f32 {
    CompressionConstraints::default().dimension_step
}

fn default_max_attempts() -> u32 {
    CompressionConstraints::default().max_attempts
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "image-ingest")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/image-ingest").required(false))
            .add_source(config::File::with_name("/etc/nier/image-ingest").required(false))
            // Override with environment variables
            // INGEST__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl S3Config {
    /// Get the upload timeout as Duration
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Domain that object URLs are built on
    pub fn resolved_public_domain(&self) -> String {
        if let Some(ref domain) = self.public_domain {
            return domain.clone();
        }

        let host = self
            .endpoint_url
            .as_deref()
            .map(strip_scheme)
            .unwrap_or("s3.amazonaws.com")
            .trim_end_matches('/');

        format!("{}.{}", self.bucket, host)
    }
}

impl SearchConfig {
    /// Get the per-request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CompressionConfig {
    /// Typed constraints handed to the compression engine
    pub fn constraints(&self) -> CompressionConstraints {
        CompressionConstraints {
            max_bytes: self.max_bytes,
            min_dimension: self.min_dimension,
            max_dimension: self.max_dimension,
            initial_quality: self.initial_quality,
            min_quality: self.min_quality,
            quality_step: self.quality_step,
            dimension_step: self.dimension_step,
            max_attempts: self.max_attempts,
            format_policy: self.format_policy,
        }
    }
}

/// Strip a leading `http://` or `https://`
pub fn strip_scheme(value: &str) -> &str {
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let constraints = CompressionConstraints::default();
        Self {
            threshold_bytes: default_compression_threshold(),
            max_bytes: constraints.max_bytes,
            min_dimension: constraints.min_dimension,
            max_dimension: constraints.max_dimension,
            initial_quality: constraints.initial_quality,
            min_quality: constraints.min_quality,
            quality_step: constraints.quality_step,
            dimension_step: constraints.dimension_step,
            max_attempts: constraints.max_attempts,
            format_policy: constraints.format_policy,
        }
    }
}
