use crate::config::DatabaseConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors returned by the catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Catalog database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        CatalogError::Database(err.to_string())
    }
}

/// Stored catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Signature assigned by the search index
    pub signature: String,
    /// Public URL of the stored asset
    pub storage_url: String,
    /// Display filename
    pub filename: String,
    /// Size of the original asset in bytes
    pub filesize: i64,
    /// Whether the search index received a compressed copy
    pub is_compressed: bool,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

/// Display metadata written alongside the URL
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMetadata {
    pub filename: String,
    pub filesize: u64,
    pub is_compressed: bool,
}

/// Catalog persistence. Writes are idempotent upserts; the last write wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or replace the entry for `signature`
    async fn upsert(
        &self,
        signature: &str,
        storage_url: &str,
        metadata: &CatalogMetadata,
    ) -> Result<CatalogEntry, CatalogError>;

    /// Entry for `signature`, if any
    async fn get(&self, signature: &str) -> Result<Option<CatalogEntry>, CatalogError>;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<(), CatalogError>;
}

/// PostgreSQL-backed catalog
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Create a new catalog with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to catalog database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    #[instrument(skip(self, metadata))]
    async fn upsert(
        &self,
        signature: &str,
        storage_url: &str,
        metadata: &CatalogMetadata,
    ) -> Result<CatalogEntry, CatalogError> {
        let entry = sqlx::query_as::<_, CatalogEntry>(
            r#"
            INSERT INTO image_catalog (
                signature, storage_url, filename, filesize, is_compressed, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, NOW()
            )
            ON CONFLICT (signature) DO UPDATE SET
                storage_url = EXCLUDED.storage_url,
                filename = EXCLUDED.filename,
                filesize = EXCLUDED.filesize,
                is_compressed = EXCLUDED.is_compressed,
                updated_at = EXCLUDED.updated_at
            RETURNING signature, storage_url, filename, filesize, is_compressed, updated_at
            "#,
        )
        .bind(signature)
        .bind(storage_url)
        .bind(&metadata.filename)
        .bind(metadata.filesize as i64)
        .bind(metadata.is_compressed)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            signature = %signature,
            storage_url = %storage_url,
            "Catalog entry upserted"
        );

        metrics::counter!("catalog.upserts").increment(1);

        Ok(entry)
    }

    async fn get(&self, signature: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let entry = sqlx::query_as::<_, CatalogEntry>(
            r#"
            SELECT signature, storage_url, filename, filesize, is_compressed, updated_at
            FROM image_catalog
            WHERE signature = $1
            "#,
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
