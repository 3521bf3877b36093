use anyhow::{Context, Result};
use image_ingest::api::{start_api_server, AppState};
use image_ingest::catalog::PgCatalog;
use image_ingest::config::Config;
use image_ingest::pipeline::IngestionPipeline;
use image_ingest::search_client::HttpSearchIndex;
use image_ingest::storage::{S3ObjectStore, StorageUploader};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Nier Image Ingest Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let catalog = Arc::new(
        PgCatalog::new(&config.database)
            .await
            .context("Failed to initialize catalog")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        catalog
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    // The S3 client itself is built on first use
    let object_store = Arc::new(S3ObjectStore::new(&config.s3));
    let uploader = Arc::new(StorageUploader::new(object_store, &config.s3));

    let search_index =
        Arc::new(HttpSearchIndex::new(&config.search).context("Failed to initialize search client")?);

    let pipeline = Arc::new(IngestionPipeline::new(
        search_index,
        uploader,
        catalog,
        config.compression.clone(),
    ));

    let api_state = AppState {
        pipeline,
        search_limit: config.search.search_limit,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Image ingest service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down image ingest service");

    api_handle.abort();

    info!("Image ingest service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
