//! Nier Image Ingest Service
//!
//! Product image ingestion for the Nier catalog. An uploaded image is
//! registered with a remote content-based image-search index, the full
//! resolution original is archived in an S3-compatible object store under a
//! key derived from the index's signature, and a local catalog row links the
//! signature to the stored asset.
//!
//! ## Features
//!
//! - **Adaptive Compression**: Oversized images are shrunk and re-encoded for
//!   the search index while the original is archived untouched
//! - **Deterministic Keys**: The storage key is a pure function of the
//!   signature, so re-ingesting the same content overwrites in place
//! - **Chunked Uploads**: Large assets go up in ordered multipart chunks with
//!   bounded parallelism and abort-on-failure
//! - **Partial Failure Policy**: Once the index has the image, storage and
//!   catalog failures are reported, never rolled back
//!
//! ## Architecture
//!
//! ```text
//!  HTTP API                    Search Index                Object Store
//! ┌──────────────┐            ┌──────────────┐           ┌──────────────┐
//! │ POST         │            │ register     │           │ images/      │
//! │ /api/v1/     │            │ metadata     │           │  {sig}.png   │
//! │   images     │            │ search       │           └──────────────┘
//! └──────────────┘            └──────────────┘                  ▲
//!        │                           ▲                          │
//!        ▼                           │                          │
//! ┌──────────────┐            ┌──────────────┐           ┌──────────────┐
//! │ Compression  │───────────▶│ Ingestion    │──────────▶│ Storage      │
//! │ Engine       │            │ Pipeline     │           │ Uploader     │
//! └──────────────┘            └──────────────┘           └──────────────┘
//!                                    │
//!                                    ▼
//!                             ┌──────────────┐
//!                             │ Catalog      │
//!                             │ (PostgreSQL) │
//!                             └──────────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod error;
pub mod key;
pub mod pipeline;
pub mod search_client;
pub mod storage;

pub use api::{AppState, IngestResponse};
pub use catalog::{CatalogEntry, CatalogStore, PgCatalog};
pub use compression::{compress, CompressionConstraints, CompressionResult, CompressionStatus};
pub use config::Config;
pub use error::IngestError;
pub use key::{derive_key, fallback_key};
pub use pipeline::{IngestReport, IngestRequest, IngestStage, IngestionPipeline};
pub use search_client::{HttpSearchIndex, SearchIndex};
pub use storage::{S3ObjectStore, StorageUploader};
