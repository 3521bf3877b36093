use crate::catalog::CatalogError;
use crate::compression::CompressionError;
use crate::search_client::SearchError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while ingesting one image.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed or missing input, rejected before the pipeline starts
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The search index refused or failed the registration
    #[error("Search index registration failed: {0}")]
    Registration(#[source] SearchError),

    /// A similarity search against the index failed
    #[error("Search index query failed: {0}")]
    Search(#[source] SearchError),

    /// The object store is missing or misconfigured
    #[error("Object store misconfigured: {0}")]
    StorageConfig(#[source] StorageError),

    /// The transfer itself failed
    #[error("Upload failed: {0}")]
    StorageTransfer(#[source] StorageError),

    /// The catalog write failed
    #[error("Catalog update failed: {0}")]
    Reconcile(#[source] CatalogError),

    /// Encoding the search copy failed
    #[error("Compression failed: {0}")]
    Compression(#[source] CompressionError),
}

impl IngestError {
    /// Whether this error fails the whole request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Validation(_) | IngestError::Registration(_) | IngestError::Search(_)
        )
    }

    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "VALIDATION_ERROR",
            IngestError::Registration(_) => "REGISTRATION_ERROR",
            IngestError::Search(_) => "SEARCH_ERROR",
            IngestError::StorageConfig(_) => "STORAGE_CONFIG_ERROR",
            IngestError::StorageTransfer(_) => "STORAGE_TRANSFER_ERROR",
            IngestError::Reconcile(_) => "RECONCILE_ERROR",
            IngestError::Compression(_) => "COMPRESSION_ERROR",
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        if err.is_config_error() {
            IngestError::StorageConfig(err)
        } else {
            IngestError::StorageTransfer(err)
        }
    }
}

impl From<SearchError> for IngestError {
    fn from(err: SearchError) -> Self {
        IngestError::Registration(err)
    }
}

impl From<CatalogError> for IngestError {
    fn from(err: CatalogError) -> Self {
        IngestError::Reconcile(err)
    }
}

impl From<CompressionError> for IngestError {
    fn from(err: CompressionError) -> Self {
        IngestError::Compression(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        let missing = StorageError::BucketNotFound {
            bucket: "images".to_string(),
        };
        assert!(matches!(
            IngestError::from(missing),
            IngestError::StorageConfig(_)
        ));

        let part = StorageError::PartFailed {
            part_number: 3,
            message: "connection reset".to_string(),
        };
        assert!(matches!(
            IngestError::from(part),
            IngestError::StorageTransfer(_)
        ));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(IngestError::Validation("no image".to_string()).is_fatal());
        assert!(IngestError::from(SearchError::Transport("timeout".to_string())).is_fatal());
        assert!(!IngestError::from(StorageError::Timeout { seconds: 5 }).is_fatal());
        assert!(!IngestError::from(CatalogError::Database("down".to_string())).is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            IngestError::Validation("x".to_string()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            IngestError::from(StorageError::BucketNotFound {
                bucket: "b".to_string()
            })
            .code(),
            "STORAGE_CONFIG_ERROR"
        );

        let search = IngestError::Search(SearchError::Transport("down".to_string()));
        assert_eq!(search.code(), "SEARCH_ERROR");
        assert!(search.to_string().starts_with("Search index query failed"));
        assert!(search.is_fatal());
    }
}
