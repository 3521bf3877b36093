use crate::config::SearchConfig;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{multipart, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors returned by the search index.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// The request never got a response (connect, TLS, timeout)
    #[error("Search index unreachable: {0}")]
    Transport(String),

    /// The index answered with an error
    #[error("Search index rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// The index answered with something we cannot parse
    #[error("Unexpected search index response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::InvalidResponse(err.to_string())
        } else {
            SearchError::Transport(err.to_string())
        }
    }
}

/// Outcome of registering an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub signature: String,
    /// The content was already indexed; `signature` is the existing one
    pub is_duplicate: bool,
}

/// One search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub signature: String,
    pub score: f32,
    /// Metadata attached through `update_metadata`; an object or a JSON string
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl SearchHit {
    /// `imageUrl` recorded in the attached metadata, if any
    pub fn metadata_image_url(&self) -> Option<String> {
        let metadata = self.metadata.as_ref()?;
        let object = match metadata {
            serde_json::Value::String(raw) => serde_json::from_str(raw).ok()?,
            other => other.clone(),
        };
        object
            .get("imageUrl")
            .and_then(|v| v.as_str())
            .filter(|url| !url.is_empty())
            .map(String::from)
    }
}

/// Descriptive metadata attached to a registered signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBrief {
    pub image_url: String,
    pub filename: String,
    pub filesize: u64,
    pub storage_key: String,
    pub is_compressed: bool,
    pub original_size: u64,
    pub compressed_size: Option<u64>,
    pub update_time: DateTime<Utc>,
}

/// Operations the pipeline needs from the search index
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Register image content and get its signature
    async fn register(&self, image: Bytes, content_type: &str) -> Result<Registration, SearchError>;

    /// Attach metadata to an already registered signature
    async fn update_metadata(&self, signature: &str, brief: &ImageBrief) -> Result<(), SearchError>;

    /// Find visually similar content, best match first
    async fn search(
        &self,
        image: Bytes,
        content_type: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    signature: String,
    #[serde(default)]
    duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
    error_msg: String,
}

/// HTTP implementation of [`SearchIndex`]
pub struct HttpSearchIndex {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpSearchIndex {
    /// Create a client for the configured endpoint
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid search endpoint: {}", config.endpoint))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build search index HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SearchError::InvalidResponse(format!(
                    "search endpoint cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn image_part(image: Bytes, content_type: &str) -> Result<multipart::Part, SearchError> {
        multipart::Part::bytes(image.to_vec())
            .file_name("image")
            .mime_str(content_type)
            .map_err(|e| SearchError::InvalidResponse(format!("invalid content type: {}", e)))
    }
}

/// Turn a non-success response into a typed rejection
async fn rejection(response: reqwest::Response) -> SearchError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => SearchError::Rejected {
            code: err.error_code,
            message: err.error_msg,
        },
        Err(_) => SearchError::Rejected {
            code: status.as_u16() as i64,
            message: if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body
            },
        },
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn register(&self, image: Bytes, content_type: &str) -> Result<Registration, SearchError> {
        let form = multipart::Form::new().part("image", Self::image_part(image, content_type)?);

        let response = self
            .authorize(self.client.post(self.url(&["v1", "images"])?))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: RegisterResponse = response.json().await?;
        if body.signature.is_empty() {
            return Err(SearchError::InvalidResponse(
                "registration returned an empty signature".to_string(),
            ));
        }

        debug!(
            signature = %body.signature,
            duplicate = body.duplicate,
            "Image registered with search index"
        );

        Ok(Registration {
            signature: body.signature,
            is_duplicate: body.duplicate,
        })
    }

    #[instrument(skip(self, brief))]
    async fn update_metadata(&self, signature: &str, brief: &ImageBrief) -> Result<(), SearchError> {
        let response = self
            .authorize(
                self.client
                    .put(self.url(&["v1", "images", signature, "metadata"])?),
            )
            .json(brief)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!(signature = %signature, "Signature unknown to search index");
                Err(rejection(response).await)
            }
            _ => Err(rejection(response).await),
        }
    }

    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn search(
        &self,
        image: Bytes,
        content_type: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let form = multipart::Form::new()
            .part("image", Self::image_part(image, content_type)?)
            .text("limit", limit.to_string());

        let response = self
            .authorize(self.client.post(self.url(&["v1", "search"])?))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: SearchResponse = response.json().await?;
        let mut hits = body.results;
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, Path};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{post, put};
    use axum::{Json, Router};

    async fn fake_register(mut multipart: Multipart) -> (AxumStatus, Json<serde_json::Value>) {
        let mut image = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            if field.name() == Some("image") {
                image = field.bytes().await.unwrap().to_vec();
            }
        }

        match image.as_slice() {
            b"known" => (
                AxumStatus::OK,
                Json(serde_json::json!({ "signature": "111,222", "duplicate": true })),
            ),
            b"broken" => (
                AxumStatus::BAD_REQUEST,
                Json(serde_json::json!({ "error_code": 216201, "error_msg": "image format error" })),
            ),
            _ => (
                AxumStatus::OK,
                Json(serde_json::json!({ "signature": "333,444" })),
            ),
        }
    }

    async fn fake_metadata(
        Path(signature): Path<String>,
        Json(brief): Json<ImageBrief>,
    ) -> AxumStatus {
        if signature == "111,222" && brief.storage_key == "images/111_222.png" {
            AxumStatus::NO_CONTENT
        } else {
            AxumStatus::NOT_FOUND
        }
    }

    async fn fake_search() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "results": [
                { "signature": "a", "score": 0.4 },
                { "signature": "b", "score": 0.9, "metadata": "{\"imageUrl\":\"https://cdn/b.png\"}" },
                { "signature": "c", "score": 0.7, "metadata": { "imageUrl": "https://cdn/c.png" } }
            ]
        }))
    }

    async fn spawn_fake_index() -> HttpSearchIndex {
        let router = Router::new()
            .route("/v1/images", post(fake_register))
            .route("/v1/images/:signature/metadata", put(fake_metadata))
            .route("/v1/search", post(fake_search));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        HttpSearchIndex::new(&SearchConfig {
            endpoint: format!("http://{}/", addr),
            api_key: Some("test-key".to_string()),
            request_timeout_secs: 5,
            search_limit: 20,
        })
        .unwrap()
    }

    fn brief(storage_key: &str) -> ImageBrief {
        ImageBrief {
            image_url: format!("https://cdn.example.com/{}", storage_key),
            filename: "shoe.png".to_string(),
            filesize: 10,
            storage_key: storage_key.to_string(),
            is_compressed: false,
            original_size: 10,
            compressed_size: None,
            update_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_new_content() {
        let index = spawn_fake_index().await;
        let registration = index
            .register(Bytes::from_static(b"fresh"), "image/png")
            .await
            .unwrap();

        assert_eq!(registration.signature, "333,444");
        assert!(!registration.is_duplicate);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_success() {
        let index = spawn_fake_index().await;
        let registration = index
            .register(Bytes::from_static(b"known"), "image/png")
            .await
            .unwrap();

        assert_eq!(registration.signature, "111,222");
        assert!(registration.is_duplicate);
    }

    #[tokio::test]
    async fn test_register_rejection_is_typed() {
        let index = spawn_fake_index().await;
        let err = index
            .register(Bytes::from_static(b"broken"), "image/png")
            .await
            .unwrap_err();

        match err {
            SearchError::Rejected { code, message } => {
                assert_eq!(code, 216201);
                assert_eq!(message, "image format error");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_metadata_escapes_signature() {
        let index = spawn_fake_index().await;
        assert!(index
            .update_metadata("111,222", &brief("images/111_222.png"))
            .await
            .is_ok());

        let err = index
            .update_metadata("999", &brief("images/999.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Rejected { code: 404, .. }));
    }

    #[tokio::test]
    async fn test_search_orders_by_score() {
        let index = spawn_fake_index().await;
        let hits = index
            .search(Bytes::from_static(b"query-image"), "image/png", 2)
            .await
            .unwrap();

        let signatures: Vec<_> = hits.iter().map(|h| h.signature.as_str()).collect();
        assert_eq!(signatures, vec!["b", "c"]);
        assert_eq!(hits[0].metadata_image_url().as_deref(), Some("https://cdn/b.png"));
        assert_eq!(hits[1].metadata_image_url().as_deref(), Some("https://cdn/c.png"));
    }

    #[tokio::test]
    async fn test_unreachable_index_is_transport_error() {
        let index = HttpSearchIndex::new(&SearchConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            api_key: None,
            request_timeout_secs: 2,
            search_limit: 20,
        })
        .unwrap();

        let err = index
            .register(Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Transport(_)));
    }

    #[test]
    fn test_metadata_image_url_missing() {
        let hit = SearchHit {
            signature: "s".to_string(),
            score: 1.0,
            metadata: Some(serde_json::Value::String("not json".to_string())),
        };
        assert_eq!(hit.metadata_image_url(), None);
    }

    #[test]
    fn test_brief_serializes_camel_case() {
        let value = serde_json::to_value(brief("images/x.png")).unwrap();
        assert!(value.get("imageUrl").is_some());
        assert!(value.get("storageKey").is_some());
        assert!(value.get("isCompressed").is_some());
    }
}
