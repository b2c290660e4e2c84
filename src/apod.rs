use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Sent on every outbound request to the APOD API and image hosts.
pub const USER_AGENT: &str = concat!("apodbot/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One day's APOD metadata, as returned by the NASA API.
#[derive(Debug, Clone, Deserialize)]
pub struct DailyContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub media_type: String,
    pub url: String,
    #[serde(default)]
    pub hdurl: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

impl DailyContent {
    /// The HD image when the API offers one, the standard one otherwise.
    pub fn image_url(&self) -> &str {
        self.hdurl.as_deref().unwrap_or(&self.url)
    }
}

/// Downloaded image bytes, held only for the duration of one invocation.
#[derive(Debug)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Everything that can go wrong fetching one day's picture. Each variant maps
/// to a user-facing message via [`FetchError::user_message`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to the NASA API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("NASA API returned status {0}")]
    UpstreamUnavailable(StatusCode),
    #[error("NASA API response could not be parsed: {0}")]
    MalformedResponse(#[source] reqwest::Error),
    #[error("today's content is not an image (media_type: {media_type})")]
    NonImageContent { media_type: String, url: String },
    #[error("image link declares content type {content_type}")]
    InvalidImageContentType { content_type: String, url: String },
    #[error("image download returned status {status}")]
    ImageDownloadFailed { status: StatusCode, url: String },
}

impl FetchError {
    /// Text sent back to the invoking chat when the fetch fails.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::Request(_) => "Error: Could not connect to NASA API.".to_string(),
            FetchError::UpstreamUnavailable(status) => format!(
                "Error: Could not connect to NASA API (Status: {}).",
                status.as_u16()
            ),
            FetchError::MalformedResponse(_) => "Error: Could not parse API response.".to_string(),
            FetchError::NonImageContent { media_type, url } => format!(
                "Today's content is not an image (media_type: {}). URL: {}",
                media_type, url
            ),
            FetchError::InvalidImageContentType { content_type, url } => format!(
                "The link does not point to a valid image (Content-Type: {}). URL: {}",
                content_type, url
            ),
            FetchError::ImageDownloadFailed { status, url } => format!(
                "Could not download image (Status: {}). URL: {}",
                status.as_u16(),
                url
            ),
        }
    }
}

/// Client for the NASA "Astronomy Picture of the Day" API.
pub struct ApodClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApodClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fetch today's metadata and, when it is an image, the image itself.
    /// One attempt per invocation; failures are surfaced, never retried here.
    pub async fn fetch_today(&self) -> Result<(DailyContent, ImagePayload), FetchError> {
        let url = format!("{}/planetary/apod?api_key={}", self.base_url, self.api_key);

        debug!("Requesting APOD metadata");
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable(status));
        }

        let content: DailyContent = response.json().await.map_err(FetchError::MalformedResponse)?;

        if content.media_type != "image" {
            return Err(FetchError::NonImageContent {
                media_type: content.media_type.clone(),
                url: content.url.clone(),
            });
        }

        let image = self.download_image(content.image_url()).await?;
        Ok((content, image))
    }

    async fn download_image(&self, url: &str) -> Result<ImagePayload, FetchError> {
        // Cheap pre-check: a HEAD that declares a non-image payload means the
        // link is stale or points at an HTML page. A failed HEAD or a missing
        // header is tolerated and the download decides.
        match self.http.head(url).send().await {
            Ok(head) => {
                if let Some(content_type) = header_str(head.headers(), header::CONTENT_TYPE) {
                    if !content_type.starts_with("image/") {
                        return Err(FetchError::InvalidImageContentType {
                            content_type: content_type.to_string(),
                            url: url.to_string(),
                        });
                    }
                }
            }
            Err(e) => warn!("HEAD pre-check failed for {}: {}", url, e),
        }

        debug!("Downloading image from {}", url);
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ImageDownloadFailed {
                status,
                url: url.to_string(),
            });
        }

        let content_type = header_str(response.headers(), header::CONTENT_TYPE).map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        debug!("Downloaded image: {} bytes", bytes.len());

        Ok(ImagePayload {
            bytes,
            content_type,
        })
    }
}

fn header_str(headers: &header::HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg-body";

    /// Bind an ephemeral port so the routes can embed their own base URL.
    async fn bind() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    fn spawn(listener: tokio::net::TcpListener, app: Router) {
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    fn metadata_route(body: Value) -> axum::routing::MethodRouter {
        get(move || {
            let body = body.clone();
            async move { Json(body) }
        })
    }

    fn jpeg_route() -> axum::routing::MethodRouter {
        get(|| async {
            (
                [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
                JPEG_BYTES.to_vec(),
            )
        })
    }

    fn client(base: &str) -> ApodClient {
        ApodClient::new(base, "DEMO_KEY").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_image_prefers_hdurl() {
        let (listener, base) = bind().await;
        let app = Router::new()
            .route(
                "/planetary/apod",
                metadata_route(json!({
                    "media_type": "image",
                    "url": format!("{base}/img.jpg"),
                    "hdurl": format!("{base}/img_hd.jpg"),
                    "title": "T",
                    "explanation": "E",
                    "date": "2024-01-01",
                })),
            )
            .route("/img_hd.jpg", jpeg_route());
        spawn(listener, app);

        let (content, image) = client(&base).fetch_today().await.unwrap();
        assert_eq!(content.title.as_deref(), Some("T"));
        assert_eq!(content.date.as_deref(), Some("2024-01-01"));
        assert_eq!(image.bytes, JPEG_BYTES);
        assert_eq!(image.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_url_without_hdurl() {
        let (listener, base) = bind().await;
        let app = Router::new()
            .route(
                "/planetary/apod",
                metadata_route(json!({
                    "media_type": "image",
                    "url": format!("{base}/img.jpg"),
                    "title": "T",
                })),
            )
            .route("/img.jpg", jpeg_route());
        spawn(listener, app);

        let (_, image) = client(&base).fetch_today().await.unwrap();
        assert_eq!(image.bytes, JPEG_BYTES);
    }

    #[tokio::test]
    async fn test_upstream_unavailable_carries_status() {
        let (listener, base) = bind().await;
        let app = Router::new().route(
            "/planetary/apod",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "down") }),
        );
        spawn(listener, app);

        let err = client(&base).fetch_today().await.unwrap_err();
        match &err {
            FetchError::UpstreamUnavailable(status) => assert_eq!(status.as_u16(), 503),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.user_message(),
            "Error: Could not connect to NASA API (Status: 503)."
        );
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (listener, base) = bind().await;
        let app = Router::new().route("/planetary/apod", get(|| async { "certainly not json" }));
        spawn(listener, app);

        let err = client(&base).fetch_today().await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
        assert_eq!(err.user_message(), "Error: Could not parse API response.");
    }

    #[tokio::test]
    async fn test_non_image_content_skips_download() {
        let hits = Arc::new(AtomicUsize::new(0));
        let route_hits = hits.clone();

        let (listener, base) = bind().await;
        let video_url = format!("{base}/v.mp4");
        let app = Router::new()
            .route(
                "/planetary/apod",
                metadata_route(json!({
                    "media_type": "video",
                    "url": video_url,
                    "title": "T",
                })),
            )
            .route(
                "/v.mp4",
                get(move || {
                    let hits = route_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "video"
                    }
                }),
            );
        spawn(listener, app);

        let err = client(&base).fetch_today().await.unwrap_err();
        let message = err.user_message();
        assert!(matches!(err, FetchError::NonImageContent { .. }));
        assert!(message.contains("media_type: video"));
        assert!(message.contains("/v.mp4"));
        // The media-type gate must fire before any request to the URL.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_image_content_type() {
        let (listener, base) = bind().await;
        let app = Router::new()
            .route(
                "/planetary/apod",
                metadata_route(json!({
                    "media_type": "image",
                    "url": format!("{base}/page.html"),
                })),
            )
            .route(
                "/page.html",
                get(|| async {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/html")],
                        "<html></html>",
                    )
                }),
            );
        spawn(listener, app);

        let err = client(&base).fetch_today().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidImageContentType { .. }));
        let message = err.user_message();
        assert!(message.contains("Content-Type: text/html"));
        assert!(message.contains("/page.html"));
    }

    #[tokio::test]
    async fn test_image_download_failed() {
        let (listener, base) = bind().await;
        // No route for the image: the host answers 404 with no content type,
        // so the lenient HEAD pre-check falls through to the download.
        let app = Router::new().route(
            "/planetary/apod",
            metadata_route(json!({
                "media_type": "image",
                "url": format!("{base}/gone.jpg"),
            })),
        );
        spawn(listener, app);

        let err = client(&base).fetch_today().await.unwrap_err();
        match &err {
            FetchError::ImageDownloadFailed { status, url } => {
                assert_eq!(status.as_u16(), 404);
                assert!(url.ends_with("/gone.jpg"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.user_message().contains("Status: 404"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_request_error() {
        // Port 1 on loopback refuses connections.
        let err = client("http://127.0.0.1:1").fetch_today().await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        assert_eq!(err.user_message(), "Error: Could not connect to NASA API.");
    }
}
