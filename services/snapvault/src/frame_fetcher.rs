//! Camera snapshot retrieval.
//!
//! Fetches a still image over HTTP and decodes it into a [`Frame`]. Network
//! and decode failures surface as [`FetchError`] and never reach the archive.

use crate::config::CameraConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur while fetching a snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Snapshot from {url} is not a decodable image: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// Short label used in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::Decode { .. } => "decode",
        }
    }
}

/// A decoded camera image and the instant it was captured.
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, captured_at: DateTime<Utc>) -> Self {
        Self { image, captured_at }
    }

    /// Decode raw bytes into a frame. Fails instead of producing a corrupt frame.
    pub fn decode(bytes: &[u8], captured_at: DateTime<Utc>) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::new(image, captured_at))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Anything that can produce a frame from a snapshot URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Frame, FetchError>;
}

/// Build the snapshot URL for a camera address.
///
/// Bare addresses (`192.168.1.20`, `cam.local:8080`) get an `http://` scheme;
/// addresses that already carry a scheme are used as the base unchanged.
pub fn snapshot_url(address: &str, snapshot_path: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    let path = if snapshot_path.starts_with('/') {
        snapshot_path.to_string()
    } else {
        format!("/{}", snapshot_path)
    };

    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}{}", address, path)
    } else {
        format!("http://{}{}", address, path)
    }
}

/// HTTP snapshot fetcher with a bounded request time.
pub struct HttpFrameFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFrameFetcher {
    pub fn new(config: &CameraConfig) -> Result<Self, reqwest::Error> {
        let timeout = config.fetch_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client, timeout })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let network_error = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: if e.is_timeout() {
                format!("timed out after {:?}", self.timeout)
            } else {
                e.to_string()
            },
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(network_error)?;

        let body = response.bytes().await.map_err(network_error)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl SnapshotSource for HttpFrameFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Frame, FetchError> {
        let bytes = match self.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Snapshot request failed");
                return Err(e);
            }
        };
        let captured_at = Utc::now();

        debug!(size_bytes = bytes.len(), "Snapshot downloaded");

        let frame = tokio::task::spawn_blocking(move || Frame::decode(&bytes, captured_at))
            .await
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: format!("decode task failed: {}", e),
            })?
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            width = frame.width(),
            height = frame.height(),
            captured_at = %frame.captured_at(),
            "Snapshot decoded"
        );

        Ok(frame)
    }
}
