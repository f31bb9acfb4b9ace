//! Image fetching and decoding.
//!
//! [`HttpImageLoader`] fetches `http(s)` images anonymously (no cookie store,
//! no credentials), reads `file` URLs from disk, and resolves relative links
//! against an optional base URL. Every load is bounded by the configured
//! fetch timeout and ends in a [`PixelBuffer`] of exactly the configured size.

use std::time::Duration;

use async_trait::async_trait;
use image::imageops::FilterType;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

use crate::config::LoaderConfig;
use crate::types::PixelBuffer;
use crate::{Error, LensResult};

/// Reasons an image is unavailable. None of these abort a search on their
/// own; the orchestrator drops the affected candidate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
    #[error("Invalid image url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unsupported scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("Fetch failed for '{url}': {reason}")]
    Fetch { url: String, reason: String },
    #[error("Timed out after {timeout:?} fetching '{url}'")]
    Timeout { url: String, timeout: Duration },
    #[error("'{url}' responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("'{url}' is larger than {limit} bytes")]
    TooLarge { url: String, limit: usize },
    #[error("Failed to decode '{url}': {reason}")]
    Decode { url: String, reason: String },
}

impl ImageError {
    pub fn url(&self) -> &str {
        match self {
            ImageError::InvalidUrl { url, .. }
            | ImageError::UnsupportedScheme { url, .. }
            | ImageError::Fetch { url, .. }
            | ImageError::Timeout { url, .. }
            | ImageError::Status { url, .. }
            | ImageError::TooLarge { url, .. }
            | ImageError::Decode { url, .. } => url,
        }
    }
}

pub type ImageResult<T> = Result<T, ImageError>;

#[mockall::automock]
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Fetches and decodes `url` into a buffer of the loader's fixed size.
    async fn load(&self, url: &str) -> ImageResult<PixelBuffer>;
}

#[derive(Debug, Clone)]
pub struct HttpImageLoader {
    config: LoaderConfig,
    base_url: Option<Url>,
    client: Client,
}

impl HttpImageLoader {
    pub fn try_new(config: LoaderConfig) -> LensResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Internal(format!("Invalid loader base_url: {}", e)))?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build http client: {}", e)))?;
        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn resolve(&self, raw: &str) -> ImageResult<Url> {
        let invalid = |reason: String| ImageError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };
        let url = match (Url::parse(raw), &self.base_url) {
            (Ok(url), _) => url,
            (Err(_), Some(base)) => base.join(raw).map_err(|e| invalid(e.to_string()))?,
            (Err(e), None) => return Err(invalid(e.to_string())),
        };
        match url.scheme() {
            "http" | "https" | "file" => Ok(url),
            scheme => Err(ImageError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }

    async fn fetch_http(&self, raw: &str, url: Url) -> ImageResult<Vec<u8>> {
        let timeout = self.config.fetch_timeout;
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                ImageError::Timeout {
                    url: raw.to_string(),
                    timeout,
                }
            } else {
                ImageError::Fetch {
                    url: raw.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        if !response.status().is_success() {
            return Err(ImageError::Status {
                url: raw.to_string(),
                status: response.status().as_u16(),
            });
        }
        if response
            .content_length()
            .is_some_and(|len| len as usize > self.config.max_image_bytes)
        {
            return Err(self.too_large(raw));
        }

        // chunked responses carry no length, so enforce the limit while reading
        let limit = self.config.max_image_bytes;
        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await.map_err(map_err)? {
            if body.len() + chunk.len() > limit {
                return Err(self.too_large(raw));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn read_file(&self, raw: &str, url: &Url) -> ImageResult<Vec<u8>> {
        let path = url.to_file_path().map_err(|_| ImageError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        let timeout = self.config.fetch_timeout;
        tokio::time::timeout(timeout, tokio::fs::read(&path))
            .await
            .map_err(|_| ImageError::Timeout {
                url: raw.to_string(),
                timeout,
            })?
            .map_err(|e| ImageError::Fetch {
                url: raw.to_string(),
                reason: e.to_string(),
            })
    }

    fn too_large(&self, raw: &str) -> ImageError {
        ImageError::TooLarge {
            url: raw.to_string(),
            limit: self.config.max_image_bytes,
        }
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn load(&self, url: &str) -> ImageResult<PixelBuffer> {
        let resolved = self.resolve(url)?;
        let bytes = if resolved.scheme() == "file" {
            self.read_file(url, &resolved).await?
        } else {
            self.fetch_http(url, resolved).await?
        };
        if bytes.len() > self.config.max_image_bytes {
            return Err(self.too_large(url));
        }
        debug!(bytes = bytes.len(), "fetched image");

        let (width, height) = (self.config.width, self.config.height);
        let owned_url = url.to_string();
        tokio::task::spawn_blocking(move || decode(&owned_url, &bytes, width, height))
            .await
            .map_err(|e| ImageError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?
    }
}

/// Decodes `bytes` and resizes to exactly `width`×`height`. The intermediate
/// image is dropped before returning.
pub fn decode(url: &str, bytes: &[u8], width: u32, height: u32) -> ImageResult<PixelBuffer> {
    let image = image::load_from_memory(bytes).map_err(|e| ImageError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let resized = image.resize_exact(width, height, FilterType::Triangle);
    Ok(PixelBuffer::new(resized.to_rgb8()))
}
