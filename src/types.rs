use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordering token for searches. Higher ids supersede lower ones.
pub type RequestId = u64;

/// Opaque identifier of a gallery card
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl CardId {
    /// Creates a new random card ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An image-backed gallery page.
///
/// The field names on the wire follow the gallery's `cards.json` layout
/// (`link`, `email`); the search pipeline only ever reads `image_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub id: CardId,
    #[serde(rename = "link", alias = "image_url")]
    pub image_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "email", alias = "owner_email")]
    pub owner_email: String,
    #[serde(default)]
    pub workflows: Vec<String>,
}

impl Card {
    pub fn new(image_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: CardId::new(),
            image_url: image_url.into(),
            title: title.into(),
            owner_email: String::new(),
            workflows: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<CardId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_owner(mut self, email: impl Into<String>) -> Self {
        self.owner_email = email.into();
        self
    }

    pub fn with_workflows<I, S>(mut self, workflows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workflows = workflows.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable embedding produced by a feature extractor.
///
/// Cloning shares the underlying buffer.
#[derive(Clone, PartialEq)]
pub struct FeatureVector(Arc<[f32]>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values.into())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 8 {
            f.debug_tuple("FeatureVector").field(&self.0).finish()
        } else {
            write!(f, "FeatureVector(dim={})", self.0.len())
        }
    }
}

/// Decoded RGB pixels, already resized to the extractor's input size.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Buffer of `width`×`height` pixels all set to `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.image.pixels().map(|p| p.0)
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }
}

/// Last computed embedding for an image URL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub image_url: String,
    pub vector: FeatureVector,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub card: Card,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query_image_url: String,
    pub candidates: Vec<Card>,
    pub request_id: RequestId,
}

impl SearchRequest {
    pub fn new(
        query_image_url: impl Into<String>,
        candidates: Vec<Card>,
        request_id: RequestId,
    ) -> Self {
        Self {
            query_image_url: query_image_url.into(),
            candidates,
            request_id,
        }
    }
}

/// A candidate dropped from a search because its image could not be embedded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OmittedCandidate {
    pub card_id: CardId,
    pub image_url: String,
    pub reason: String,
}

/// Outcome of a completed search
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub request_id: RequestId,
    pub results: Vec<RankedResult>,
    pub omitted: Vec<OmittedCandidate>,
    #[serde(with = "crate::config::duration_ms")]
    pub elapsed: Duration,
}

impl SearchReport {
    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.results.iter().map(|r| &r.card)
    }
}
