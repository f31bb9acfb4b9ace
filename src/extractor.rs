//! Feature extraction seam.
//!
//! The model that turns pixels into an embedding is supplied from outside the
//! crate through [`FeatureExtractor`]. A process installs its extractor once
//! at startup with [`init_model`]; the built-in [`ColorHistogramExtractor`]
//! is a deterministic stand-in that needs no model files.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ExtractorConfig;
use crate::types::{FeatureVector, PixelBuffer};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractorError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Extractor returned an empty embedding")]
    EmptyEmbedding,
    #[error("Extractor returned non-finite values")]
    NonFinite,
    #[error("Model already initialized: {0}")]
    AlreadyInitialized(String),
}

pub type ExtractorResult<T> = Result<T, ExtractorError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorInfo {
    pub name: String,
    pub dimension: usize,
}

/// Turns a decoded image into a fixed-length embedding.
///
/// Implementations must be deterministic for identical input and always
/// produce vectors of [`FeatureExtractor::dimension`] length.
#[mockall::automock]
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn embed(&self, pixels: &PixelBuffer) -> ExtractorResult<FeatureVector>;

    fn dimension(&self) -> usize;

    fn info(&self) -> ExtractorInfo;
}

pub type SharedExtractor = Arc<dyn FeatureExtractor>;

/// Rejects embeddings that cannot be compared meaningfully.
pub fn check_embedding(vector: FeatureVector) -> ExtractorResult<FeatureVector> {
    if vector.is_empty() {
        return Err(ExtractorError::EmptyEmbedding);
    }
    if !vector.is_finite() {
        return Err(ExtractorError::NonFinite);
    }
    Ok(vector)
}

static MODEL: OnceCell<SharedExtractor> = OnceCell::const_new();

/// Installs the process-wide extractor.
///
/// `load` runs at most once; a second call after a successful
/// initialization fails with [`ExtractorError::AlreadyInitialized`].
pub async fn init_model<F, Fut>(load: F) -> ExtractorResult<SharedExtractor>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ExtractorResult<SharedExtractor>>,
{
    if let Some(existing) = MODEL.get() {
        return Err(ExtractorError::AlreadyInitialized(existing.info().name));
    }
    let model = MODEL.get_or_try_init(load).await?;
    let info = model.info();
    info!(model = %info.name, dimension = info.dimension, "feature extractor ready");
    Ok(model.clone())
}

/// The extractor installed by [`init_model`], if any.
pub fn model() -> Option<SharedExtractor> {
    MODEL.get().cloned()
}

/// Joint RGB colour histogram.
///
/// Each channel is quantised into `bins` buckets, giving `bins³` dimensions.
/// Counts are normalised by the number of pixels.
#[derive(Debug, Clone)]
pub struct ColorHistogramExtractor {
    bins: usize,
}

impl ColorHistogramExtractor {
    pub const NAME: &'static str = "color-histogram";

    pub fn new(bins: usize) -> Self {
        Self {
            bins: bins.clamp(1, 16),
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(config.histogram_bins)
    }

    fn bucket(&self, channel: u8) -> usize {
        channel as usize * self.bins / 256
    }

    fn histogram(&self, pixels: &PixelBuffer) -> Vec<f32> {
        let mut counts = vec![0u32; self.dimension()];
        let mut total = 0u32;
        for [r, g, b] in pixels.pixels() {
            let index = (self.bucket(r) * self.bins + self.bucket(g)) * self.bins + self.bucket(b);
            counts[index] += 1;
            total += 1;
        }
        if total == 0 {
            return vec![0.0; counts.len()];
        }
        counts
            .into_iter()
            .map(|c| c as f32 / total as f32)
            .collect()
    }
}

impl Default for ColorHistogramExtractor {
    fn default() -> Self {
        Self::from_config(&ExtractorConfig::default())
    }
}

#[async_trait]
impl FeatureExtractor for ColorHistogramExtractor {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn embed(&self, pixels: &PixelBuffer) -> ExtractorResult<FeatureVector> {
        let values = self.histogram(pixels);
        debug!(dims = values.len(), "computed colour histogram");
        check_embedding(FeatureVector::new(values))
    }

    fn dimension(&self) -> usize {
        self.bins * self.bins * self.bins
    }

    fn info(&self) -> ExtractorInfo {
        ExtractorInfo {
            name: Self::NAME.to_string(),
            dimension: self.dimension(),
        }
    }
}
