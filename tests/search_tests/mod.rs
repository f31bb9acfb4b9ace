//! Orchestrator scenarios driven by scripted loaders.

mod partial_failure_test;
mod ranking_proptest;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pagelens::{
    config::LensConfig,
    extractor::{ExtractorInfo, ExtractorResult, FeatureExtractor},
    loader::{ImageError, ImageLoader, ImageResult},
    search::SearchOrchestrator,
    FeatureVector, PixelBuffer,
};

/// Loader serving solid-colour images from a table, with optional per-url
/// latency bounded by a fetch timeout.
pub struct ScriptedLoader {
    images: HashMap<String, u8>,
    delays: HashMap<String, Duration>,
    timeout: Duration,
    loads: Mutex<HashMap<String, usize>>,
}

impl ScriptedLoader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            images: HashMap::new(),
            delays: HashMap::new(),
            timeout,
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Serves `url` as an image whose red channel is `tag`.
    pub fn image(mut self, url: &str, tag: u8) -> Self {
        self.images.insert(url.to_string(), tag);
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn load_count(&self, url: &str) -> usize {
        self.loads.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ImageLoader for ScriptedLoader {
    async fn load(&self, url: &str) -> ImageResult<PixelBuffer> {
        *self.loads.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let delay = self.delays.get(url).copied().unwrap_or_default();
        tokio::time::timeout(self.timeout, tokio::time::sleep(delay))
            .await
            .map_err(|_| ImageError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            })?;

        match self.images.get(url) {
            Some(tag) => Ok(PixelBuffer::filled(2, 2, [*tag, 0, 0])),
            None => Err(ImageError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Extractor returning a fixed vector per red-channel tag
pub struct TableExtractor {
    vectors: HashMap<u8, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableExtractor {
    pub fn new(entries: Vec<(u8, Vec<f32>)>) -> Self {
        Self {
            vectors: entries.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureExtractor for TableExtractor {
    async fn embed(&self, pixels: &PixelBuffer) -> ExtractorResult<FeatureVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = pixels.pixel(0, 0)[0];
        Ok(FeatureVector::new(
            self.vectors.get(&tag).cloned().unwrap_or_else(|| vec![0.0, 0.0]),
        ))
    }

    fn dimension(&self) -> usize {
        2
    }

    fn info(&self) -> ExtractorInfo {
        ExtractorInfo {
            name: "table".to_string(),
            dimension: 2,
        }
    }
}

pub fn standard_extractor() -> Arc<TableExtractor> {
    Arc::new(TableExtractor::new(vec![
        (b'q', vec![1.0, 0.0]),
        (b'a', vec![1.0, 0.0]),
        (b'b', vec![0.0, 1.0]),
        (b'c', vec![-1.0, 0.0]),
    ]))
}

pub fn orchestrator(
    loader: Arc<ScriptedLoader>,
    extractor: Arc<TableExtractor>,
) -> Arc<SearchOrchestrator> {
    Arc::new(SearchOrchestrator::new(
        loader,
        extractor,
        &LensConfig::default(),
    ))
}
