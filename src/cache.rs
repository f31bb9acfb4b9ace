//! Embedding cache with single-flight computation.
//!
//! Each image URL owns one slot, inserted atomically on first request. The
//! slot is a [`OnceCell`], so concurrent callers for the same uncached URL
//! queue behind a single `compute` call and share its result. A failed
//! computation removes its slot, so the next caller retries and broken URLs
//! do not accumulate.
//!
//! # Example
//!
//! ```no_run
//! use pagelens::cache::EmbeddingCache;
//! use pagelens::FeatureVector;
//!
//! # async fn example() -> Result<(), std::convert::Infallible> {
//! let cache = EmbeddingCache::new(Some(1024));
//! let vector = cache
//!     .get_or_compute("https://example.com/a.png", || async {
//!         Ok::<_, std::convert::Infallible>(FeatureVector::new(vec![1.0, 0.0]))
//!     })
//!     .await?;
//! assert_eq!(vector.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::CacheConfig;
use crate::types::{CacheEntry, FeatureVector};

type Slot = Arc<OnceCell<CacheEntry>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct EmbeddingCache {
    slots: DashMap<String, Slot>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Returns the cached vector for `url`, running `compute` only when no
    /// entry exists and no other caller is already computing it.
    ///
    /// An [`invalidate`](Self::invalidate) that races with an in-flight
    /// computation detaches that computation: its waiters still receive the
    /// result, but it is not stored.
    #[tracing::instrument(level = "debug", skip(self, compute))]
    pub async fn get_or_compute<F, Fut, E>(&self, url: &str, compute: F) -> Result<FeatureVector, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FeatureVector, E>>,
    {
        let slot = self.slot(url);
        if let Some(entry) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.vector.clone());
        }

        let ran = AtomicBool::new(false);
        let result = slot
            .get_or_try_init(|| async {
                ran.store(true, Ordering::Relaxed);
                let vector = compute().await?;
                Ok::<_, E>(CacheEntry {
                    image_url: url.to_string(),
                    vector,
                    computed_at: Utc::now(),
                })
            })
            .await;
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                self.release_failed(url, &slot);
                return Err(e);
            }
        };

        if ran.load(Ordering::Relaxed) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("embedding computed");
            let vector = entry.vector.clone();
            self.evict_overflow(url);
            Ok(vector)
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(entry.vector.clone())
        }
    }

    pub fn get(&self, url: &str) -> Option<FeatureVector> {
        self.entry(url).map(|entry| entry.vector)
    }

    pub fn entry(&self, url: &str) -> Option<CacheEntry> {
        self.slots
            .get(url)
            .and_then(|slot| slot.value().get().cloned())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entry(url).is_some()
    }

    /// Drops the entry for `url`. Returns whether a computed entry existed.
    pub fn invalidate(&self, url: &str) -> bool {
        let removed = self
            .slots
            .remove(url)
            .is_some_and(|(_, slot)| slot.initialized());
        if removed {
            debug!(url, "embedding invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of computed entries
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn slot(&self, url: &str) -> Slot {
        self.slots
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drops the empty slot left by a failed computation. A slot that was
    /// replaced meanwhile, or filled by a retrying waiter, stays.
    fn release_failed(&self, url: &str, slot: &Slot) {
        self.slots
            .remove_if(url, |_, current| Arc::ptr_eq(current, slot) && !current.initialized());
    }

    /// Removes the oldest computed entries, never `keep`, until the cache is
    /// within `max_entries`.
    fn evict_overflow(&self, keep: &str) {
        let Some(max_entries) = self.max_entries else {
            return;
        };
        loop {
            let mut count = 0;
            let mut oldest: Option<(String, DateTime<Utc>)> = None;
            for slot in self.slots.iter() {
                let Some(entry) = slot.value().get() else {
                    continue;
                };
                count += 1;
                if slot.key() == keep {
                    continue;
                }
                if oldest
                    .as_ref()
                    .map_or(true, |(_, at)| entry.computed_at < *at)
                {
                    oldest = Some((slot.key().clone(), entry.computed_at));
                }
            }
            if count <= max_entries {
                return;
            }
            match oldest {
                Some((url, _)) => {
                    debug!(url = %url, "evicting embedding");
                    self.slots.remove(&url);
                }
                None => return,
            }
        }
    }
}
