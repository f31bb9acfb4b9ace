//! # Search Orchestrator
//!
//! Coordinates one visual search: embed the query image, fan out over the
//! candidates (through the embedding cache), then rank the survivors.
//!
//! ## Phases
//!
//! ```text
//! Idle -> LoadingQuery -> EmbeddingCandidates -> Ranking -> Done
//!                     \-> Failed (query image unavailable, contract violation)
//! ```
//!
//! ## Last request wins
//!
//! Every request carries a [`RequestId`]. Starting a search with a higher id
//! supersedes all lower ones: they stop at their next phase boundary and
//! return [`SearchError::Cancelled`], and they can never overwrite the
//! [`SearchView`] published for the newer request. In-flight fetches of a
//! superseded search are not aborted; their results are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::EmbeddingCache;
use crate::config::{LensConfig, SearchConfig};
use crate::extractor::{check_embedding, ExtractorError, SharedExtractor};
use crate::loader::{ImageError, ImageLoader};
use crate::ranker::{self, SimilarityError};
use crate::types::{
    Card, FeatureVector, OmittedCandidate, RequestId, SearchReport, SearchRequest,
};

/// Why a single image could not be turned into a feature vector
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbedError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Query image unavailable: {source}")]
    QueryImageUnavailable {
        url: String,
        #[source]
        source: EmbedError,
    },
    #[error("Embedding contract violated: {0}")]
    DimensionMismatch(#[from] SimilarityError),
    #[error("Search {request_id} superseded by {superseded_by}")]
    Cancelled {
        request_id: RequestId,
        superseded_by: RequestId,
    },
}

impl SearchError {
    /// Superseded searches are discarded silently.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SearchError::Cancelled { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::QueryImageUnavailable { .. })
    }
}

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Idle,
    LoadingQuery,
    EmbeddingCandidates,
    Ranking,
    Done,
    Failed,
}

/// The caller-visible state, owned by the most recent request
#[derive(Debug, Clone, Default)]
pub struct SearchView {
    pub request_id: RequestId,
    pub phase: SearchPhase,
    pub report: Option<Arc<SearchReport>>,
    pub error: Option<String>,
}

pub struct SearchOrchestrator {
    loader: Arc<dyn ImageLoader>,
    extractor: SharedExtractor,
    cache: Option<Arc<EmbeddingCache>>,
    config: SearchConfig,
    latest: AtomicU64,
    issued: AtomicU64,
    view: watch::Sender<SearchView>,
}

impl SearchOrchestrator {
    pub fn new(loader: Arc<dyn ImageLoader>, extractor: SharedExtractor, config: &LensConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(EmbeddingCache::from_config(&config.cache)));
        let (view, _) = watch::channel(SearchView::default());
        Self {
            loader,
            extractor,
            cache,
            config: config.search.clone(),
            latest: AtomicU64::new(0),
            issued: AtomicU64::new(0),
            view,
        }
    }

    /// Shares an existing cache, e.g. between orchestrators of one process.
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.cache.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> SearchView {
        self.view.borrow().clone()
    }

    /// Id greater than every id handed out or searched so far
    pub fn next_request_id(&self) -> RequestId {
        self.issued
            .fetch_max(self.latest.load(Ordering::SeqCst), Ordering::SeqCst);
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Hook for the catalog when a card's image changes
    pub fn invalidate(&self, image_url: &str) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|cache| cache.invalidate(image_url))
    }

    /// Ranks `request.candidates` by visual distance to the query image.
    ///
    /// Candidates whose image cannot be loaded or embedded are left out of
    /// the results and listed in [`SearchReport::omitted`].
    ///
    /// # Errors
    ///
    /// * `SearchError::QueryImageUnavailable` - the query image failed to load or embed
    /// * `SearchError::DimensionMismatch` - the extractor produced vectors of differing lengths
    /// * `SearchError::Cancelled` - a request with a higher id started meanwhile
    #[tracing::instrument(
        skip(self, request),
        fields(request_id = request.request_id, candidates = request.candidates.len())
    )]
    pub async fn search(&self, request: SearchRequest) -> SearchResult<SearchReport> {
        let started = Instant::now();
        let request_id = request.request_id;

        let previous = self.latest.fetch_max(request_id, Ordering::SeqCst);
        if previous > request_id {
            return Err(SearchError::Cancelled {
                request_id,
                superseded_by: previous,
            });
        }

        self.publish(request_id, SearchPhase::LoadingQuery, None, None);
        let query = match self.embed_uncached(&request.query_image_url).await {
            Ok(query) => query,
            Err(source) => {
                warn!(url = %request.query_image_url, error = %source, "query image unavailable");
                return Err(self.fail(
                    request_id,
                    SearchError::QueryImageUnavailable {
                        url: request.query_image_url,
                        source,
                    },
                ));
            }
        };
        self.ensure_current(request_id)?;

        self.publish(request_id, SearchPhase::EmbeddingCandidates, None, None);
        let (embedded, omitted) = self.embed_candidates(request.candidates).await;
        self.ensure_current(request_id)?;

        self.publish(request_id, SearchPhase::Ranking, None, None);
        let results = match ranker::rank_top(&query, embedded, self.config.max_results) {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "extractor produced vectors of differing dimensions");
                return Err(self.fail(request_id, SearchError::from(e)));
            }
        };

        let report = SearchReport {
            request_id,
            results,
            omitted,
            elapsed: started.elapsed(),
        };
        if !self.publish(
            request_id,
            SearchPhase::Done,
            Some(Arc::new(report.clone())),
            None,
        ) {
            return Err(self.superseded(request_id));
        }

        info!(
            ranked = report.results.len(),
            omitted = report.omitted.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "search completed"
        );
        Ok(report)
    }

    async fn embed_candidates(
        &self,
        candidates: Vec<Card>,
    ) -> (Vec<(Card, FeatureVector)>, Vec<OmittedCandidate>) {
        let mut outcomes = stream::iter(candidates.into_iter().enumerate())
            .map(|(index, card)| async move {
                let result = self.embed_cached(&card.image_url).await;
                (index, card, result)
            })
            .buffer_unordered(self.config.max_concurrent_loads.max(1))
            .collect::<Vec<_>>()
            .await;
        // back to input order, which the stable ranking relies on for ties
        outcomes.sort_unstable_by_key(|(index, _, _)| *index);

        let mut embedded = Vec::with_capacity(outcomes.len());
        let mut omitted = Vec::new();
        for (_, card, result) in outcomes {
            match result {
                Ok(vector) => embedded.push((card, vector)),
                Err(e) => {
                    warn!(card_id = %card.id, url = %card.image_url, error = %e, "candidate dropped");
                    omitted.push(OmittedCandidate {
                        card_id: card.id,
                        image_url: card.image_url,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (embedded, omitted)
    }

    async fn embed_cached(&self, url: &str) -> Result<FeatureVector, EmbedError> {
        match &self.cache {
            Some(cache) => cache.get_or_compute(url, || self.embed_uncached(url)).await,
            None => self.embed_uncached(url).await,
        }
    }

    async fn embed_uncached(&self, url: &str) -> Result<FeatureVector, EmbedError> {
        let pixels = self.loader.load(url).await?;
        let vector = self.extractor.embed(&pixels).await?;
        Ok(check_embedding(vector)?)
    }

    /// Publishes `err` as the visible failure, unless a newer request took
    /// over, in which case the caller gets `Cancelled` instead.
    fn fail(&self, request_id: RequestId, err: SearchError) -> SearchError {
        if let Err(cancelled) = self.ensure_current(request_id) {
            return cancelled;
        }
        self.publish(request_id, SearchPhase::Failed, None, Some(err.to_string()));
        err
    }

    fn ensure_current(&self, request_id: RequestId) -> SearchResult<()> {
        if self.latest.load(Ordering::SeqCst) > request_id {
            return Err(self.superseded(request_id));
        }
        Ok(())
    }

    fn superseded(&self, request_id: RequestId) -> SearchError {
        let superseded_by = self.latest.load(Ordering::SeqCst);
        debug!(request_id, superseded_by, "search superseded, discarding");
        SearchError::Cancelled {
            request_id,
            superseded_by,
        }
    }

    /// Publishes only while `request_id` is the latest request and never
    /// moves the view back to an older request.
    fn publish(
        &self,
        request_id: RequestId,
        phase: SearchPhase,
        report: Option<Arc<SearchReport>>,
        error: Option<String>,
    ) -> bool {
        self.view.send_if_modified(|view| {
            if request_id != self.latest.load(Ordering::SeqCst) || request_id < view.request_id {
                return false;
            }
            *view = SearchView {
                request_id,
                phase,
                report,
                error,
            };
            true
        })
    }
}
