//! Visual similarity search over a gallery of image-backed pages.
//!
//! A [`search::SearchOrchestrator`] takes a query image URL and a snapshot of
//! candidate [`types::Card`]s, embeds every image through a
//! [`extractor::FeatureExtractor`], and returns the candidates ordered by
//! cosine distance to the query. Candidates whose image cannot be loaded are
//! dropped from the result rather than failing the search.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod ranker;
pub mod search;
pub mod types;

// Re-exports
pub use error::*;
pub use types::*;
