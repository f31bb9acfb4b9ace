use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::extractor::ExtractorError;
use crate::search::SearchError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Search error: {0}")]
    Search(#[from] SearchError),
    #[error("Extractor error: {0}")]
    Extractor(#[from] ExtractorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LensResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
