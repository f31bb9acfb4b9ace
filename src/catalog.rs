//! Read-only card catalog and the text filter that composes with visual
//! search results.

use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{Card, CardId, RankedResult};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate card id: {0}")]
    DuplicateId(CardId),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Snapshot of the gallery's `cards.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    cards: Vec<Card>,
}

impl Catalog {
    pub fn new(cards: Vec<Card>) -> CatalogResult<Self> {
        let catalog = Self { cards };
        catalog.check_unique_ids()?;
        Ok(catalog)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cards: Vec<Card> = serde_json::from_reader(BufReader::new(file))?;
        debug!(cards = cards.len(), path = %path.display(), "catalog loaded");
        Self::new(cards)
    }

    pub fn from_json_str(s: &str) -> CatalogResult<Self> {
        Self::new(serde_json::from_str(s)?)
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn get(&self, id: &CardId) -> Option<&Card> {
        self.cards.iter().find(|card| &card.id == id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    fn check_unique_ids(&self) -> CatalogResult<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.cards.len());
        for card in &self.cards {
            if !seen.insert(&card.id) {
                return Err(CatalogError::DuplicateId(card.id.clone()));
            }
        }
        Ok(())
    }
}

/// Case-insensitive substring filter on title and workflow tags.
///
/// An empty title term matches every card. A non-empty workflow term
/// matches cards having at least one workflow containing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFilter {
    title: String,
    workflow: String,
}

impl TextFilter {
    pub fn new(title: impl AsRef<str>, workflow: impl AsRef<str>) -> Self {
        Self {
            title: title.as_ref().to_lowercase(),
            workflow: workflow.as_ref().to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.workflow.is_empty()
    }

    pub fn matches(&self, card: &Card) -> bool {
        let title_match = card.title.to_lowercase().contains(&self.title);
        let workflow_match = self.workflow.is_empty()
            || card
                .workflows
                .iter()
                .any(|wf| wf.to_lowercase().contains(&self.workflow));
        title_match && workflow_match
    }

    pub fn apply<'a>(&self, cards: &'a [Card]) -> Vec<&'a Card> {
        cards.iter().filter(|card| self.matches(card)).collect()
    }

    /// Intersects ranked results with the filter, keeping rank order.
    pub fn retain_ranked(&self, mut results: Vec<RankedResult>) -> Vec<RankedResult> {
        results.retain(|result| self.matches(&result.card));
        results
    }

    /// [`retain_ranked`](Self::retain_ranked) followed by truncation to
    /// `limit`. The limit applies to the filtered list, so matches ranked
    /// below non-matching cards are not lost.
    pub fn retain_top(&self, results: Vec<RankedResult>, limit: Option<usize>) -> Vec<RankedResult> {
        let mut kept = self.retain_ranked(results);
        if let Some(limit) = limit {
            kept.truncate(limit);
        }
        kept
    }
}
