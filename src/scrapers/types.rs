use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A candidate detail-page link found on a category page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingLink {
    /// Link target as it appeared on the page (may be relative)
    pub href: String,
    /// Card title or anchor text, used for classification
    pub title: String,
}

/// Item-level failure while fetching or parsing a page.
///
/// None of these abort a job: the affected queue entry is marked failed and
/// the job moves on.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("browser error: {0}")]
    Browser(String),
}

impl ScrapeError {
    pub fn parse(url: &str, reason: impl Into<String>) -> Self {
        ScrapeError::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Timeouts, bad statuses and network errors may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Timeout(_) | ScrapeError::Status { .. } | ScrapeError::Network(_)
        )
    }
}
