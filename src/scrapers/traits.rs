use crate::models::{ParsedListing, Source};
use crate::scrapers::types::{ListingLink, ScrapeError};
use async_trait::async_trait;

/// Common trait for all listing sources.
///
/// Every implementation returns the same normalized `ParsedListing` shape,
/// whether it fetches over plain HTTP or drives a headless browser.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source this adapter scrapes
    fn source(&self) -> Source;

    /// Category index page URLs to walk, up to `page_cap` pages per category
    fn category_pages(&self, page_cap: u32) -> Vec<String>;

    /// Fetch one category page and extract its listing links
    async fn fetch_category(&self, url: &str) -> Result<Vec<ListingLink>, ScrapeError>;

    /// Fetch and parse a single listing detail page
    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError>;
}
