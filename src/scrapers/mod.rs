pub mod browser;
pub mod classify;
pub mod http;
pub mod khmer24;
pub mod normalize;
pub mod realestate;
pub mod traits;
pub mod types;

pub use browser::BrowserSession;
pub use http::HttpFetcher;
pub use khmer24::Khmer24Adapter;
pub use realestate::RealestateKhAdapter;
pub use traits::SourceAdapter;
pub use types::{ListingLink, ScrapeError};

use crate::config::FetchSettings;
use crate::models::{ParsedListing, Source};
use anyhow::Result;
use async_trait::async_trait;

/// The closed set of source adapters, one variant per `Source`.
pub enum Adapter {
    RealestateKh(RealestateKhAdapter),
    Khmer24(Khmer24Adapter),
}

impl Adapter {
    /// Build the adapter for `source`.
    ///
    /// Browser-backed sources launch Chrome here; the browser lives as long
    /// as the returned adapter and shuts down when it is dropped.
    pub fn open(source: Source, settings: &FetchSettings) -> Result<Self> {
        Ok(match source {
            Source::RealestateKh => {
                let fetcher = HttpFetcher::new(&settings.user_agent, settings.request_timeout)?;
                Adapter::RealestateKh(RealestateKhAdapter::new(fetcher))
            }
            Source::Khmer24 => {
                let session =
                    BrowserSession::launch(settings.browser_headless, settings.request_timeout)?;
                Adapter::Khmer24(Khmer24Adapter::new(session))
            }
        })
    }
}

#[async_trait]
impl SourceAdapter for Adapter {
    fn source(&self) -> Source {
        match self {
            Adapter::RealestateKh(a) => a.source(),
            Adapter::Khmer24(a) => a.source(),
        }
    }

    fn category_pages(&self, page_cap: u32) -> Vec<String> {
        match self {
            Adapter::RealestateKh(a) => a.category_pages(page_cap),
            Adapter::Khmer24(a) => a.category_pages(page_cap),
        }
    }

    async fn fetch_category(&self, url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        match self {
            Adapter::RealestateKh(a) => a.fetch_category(url).await,
            Adapter::Khmer24(a) => a.fetch_category(url).await,
        }
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        match self {
            Adapter::RealestateKh(a) => a.fetch_listing(url).await,
            Adapter::Khmer24(a) => a.fetch_listing(url).await,
        }
    }
}
