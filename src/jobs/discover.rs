use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::ledger::{run_ledgered, JobCounters, JobReport};
use super::politeness_delay;
use crate::config::Politeness;
use crate::models::{JobType, Source};
use crate::scrapers::classify::classify_link;
use crate::scrapers::normalize::{canonicalize_url, listing_id_from_url};
use crate::scrapers::SourceAdapter;
use crate::storage::Store;

#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Category pages walked per category
    pub page_cap: u32,
    /// Stop once this many candidate URLs were accepted
    pub url_cap: Option<usize>,
    pub politeness: Politeness,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverReport {
    /// Distinct condo/apartment URLs seen this run
    pub discovered: u32,
    /// Of those, URLs the queue did not know yet
    pub queued: u32,
    /// Links classified outside the allowed property class
    pub rejected: u32,
    pub pages_fetched: u32,
    pub pages_failed: u32,
}

impl JobReport for DiscoverReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            discovered: self.discovered as i32,
            inserted: self.queued as i32,
            ..Default::default()
        }
    }
}

/// Walk the adapter's category pages and enqueue new condo/apartment URLs.
pub async fn discover<S, A>(store: &S, adapter: &A, options: &DiscoverOptions) -> Result<DiscoverReport>
where
    S: Store + ?Sized,
    A: SourceAdapter + ?Sized,
{
    let source = adapter.source();
    info!("🔎 Discovering {} listings (page cap {})", source, options.page_cap);

    run_ledgered(
        store,
        JobType::Discover,
        Some(source),
        walk_categories(store, adapter, options),
    )
    .await
}

/// Open an adapter with `open` and discover with it, all inside one job run.
///
/// An adapter that cannot be opened (no Chrome, bad client settings) fails
/// the run like any other fatal error. The adapter is dropped, and any
/// browser closed, before the run is finalized.
pub async fn open_and_discover<S, A, O>(
    store: &S,
    source: Source,
    open: O,
    options: &DiscoverOptions,
) -> Result<DiscoverReport>
where
    S: Store + ?Sized,
    A: SourceAdapter,
    O: FnOnce() -> Result<A>,
{
    info!("🔎 Discovering {} listings (page cap {})", source, options.page_cap);

    run_ledgered(store, JobType::Discover, Some(source), async {
        let adapter = open().with_context(|| format!("Failed to open {} adapter", source))?;
        walk_categories(store, &adapter, options).await
    })
    .await
}

async fn walk_categories<S, A>(
    store: &S,
    adapter: &A,
    options: &DiscoverOptions,
) -> Result<DiscoverReport>
where
    S: Store + ?Sized,
    A: SourceAdapter + ?Sized,
{
    let source = adapter.source();
    let mut report = DiscoverReport::default();
    let mut seen = HashSet::new();

    'pages: for (i, page_url) in adapter.category_pages(options.page_cap).iter().enumerate() {
        if i > 0 {
            politeness_delay(options.politeness).await;
        }

        let links = match adapter.fetch_category(page_url).await {
            Ok(links) => {
                report.pages_fetched += 1;
                links
            }
            Err(e) => {
                warn!("Skipping category page {}: {}", page_url, e);
                report.pages_failed += 1;
                continue;
            }
        };

        for link in links {
            let Some(url) = canonicalize_url(&link.href, page_url) else {
                debug!("Ignoring unusable link '{}'", link.href);
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }

            let property_type = classify_link(&link.title, &url);
            if !property_type.is_allowed() {
                debug!("Rejected {} as {}", url, property_type);
                report.rejected += 1;
                continue;
            }

            if options
                .url_cap
                .is_some_and(|cap| report.discovered as usize >= cap)
            {
                info!("Reached URL cap of {}", report.discovered);
                break 'pages;
            }

            report.discovered += 1;
            if store
                .enqueue(source, &url, listing_id_from_url(&url).as_deref())
                .await?
            {
                report.queued += 1;
            }
        }
    }

    info!(
        "✅ {}: {} discovered, {} newly queued, {} rejected, {}/{} pages failed",
        source,
        report.discovered,
        report.queued,
        report.rejected,
        report.pages_failed,
        report.pages_fetched + report.pages_failed
    );

    Ok(report)
}
