//! Read-side operations for operators: the summary view, listing patches
//! and per-listing price history.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::models::{JobRun, RentalIndexDaily, RentalListing, RentalSnapshot};
use crate::storage::{ListingPatch, QueueCount, SourceListingCounts, Store};

pub const DEFAULT_RECENT_RUNS: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_listings: i64,
    pub active_listings: i64,
    pub snapshots: i64,
    pub queue: Vec<QueueCount>,
    pub by_source: Vec<SourceListingCounts>,
    pub recent_runs: Vec<JobRun>,
    pub market: Option<MarketOverview>,
}

/// Index rows of the most recently indexed day
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOverview {
    pub date: NaiveDate,
    pub segments: Vec<RentalIndexDaily>,
}

pub async fn summary<S>(store: &S, recent_runs: usize) -> Result<Summary>
where
    S: Store + ?Sized,
{
    let by_source = store.listing_counts().await?;
    let queue = store.queue_counts().await?;
    let snapshots = store.snapshot_count().await?;
    let recent_runs = store.recent_job_runs(recent_runs).await?;

    let market = match store.latest_index_date().await? {
        Some(date) => Some(MarketOverview {
            date,
            segments: store.index_rows(date).await?,
        }),
        None => None,
    };

    Ok(Summary {
        total_listings: by_source.iter().map(|c| c.total).sum(),
        active_listings: by_source.iter().map(|c| c.active).sum(),
        snapshots,
        queue,
        by_source,
        recent_runs,
        market,
    })
}

/// Apply an admin patch; errors if the listing does not exist.
pub async fn patch_listing<S>(store: &S, id: i64, patch: ListingPatch) -> Result<RentalListing>
where
    S: Store + ?Sized,
{
    let listing = store
        .patch_listing(id, patch)
        .await?
        .with_context(|| format!("listing {} not found", id))?;
    info!("✏️ Patched listing {} with {:?}", id, patch);
    Ok(listing)
}

/// A point where a listing's observed price changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTransition {
    pub scraped_at: DateTime<Utc>,
    pub previous_price_usd: Option<f64>,
    pub price_usd: Option<f64>,
}

/// Reduce snapshots (oldest first) to the points where the price changed.
///
/// The first snapshot always counts as a transition from nothing.
pub fn price_transitions(snapshots: &[RentalSnapshot]) -> Vec<PriceTransition> {
    let mut transitions: Vec<PriceTransition> = Vec::new();
    let mut previous: Option<Option<f64>> = None;

    for snapshot in snapshots {
        let price = snapshot.price_monthly_usd;
        if previous != Some(price) {
            transitions.push(PriceTransition {
                scraped_at: snapshot.scraped_at,
                previous_price_usd: previous.flatten(),
                price_usd: price,
            });
        }
        previous = Some(price);
    }

    transitions
}

pub async fn price_history<S>(store: &S, listing_id: i64) -> Result<Vec<PriceTransition>>
where
    S: Store + ?Sized,
{
    store
        .get_listing(listing_id)
        .await?
        .with_context(|| format!("listing {} not found", listing_id))?;

    let snapshots = store.snapshots_for(listing_id).await?;
    Ok(price_transitions(&snapshots))
}
