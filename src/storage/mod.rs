//! Persistence for the pipeline.
//!
//! Jobs only talk to the [`Store`] trait. [`PgStore`] is the production
//! backend; [`MemoryStore`] implements the same semantics in process for
//! tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{
    IndexSample, JobRun, ParsedListing, QueueEvent, QueueStatus, RentalIndexDaily, RentalListing,
    RentalSnapshot, ScrapeQueueEntry, Source, UpsertOutcome,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Admin edits to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingPatch {
    /// Force active and pin it there
    Activate,
    /// Force inactive and pin it there
    Deactivate,
    /// Drop the manual override; staleness manages the listing again
    Pass,
    /// Reclassify
    PropertyType(crate::models::PropertyType),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StaleCounts {
    pub deactivated: u64,
    pub already_inactive: u64,
}

/// A listing touched by the price-anomaly repair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalousListing {
    pub listing_id: i64,
    pub source: Source,
    pub canonical_url: String,
    /// Current price, when it is itself above the ceiling
    pub price_monthly_usd: Option<f64>,
    /// Number of its snapshots above the ceiling
    pub bad_snapshots: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairCounts {
    pub listings_nulled: u64,
    pub snapshots_nulled: u64,
    pub queue_entries_reset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceListingCounts {
    pub source: Source,
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueCount {
    pub source: Source,
    pub status: QueueStatus,
    pub count: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- scrape queue ---

    /// Insert a queue entry unless `(source, canonical_url)` is already known.
    /// Returns `true` when a new entry was created.
    async fn enqueue(
        &self,
        source: Source,
        canonical_url: &str,
        source_listing_id: Option<&str>,
    ) -> Result<bool>;

    /// Oldest `PENDING` entries of a source
    async fn pending_entries(&self, source: Source, limit: usize) -> Result<Vec<ScrapeQueueEntry>>;

    /// Apply `event` to the entry if it is still in `from`.
    ///
    /// Returns `false` when the entry was no longer in `from` (another run got
    /// there first). A `Failed` event increments `retry_count`; `error` is
    /// stored as `last_error`.
    async fn transition_entry(
        &self,
        id: i64,
        from: QueueStatus,
        event: QueueEvent,
        error: Option<&str>,
    ) -> Result<bool>;

    async fn queue_entry(&self, source: Source, canonical_url: &str)
        -> Result<Option<ScrapeQueueEntry>>;

    /// Maintenance reset of every `FAILED` entry of a source back to `PENDING`
    async fn reset_failed(&self, source: Source) -> Result<u64>;

    async fn queue_counts(&self) -> Result<Vec<QueueCount>>;

    // --- listings and snapshots ---

    /// Insert a new listing or refresh the mutable fields of a known one.
    ///
    /// `first_seen_at` is only written on insert; `last_seen_at` never moves
    /// backwards. A re-seen listing is reactivated unless it carries a manual
    /// override, which also protects its property type.
    async fn upsert_listing(
        &self,
        source: Source,
        listing: &ParsedListing,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    async fn append_snapshot(
        &self,
        listing_id: i64,
        scraped_at: DateTime<Utc>,
        price_monthly_usd: Option<f64>,
        district: Option<&str>,
        city: Option<&str>,
    ) -> Result<()>;

    async fn get_listing(&self, id: i64) -> Result<Option<RentalListing>>;

    async fn patch_listing(&self, id: i64, patch: ListingPatch) -> Result<Option<RentalListing>>;

    /// Snapshots of a listing, oldest first
    async fn snapshots_for(&self, listing_id: i64) -> Result<Vec<RentalSnapshot>>;

    async fn listing_counts(&self) -> Result<Vec<SourceListingCounts>>;

    async fn snapshot_count(&self) -> Result<i64>;

    // --- index ---

    /// Listings active as of `as_of` with the price observed before it.
    ///
    /// Only condo/apartment listings with a known district and bedroom count
    /// qualify. The price is the latest non-null snapshot price scraped
    /// before `as_of`, else the listing's current price; listings with
    /// neither are left out.
    async fn index_samples(&self, as_of: DateTime<Utc>) -> Result<Vec<IndexSample>>;

    /// Atomically replace every index row of `date` with `rows`
    async fn replace_index(&self, date: NaiveDate, rows: &[RentalIndexDaily]) -> Result<()>;

    async fn index_rows(&self, date: NaiveDate) -> Result<Vec<RentalIndexDaily>>;

    async fn latest_index_date(&self) -> Result<Option<NaiveDate>>;

    // --- staleness ---

    /// Deactivate active, non-overridden listings last seen before `cutoff`
    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleCounts>;

    // --- price repair ---

    async fn price_anomalies(&self, ceiling: f64) -> Result<Vec<AnomalousListing>>;

    /// Null out prices above `ceiling` on listings and snapshots and reset the
    /// affected queue entries to `PENDING`, in one transaction
    async fn repair_price_anomalies(&self, ceiling: f64) -> Result<RepairCounts>;

    // --- job run ledger ---

    /// Insert a job run before its work starts; the store assigns the id
    async fn start_job_run(&self, run: &JobRun) -> Result<i64>;

    /// Write the outcome of a `RUNNING` job run.
    ///
    /// Returns `false` if the run does not exist or was already finalized;
    /// a finalized run is never changed again.
    async fn finish_job_run(&self, run: &JobRun) -> Result<bool>;

    /// Most recent job runs first
    async fn recent_job_runs(&self, limit: usize) -> Result<Vec<JobRun>>;
}
