use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ledger::{run_ledgered, JobCounters, JobReport};
use super::politeness_delay;
use crate::config::Politeness;
use crate::models::{JobType, QueueEvent, QueueStatus, ScrapeQueueEntry, Source};
use crate::scrapers::normalize::{check_monthly_price, PriceCheck};
use crate::scrapers::{ScrapeError, SourceAdapter};
use crate::storage::Store;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub batch_size: usize,
    /// Detail fetches in flight at once
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub politeness: Politeness,
    pub max_monthly_price_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    /// Entries moved to `DONE`, rejections included
    pub processed: u32,
    pub inserted: u32,
    pub updated: u32,
    pub failed: u32,
    /// Of the failures, timeouts and network or status errors worth a reset
    pub transient_failures: u32,
    /// Detail pages outside the condo/apartment class
    pub rejected: u32,
    /// Prices above the ceiling that were stored as null
    pub price_nulled: u32,
    /// Entries another run moved out of `PENDING` first
    pub skipped: u32,
}

impl JobReport for ProcessReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            processed: self.processed as i32,
            inserted: self.inserted as i32,
            updated: self.updated as i32,
            ..Default::default()
        }
    }
}

enum ItemOutcome {
    Stored { inserted: bool, price_nulled: bool },
    Rejected,
    Failed { transient: bool },
    Skipped,
}

/// Drain up to `batch_size` pending entries of the adapter's source.
pub async fn process_queue<S, A>(
    store: &S,
    adapter: &A,
    options: &ProcessOptions,
) -> Result<ProcessReport>
where
    S: Store + ?Sized,
    A: SourceAdapter + ?Sized,
{
    let source = adapter.source();
    info!(
        "⚙️ Processing up to {} {} queue entries ({} at a time)",
        options.batch_size, source, options.concurrency
    );

    run_ledgered(
        store,
        JobType::ProcessQueue,
        Some(source),
        drain_batch(store, adapter, options),
    )
    .await
}

/// Open an adapter with `open` and drain a batch with it, all inside one job
/// run. An open failure is recorded as a failed run.
pub async fn open_and_process<S, A, O>(
    store: &S,
    source: Source,
    open: O,
    options: &ProcessOptions,
) -> Result<ProcessReport>
where
    S: Store + ?Sized,
    A: SourceAdapter,
    O: FnOnce() -> Result<A>,
{
    info!(
        "⚙️ Processing up to {} {} queue entries ({} at a time)",
        options.batch_size, source, options.concurrency
    );

    run_ledgered(store, JobType::ProcessQueue, Some(source), async {
        let adapter = open().with_context(|| format!("Failed to open {} adapter", source))?;
        drain_batch(store, &adapter, options).await
    })
    .await
}

async fn drain_batch<S, A>(store: &S, adapter: &A, options: &ProcessOptions) -> Result<ProcessReport>
where
    S: Store + ?Sized,
    A: SourceAdapter + ?Sized,
{
    let entries = store
        .pending_entries(adapter.source(), options.batch_size)
        .await?;
    info!("Found {} pending entries", entries.len());

    let mut report = ProcessReport::default();
    let mut results = stream::iter(entries)
        .map(|entry| process_entry(store, adapter, entry, options))
        .buffer_unordered(options.concurrency.max(1));

    // A store error ends the run; entries already committed stay committed
    while let Some(outcome) = results.next().await {
        match outcome? {
            ItemOutcome::Stored {
                inserted,
                price_nulled,
            } => {
                report.processed += 1;
                if inserted {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
                if price_nulled {
                    report.price_nulled += 1;
                }
            }
            ItemOutcome::Rejected => {
                report.processed += 1;
                report.rejected += 1;
            }
            ItemOutcome::Failed { transient } => {
                report.failed += 1;
                if transient {
                    report.transient_failures += 1;
                }
            }
            ItemOutcome::Skipped => report.skipped += 1,
        }
    }

    info!(
        "✅ Processed {} ({} new, {} updated), {} failed ({} transient), {} rejected",
        report.processed,
        report.inserted,
        report.updated,
        report.failed,
        report.transient_failures,
        report.rejected
    );

    Ok(report)
}

async fn process_entry<S, A>(
    store: &S,
    adapter: &A,
    entry: ScrapeQueueEntry,
    options: &ProcessOptions,
) -> Result<ItemOutcome>
where
    S: Store + ?Sized,
    A: SourceAdapter + ?Sized,
{
    politeness_delay(options.politeness).await;

    let fetched = tokio::time::timeout(
        options.fetch_timeout,
        adapter.fetch_listing(&entry.canonical_url),
    )
    .await
    .unwrap_or(Err(ScrapeError::Timeout(options.fetch_timeout)));

    let mut listing = match fetched {
        Ok(listing) => listing,
        Err(e) => {
            warn!("❌ {} failed: {}", entry.canonical_url, e);
            let moved = store
                .transition_entry(
                    entry.id,
                    QueueStatus::Pending,
                    QueueEvent::Failed,
                    Some(&e.to_string()),
                )
                .await?;
            return Ok(if moved {
                ItemOutcome::Failed {
                    transient: e.is_transient(),
                }
            } else {
                ItemOutcome::Skipped
            });
        }
    };

    if !listing.property_type.is_allowed() {
        debug!(
            "Rejected {} as {}",
            entry.canonical_url, listing.property_type
        );
        let moved = store
            .transition_entry(entry.id, QueueStatus::Pending, QueueEvent::Processed, None)
            .await?;
        return Ok(if moved {
            ItemOutcome::Rejected
        } else {
            ItemOutcome::Skipped
        });
    }

    // The queue key is the listing identity
    listing.canonical_url = entry.canonical_url.clone();
    if listing.source_listing_id.is_none() {
        listing.source_listing_id = entry.source_listing_id.clone();
    }

    let check = check_monthly_price(listing.price_monthly_usd, options.max_monthly_price_usd);
    if let PriceCheck::Nulled(price) = check {
        warn!(
            "Nulling price ${} on {}: above the monthly ceiling",
            price, entry.canonical_url
        );
    }
    listing.price_monthly_usd = check.value();

    let seen_at = Utc::now();
    let upserted = store
        .upsert_listing(entry.source, &listing, seen_at)
        .await?;
    store
        .append_snapshot(
            upserted.listing_id,
            seen_at,
            listing.price_monthly_usd,
            listing.location.district.as_deref(),
            listing.location.city.as_deref(),
        )
        .await?;

    let moved = store
        .transition_entry(entry.id, QueueStatus::Pending, QueueEvent::Processed, None)
        .await?;
    if !moved {
        debug!("{} was already moved out of PENDING", entry.canonical_url);
    }

    debug!(
        "Stored {} as listing {} ({})",
        entry.canonical_url,
        upserted.listing_id,
        if upserted.inserted { "new" } else { "updated" }
    );

    Ok(ItemOutcome::Stored {
        inserted: upserted.inserted,
        price_nulled: matches!(check, PriceCheck::Nulled(_)),
    })
}

