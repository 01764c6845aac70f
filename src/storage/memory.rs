//! In-process store with the same semantics as the Postgres backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{
    AnomalousListing, ListingPatch, QueueCount, RepairCounts, SourceListingCounts, StaleCounts,
    Store,
};
use crate::models::{
    IndexSample, JobRun, JobStatus, ParsedListing, QueueEvent, QueueStatus, RentalIndexDaily,
    RentalListing, RentalSnapshot, ScrapeQueueEntry, Source, UpsertOutcome,
};

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    queue: Vec<ScrapeQueueEntry>,
    listings: BTreeMap<i64, RentalListing>,
    snapshots: Vec<RentalSnapshot>,
    index: Vec<RentalIndexDaily>,
    job_runs: Vec<JobRun>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn anomalies(&self, ceiling: f64) -> Vec<AnomalousListing> {
        self.listings
            .values()
            .filter_map(|listing| {
                let price_monthly_usd = listing.price_monthly_usd.filter(|p| *p > ceiling);
                let bad_snapshots = self
                    .snapshots
                    .iter()
                    .filter(|s| s.listing_id == listing.id)
                    .filter(|s| s.price_monthly_usd.is_some_and(|p| p > ceiling))
                    .count() as i64;

                (price_monthly_usd.is_some() || bad_snapshots > 0).then(|| AnomalousListing {
                    listing_id: listing.id,
                    source: listing.source,
                    canonical_url: listing.canonical_url.clone(),
                    price_monthly_usd,
                    bad_snapshots,
                })
            })
            .collect()
    }
}

/// Store backed by a mutex-guarded set of collections
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn enqueue(
        &self,
        source: Source,
        canonical_url: &str,
        source_listing_id: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;

        let known = state
            .queue
            .iter()
            .any(|e| e.source == source && e.canonical_url == canonical_url);
        if known {
            return Ok(false);
        }

        let now = Utc::now();
        let id = state.next_id();
        state.queue.push(ScrapeQueueEntry {
            id,
            source,
            canonical_url: canonical_url.to_string(),
            source_listing_id: source_listing_id.map(str::to_string),
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }

    async fn pending_entries(&self, source: Source, limit: usize) -> Result<Vec<ScrapeQueueEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .queue
            .iter()
            .filter(|e| e.source == source && e.status == QueueStatus::Pending)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn transition_entry(
        &self,
        id: i64,
        from: QueueStatus,
        event: QueueEvent,
        error: Option<&str>,
    ) -> Result<bool> {
        let to = from.next(event)?;
        let mut state = self.state.lock().await;

        let Some(entry) = state.queue.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if entry.status != from {
            return Ok(false);
        }

        entry.status = to;
        if event == QueueEvent::Failed {
            entry.retry_count += 1;
        }
        entry.last_error = error.map(str::to_string);
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn queue_entry(
        &self,
        source: Source,
        canonical_url: &str,
    ) -> Result<Option<ScrapeQueueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .queue
            .iter()
            .find(|e| e.source == source && e.canonical_url == canonical_url)
            .cloned())
    }

    async fn reset_failed(&self, source: Source) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut reset = 0;

        for entry in state
            .queue
            .iter_mut()
            .filter(|e| e.source == source && e.status == QueueStatus::Failed)
        {
            entry.status = entry.status.next(QueueEvent::MaintenanceReset)?;
            entry.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn queue_counts(&self) -> Result<Vec<QueueCount>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<(Source, QueueStatus), i64> = HashMap::new();
        for entry in &state.queue {
            *counts.entry((entry.source, entry.status)).or_default() += 1;
        }

        let mut counts: Vec<_> = counts
            .into_iter()
            .map(|((source, status), count)| QueueCount {
                source,
                status,
                count,
            })
            .collect();
        counts.sort_by_key(|c| (c.source, c.status.to_string()));
        Ok(counts)
    }

    async fn upsert_listing(
        &self,
        source: Source,
        listing: &ParsedListing,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .listings
            .values_mut()
            .find(|l| l.source == source && l.canonical_url == listing.canonical_url)
        {
            existing.source_listing_id = listing
                .source_listing_id
                .clone()
                .or(existing.source_listing_id.take());
            existing.title = listing.title.clone();
            existing.city = listing.location.city.clone();
            existing.district = listing.location.district.clone();
            existing.bedrooms = listing.bedrooms;
            existing.bathrooms = listing.bathrooms;
            existing.size_sqm = listing.size_sqm;
            existing.price_monthly_usd = listing.price_monthly_usd;
            existing.amenities = listing.amenities.clone();
            existing.image_urls = listing.image_urls.clone();
            existing.latitude = listing.location.latitude;
            existing.longitude = listing.location.longitude;
            existing.posted_at = listing.posted_at.or(existing.posted_at);
            existing.last_seen_at = existing.last_seen_at.max(seen_at);
            if !existing.manual_override {
                existing.is_active = true;
                existing.property_type = listing.property_type;
            }

            return Ok(UpsertOutcome {
                listing_id: existing.id,
                inserted: false,
            });
        }

        let id = state.next_id();
        state.listings.insert(
            id,
            RentalListing {
                id,
                source,
                canonical_url: listing.canonical_url.clone(),
                source_listing_id: listing.source_listing_id.clone(),
                title: listing.title.clone(),
                property_type: listing.property_type,
                city: listing.location.city.clone(),
                district: listing.location.district.clone(),
                bedrooms: listing.bedrooms,
                bathrooms: listing.bathrooms,
                size_sqm: listing.size_sqm,
                price_monthly_usd: listing.price_monthly_usd,
                amenities: listing.amenities.clone(),
                image_urls: listing.image_urls.clone(),
                latitude: listing.location.latitude,
                longitude: listing.location.longitude,
                is_active: true,
                manual_override: false,
                first_seen_at: seen_at,
                last_seen_at: seen_at,
                posted_at: listing.posted_at,
            },
        );

        Ok(UpsertOutcome {
            listing_id: id,
            inserted: true,
        })
    }

    async fn append_snapshot(
        &self,
        listing_id: i64,
        scraped_at: DateTime<Utc>,
        price_monthly_usd: Option<f64>,
        district: Option<&str>,
        city: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .listings
            .get(&listing_id)
            .with_context(|| format!("snapshot for unknown listing {}", listing_id))?;

        let duplicate = state
            .snapshots
            .iter()
            .any(|s| s.listing_id == listing_id && s.scraped_at == scraped_at);
        if duplicate {
            return Ok(());
        }

        let id = state.next_id();
        state.snapshots.push(RentalSnapshot {
            id,
            listing_id,
            scraped_at,
            price_monthly_usd,
            district: district.map(str::to_string),
            city: city.map(str::to_string),
        });
        Ok(())
    }

    async fn get_listing(&self, id: i64) -> Result<Option<RentalListing>> {
        let state = self.state.lock().await;
        Ok(state.listings.get(&id).cloned())
    }

    async fn patch_listing(&self, id: i64, patch: ListingPatch) -> Result<Option<RentalListing>> {
        let mut state = self.state.lock().await;
        let Some(listing) = state.listings.get_mut(&id) else {
            return Ok(None);
        };

        match patch {
            ListingPatch::Activate => {
                listing.is_active = true;
                listing.manual_override = true;
            }
            ListingPatch::Deactivate => {
                listing.is_active = false;
                listing.manual_override = true;
            }
            ListingPatch::Pass => listing.manual_override = false,
            ListingPatch::PropertyType(kind) => listing.property_type = kind,
        }
        Ok(Some(listing.clone()))
    }

    async fn snapshots_for(&self, listing_id: i64) -> Result<Vec<RentalSnapshot>> {
        let state = self.state.lock().await;
        let mut snapshots: Vec<_> = state
            .snapshots
            .iter()
            .filter(|s| s.listing_id == listing_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| (s.scraped_at, s.id));
        Ok(snapshots)
    }

    async fn listing_counts(&self) -> Result<Vec<SourceListingCounts>> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<Source, (i64, i64)> = BTreeMap::new();
        for listing in state.listings.values() {
            let entry = counts.entry(listing.source).or_default();
            entry.0 += 1;
            if listing.is_active {
                entry.1 += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(source, (total, active))| SourceListingCounts {
                source,
                total,
                active,
            })
            .collect())
    }

    async fn snapshot_count(&self) -> Result<i64> {
        Ok(self.state.lock().await.snapshots.len() as i64)
    }

    async fn index_samples(&self, as_of: DateTime<Utc>) -> Result<Vec<IndexSample>> {
        let state = self.state.lock().await;

        let samples = state
            .listings
            .values()
            .filter(|l| l.is_active && l.first_seen_at < as_of && l.property_type.is_allowed())
            .filter_map(|l| {
                let district = l.district.clone()?;
                let bedrooms = l.bedrooms?;
                let observed = state
                    .snapshots
                    .iter()
                    .filter(|s| s.listing_id == l.id && s.scraped_at < as_of)
                    .filter(|s| s.price_monthly_usd.is_some())
                    .max_by_key(|s| (s.scraped_at, s.id))
                    .and_then(|s| s.price_monthly_usd);
                let price = observed.or(l.price_monthly_usd)?;

                Some(IndexSample {
                    listing_id: l.id,
                    city: l.city.clone(),
                    district,
                    bedrooms,
                    property_type: l.property_type,
                    price_monthly_usd: price,
                })
            })
            .collect();

        Ok(samples)
    }

    async fn replace_index(&self, date: NaiveDate, rows: &[RentalIndexDaily]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.index.retain(|row| row.date != date);
        state.index.extend(rows.iter().cloned());
        Ok(())
    }

    async fn index_rows(&self, date: NaiveDate) -> Result<Vec<RentalIndexDaily>> {
        let state = self.state.lock().await;
        Ok(state
            .index
            .iter()
            .filter(|row| row.date == date)
            .cloned()
            .collect())
    }

    async fn latest_index_date(&self) -> Result<Option<NaiveDate>> {
        let state = self.state.lock().await;
        Ok(state.index.iter().map(|row| row.date).max())
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleCounts> {
        let mut state = self.state.lock().await;
        let mut counts = StaleCounts::default();

        for listing in state
            .listings
            .values_mut()
            .filter(|l| !l.manual_override && l.last_seen_at < cutoff)
        {
            if listing.is_active {
                listing.is_active = false;
                counts.deactivated += 1;
            } else {
                counts.already_inactive += 1;
            }
        }
        Ok(counts)
    }

    async fn price_anomalies(&self, ceiling: f64) -> Result<Vec<AnomalousListing>> {
        Ok(self.state.lock().await.anomalies(ceiling))
    }

    async fn repair_price_anomalies(&self, ceiling: f64) -> Result<RepairCounts> {
        let mut state = self.state.lock().await;
        let anomalies = state.anomalies(ceiling);
        let mut counts = RepairCounts::default();
        let now = Utc::now();

        for listing in state.listings.values_mut() {
            if listing.price_monthly_usd.is_some_and(|p| p > ceiling) {
                listing.price_monthly_usd = None;
                counts.listings_nulled += 1;
            }
        }

        for snapshot in state.snapshots.iter_mut() {
            if snapshot.price_monthly_usd.is_some_and(|p| p > ceiling) {
                snapshot.price_monthly_usd = None;
                counts.snapshots_nulled += 1;
            }
        }

        for anomaly in &anomalies {
            let entry = state.queue.iter_mut().find(|e| {
                e.source == anomaly.source
                    && e.canonical_url == anomaly.canonical_url
                    && e.status != QueueStatus::Pending
            });
            if let Some(entry) = entry {
                entry.status = entry.status.next(QueueEvent::MaintenanceReset)?;
                entry.updated_at = now;
                counts.queue_entries_reset += 1;
            }
        }

        Ok(counts)
    }

    async fn start_job_run(&self, run: &JobRun) -> Result<i64> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.job_runs.push(JobRun { id, ..run.clone() });
        Ok(id)
    }

    async fn finish_job_run(&self, run: &JobRun) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(stored) = state
            .job_runs
            .iter_mut()
            .find(|r| r.id == run.id && r.status == JobStatus::Running)
        else {
            return Ok(false);
        };

        *stored = JobRun {
            id: stored.id,
            job_type: stored.job_type,
            source: stored.source,
            started_at: stored.started_at,
            ..run.clone()
        };
        Ok(true)
    }

    async fn recent_job_runs(&self, limit: usize) -> Result<Vec<JobRun>> {
        let state = self.state.lock().await;
        let mut runs = state.job_runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }
}
