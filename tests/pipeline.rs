use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rental_scout::admin;
use rental_scout::config::Politeness;
use rental_scout::jobs::{self, DiscoverOptions, ProcessOptions};
use rental_scout::models::{
    JobStatus, JobType, Location, ParsedListing, PropertyType, QueueEvent, QueueStatus, Source,
};
use rental_scout::scrapers::{ListingLink, ScrapeError, SourceAdapter};
use rental_scout::storage::{ListingPatch, MemoryStore, Store};

const SITE: &str = "https://rent.example.com";

/// Adapter serving canned category pages and detail records
#[derive(Default)]
struct StubAdapter {
    pages: Vec<(String, Vec<ListingLink>)>,
    listings: HashMap<String, ParsedListing>,
    /// Detail URLs that hang far longer than any fetch timeout
    slow: HashSet<String>,
}

impl StubAdapter {
    fn with_page(mut self, links: Vec<ListingLink>) -> Self {
        let url = format!("{}/rent?page={}", SITE, self.pages.len() + 1);
        self.pages.push((url, links));
        self
    }

    fn with_listing(mut self, listing: ParsedListing) -> Self {
        self.listings.insert(listing.canonical_url.clone(), listing);
        self
    }

    fn with_slow(mut self, url: &str) -> Self {
        self.slow.insert(url.to_string());
        self
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn source(&self) -> Source {
        Source::RealestateKh
    }

    fn category_pages(&self, page_cap: u32) -> Vec<String> {
        self.pages
            .iter()
            .take(page_cap as usize)
            .map(|(url, _)| url.clone())
            .collect()
    }

    async fn fetch_category(&self, url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        self.pages
            .iter()
            .find(|(page, _)| page == url)
            .map(|(_, links)| links.clone())
            .ok_or_else(|| ScrapeError::Status {
                status: 404,
                url: url.to_string(),
            })
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        if self.slow.contains(url) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        self.listings
            .get(url)
            .cloned()
            .ok_or_else(|| ScrapeError::parse(url, "no listing title"))
    }
}

fn link(slug: &str, title: &str) -> ListingLink {
    ListingLink {
        href: format!("/listing/{}/?ref=search#photos", slug),
        title: title.to_string(),
    }
}

fn detail_url(slug: &str) -> String {
    format!("{}/listing/{}", SITE, slug)
}

fn parsed(url: &str, kind: PropertyType, district: &str, bedrooms: i32, price: Option<f64>) -> ParsedListing {
    ParsedListing {
        canonical_url: url.to_string(),
        source_listing_id: None,
        title: format!("{} for rent in {}", kind, district),
        property_type: kind,
        location: Location {
            city: Some("Phnom Penh".to_string()),
            district: Some(district.to_string()),
            latitude: None,
            longitude: None,
        },
        bedrooms: Some(bedrooms),
        bathrooms: Some(1),
        size_sqm: Some(55.0),
        price_monthly_usd: price,
        amenities: vec!["Pool".to_string()],
        image_urls: vec![],
        posted_at: None,
    }
}

fn discover_options(page_cap: u32) -> DiscoverOptions {
    DiscoverOptions {
        page_cap,
        url_cap: None,
        politeness: Politeness::none(),
    }
}

fn process_options(batch_size: usize) -> ProcessOptions {
    ProcessOptions {
        batch_size,
        concurrency: 2,
        fetch_timeout: Duration::from_millis(200),
        politeness: Politeness::none(),
        max_monthly_price_usd: 20_000.0,
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

/// Twelve links: five condos, four apartments and three that classify as OTHER
fn mixed_links() -> Vec<ListingLink> {
    let mut links = Vec::new();
    for i in 0..5 {
        links.push(link(&format!("condo-10{:02}", i), "2 bedroom condo for rent"));
    }
    for i in 0..4 {
        links.push(link(&format!("unit-20{:02}", i), "Serviced apartment near riverside"));
    }
    for i in 0..3 {
        links.push(link(&format!("ad-30{:02}", i), "Great deal, call now"));
    }
    links
}

#[tokio::test]
async fn test_discover_filters_and_respects_page_cap() {
    let store = MemoryStore::new();
    let adapter = StubAdapter::default()
        .with_page(mixed_links())
        .with_page(vec![link("condo-9999", "Condo on page two")]);

    let report = jobs::discover(&store, &adapter, &discover_options(1))
        .await
        .unwrap();

    assert_eq!(report.discovered, 9);
    assert_eq!(report.queued, 9);
    assert_eq!(report.rejected, 3);
    assert_eq!(report.pages_fetched, 1);

    let entry = store
        .queue_entry(Source::RealestateKh, &detail_url("condo-1000"))
        .await
        .unwrap()
        .expect("canonical URL queued");
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.source_listing_id.as_deref(), Some("1000"));

    assert!(store
        .queue_entry(Source::RealestateKh, &detail_url("condo-9999"))
        .await
        .unwrap()
        .is_none());

    let runs = store.recent_job_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_type, JobType::Discover);
    assert_eq!(runs[0].status, JobStatus::Success);
    assert_eq!(runs[0].discovered_count, 9);
    assert_eq!(runs[0].details["rejected"], 3);
}

#[tokio::test]
async fn test_rediscovery_never_duplicates() {
    let store = MemoryStore::new();
    let mut links = mixed_links();
    // Same ad linked twice with a different query string
    links.push(ListingLink {
        href: format!("{}/listing/condo-1000?utm=feed", SITE),
        title: "2 bedroom condo for rent".to_string(),
    });
    let adapter = StubAdapter::default().with_page(links);

    let first = jobs::discover(&store, &adapter, &discover_options(3))
        .await
        .unwrap();
    let second = jobs::discover(&store, &adapter, &discover_options(3))
        .await
        .unwrap();

    assert_eq!(first.discovered, 9);
    assert_eq!(first.queued, 9);
    assert_eq!(second.discovered, 9);
    assert_eq!(second.queued, 0);

    let pending = store
        .pending_entries(Source::RealestateKh, 100)
        .await
        .unwrap();
    assert_eq!(pending.len(), 9);
}

/// Wraps a stub and answers one category page with a 404
struct FailingPage {
    inner: StubAdapter,
    failing: String,
}

#[async_trait]
impl SourceAdapter for FailingPage {
    fn source(&self) -> Source {
        self.inner.source()
    }

    fn category_pages(&self, page_cap: u32) -> Vec<String> {
        self.inner.category_pages(page_cap)
    }

    async fn fetch_category(&self, url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        if url == self.failing {
            return Err(ScrapeError::Status {
                status: 404,
                url: url.to_string(),
            });
        }
        self.inner.fetch_category(url).await
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        self.inner.fetch_listing(url).await
    }
}

#[tokio::test]
async fn test_discover_url_cap_and_failed_page() {
    let store = MemoryStore::new();
    let inner = StubAdapter::default()
        .with_page(vec![link("condo-4040", "Condo never seen")])
        .with_page(mixed_links());
    let failing = inner.category_pages(1).remove(0);
    let adapter = FailingPage { inner, failing };

    let options = DiscoverOptions {
        url_cap: Some(4),
        ..discover_options(5)
    };
    let report = jobs::discover(&store, &adapter, &options).await.unwrap();

    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.discovered, 4);
    assert_eq!(report.queued, 4);
}

#[tokio::test]
async fn test_zero_url_cap_queues_nothing() {
    let store = MemoryStore::new();
    let adapter = StubAdapter::default().with_page(mixed_links());

    let options = DiscoverOptions {
        url_cap: Some(0),
        ..discover_options(1)
    };
    let report = jobs::discover(&store, &adapter, &options).await.unwrap();

    assert_eq!(report.discovered, 0);
    assert_eq!(report.queued, 0);
    assert!(store
        .pending_entries(Source::RealestateKh, 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_process_batch_with_one_timeout() {
    let store = MemoryStore::new();
    let slugs = ["condo-1", "condo-2", "condo-3", "condo-4", "condo-5"];

    let mut adapter = StubAdapter::default().with_slow(&detail_url("condo-5"));
    for (i, slug) in slugs.iter().enumerate() {
        let url = detail_url(slug);
        store
            .enqueue(Source::RealestateKh, &url, None)
            .await
            .unwrap();
        adapter = adapter.with_listing(parsed(
            &url,
            PropertyType::Condo,
            "BKK1",
            1,
            Some(500.0 + i as f64 * 50.0),
        ));
    }

    let report = jobs::process_queue(&store, &adapter, &process_options(5))
        .await
        .unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(report.inserted, 4);
    assert_eq!(report.updated, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.transient_failures, 1);

    let failed = store
        .queue_entry(Source::RealestateKh, &detail_url("condo-5"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.last_error.unwrap().contains("timed out"));

    let done = store
        .queue_entry(Source::RealestateKh, &detail_url("condo-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, QueueStatus::Done);

    let runs = store.recent_job_runs(1).await.unwrap();
    assert_eq!(runs[0].job_type, JobType::ProcessQueue);
    assert_eq!(runs[0].processed_count, 4);
    assert_eq!(runs[0].inserted_count, 4);
    assert_eq!(runs[0].details["failed"], 1);
    assert_eq!(store.snapshot_count().await.unwrap(), 4);

    // FAILED entries are not picked up again without a reset
    let again = jobs::process_queue(&store, &adapter, &process_options(5))
        .await
        .unwrap();
    assert_eq!(again.processed + again.failed, 0);

    let reset = jobs::reset_failed(&store, Source::RealestateKh).await.unwrap();
    assert_eq!(reset.reset, 1);
    let entry = store
        .queue_entry(Source::RealestateKh, &detail_url("condo-5"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.retry_count, 1);
}

#[tokio::test]
async fn test_detail_outside_allowed_class_is_rejected() {
    let store = MemoryStore::new();
    let url = detail_url("villa-77");
    store
        .enqueue(Source::RealestateKh, &url, None)
        .await
        .unwrap();
    let adapter = StubAdapter::default().with_listing(parsed(
        &url,
        PropertyType::House,
        "Toul Kork",
        4,
        Some(2500.0),
    ));

    let report = jobs::process_queue(&store, &adapter, &process_options(10))
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.inserted, 0);

    let entry = store
        .queue_entry(Source::RealestateKh, &url)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Done);
    assert!(store.listing_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sale_price_is_stored_as_null_and_repair_resets_entry() {
    let store = MemoryStore::new();
    let url = detail_url("condo-sale-500");
    store
        .enqueue(Source::RealestateKh, &url, None)
        .await
        .unwrap();
    let adapter = StubAdapter::default().with_listing(parsed(
        &url,
        PropertyType::Condo,
        "BKK1",
        2,
        Some(50_000.0),
    ));

    let report = jobs::process_queue(&store, &adapter, &process_options(10))
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.price_nulled, 1);

    // Nothing above the ceiling reached the store
    assert!(store.price_anomalies(20_000.0).await.unwrap().is_empty());

    // A row written before the ceiling existed
    let legacy = parsed(&url, PropertyType::Condo, "BKK1", 2, Some(50_000.0));
    let outcome = store
        .upsert_listing(Source::RealestateKh, &legacy, at(14, 8))
        .await
        .unwrap();
    assert!(!outcome.inserted);

    let snapshots = store.snapshots_for(outcome.listing_id).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].price_monthly_usd, None);

    store
        .append_snapshot(outcome.listing_id, at(14, 8), Some(50_000.0), Some("BKK1"), None)
        .await
        .unwrap();

    let dry = jobs::repair_prices(&store, 20_000.0, false).await.unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.anomalies.len(), 1);
    assert_eq!(dry.anomalies[0].bad_snapshots, 1);
    let untouched = store.get_listing(outcome.listing_id).await.unwrap().unwrap();
    assert_eq!(untouched.price_monthly_usd, Some(50_000.0));

    let applied = jobs::repair_prices(&store, 20_000.0, true).await.unwrap();
    assert_eq!(applied.applied.listings_nulled, 1);
    assert_eq!(applied.applied.snapshots_nulled, 1);
    assert_eq!(applied.applied.queue_entries_reset, 1);

    let repaired = store.get_listing(outcome.listing_id).await.unwrap().unwrap();
    assert_eq!(repaired.price_monthly_usd, None);
    let entry = store
        .queue_entry(Source::RealestateKh, &url)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert!(store.price_anomalies(20_000.0).await.unwrap().is_empty());
}

async fn seed_listing(
    store: &MemoryStore,
    slug: &str,
    district: &str,
    bedrooms: i32,
    price: f64,
    seen_at: DateTime<Utc>,
) -> i64 {
    let listing = parsed(&detail_url(slug), PropertyType::Condo, district, bedrooms, Some(price));
    let outcome = store
        .upsert_listing(Source::RealestateKh, &listing, seen_at)
        .await
        .unwrap();
    store
        .append_snapshot(outcome.listing_id, seen_at, Some(price), Some(district), Some("Phnom Penh"))
        .await
        .unwrap();
    outcome.listing_id
}

#[tokio::test]
async fn test_build_index_statistics_and_rebuild() {
    let store = MemoryStore::new();
    for (i, price) in [200.0, 250.0, 300.0, 400.0, 900.0].into_iter().enumerate() {
        seed_listing(&store, &format!("bkk1-{}", i), "BKK1", 1, price, at(10, 9)).await;
    }
    seed_listing(&store, "tk-1", "Toul Kork", 2, 700.0, at(10, 9)).await;
    seed_listing(&store, "tk-2", "Toul Kork", 2, 900.0, at(10, 9)).await;
    // First seen after the target day; not part of its index
    seed_listing(&store, "late-1", "BKK1", 1, 100.0, at(16, 9)).await;

    let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
    let first = jobs::build_index(&store, date).await.unwrap();
    assert_eq!(first.rows, 2);
    assert_eq!(first.listings, 7);

    let rows = store.index_rows(date).await.unwrap();
    let bkk1 = rows.iter().find(|r| r.district == "BKK1").unwrap();
    assert_eq!(bkk1.listing_count, 5);
    assert_eq!(bkk1.median_price_usd, 300.0);
    assert_eq!(bkk1.p25_price_usd, Some(250.0));
    assert_eq!(bkk1.p75_price_usd, Some(400.0));
    assert_eq!(bkk1.mean_price_usd, 410.0);

    let toul_kork = rows.iter().find(|r| r.district == "Toul Kork").unwrap();
    assert_eq!(toul_kork.listing_count, 2);
    assert_eq!(toul_kork.median_price_usd, 900.0);
    assert_eq!(toul_kork.p25_price_usd, None);
    assert_eq!(toul_kork.p75_price_usd, None);

    let second = jobs::build_index(&store, date).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(store.index_rows(date).await.unwrap(), rows);
}

#[tokio::test]
async fn test_index_uses_price_observed_as_of_the_day() {
    let store = MemoryStore::new();
    let id = seed_listing(&store, "drift-1", "Daun Penh", 1, 500.0, at(10, 9)).await;

    // A later price change must not leak into an earlier day's index
    let relisted = parsed(&detail_url("drift-1"), PropertyType::Condo, "Daun Penh", 1, Some(650.0));
    store
        .upsert_listing(Source::RealestateKh, &relisted, at(20, 9))
        .await
        .unwrap();
    store
        .append_snapshot(id, at(20, 9), Some(650.0), Some("Daun Penh"), Some("Phnom Penh"))
        .await
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
    jobs::build_index(&store, date).await.unwrap();
    let rows = store.index_rows(date).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].median_price_usd, 500.0);

    let history = admin::price_history(&store, id).await.unwrap();
    let prices: Vec<_> = history.iter().map(|t| t.price_usd).collect();
    assert_eq!(prices, vec![Some(500.0), Some(650.0)]);
}

#[tokio::test]
async fn test_staleness_respects_manual_override() {
    let store = MemoryStore::new();
    let now = at(20, 12);
    let old = now - ChronoDuration::days(10);

    let stale = seed_listing(&store, "stale-1", "BKK1", 1, 600.0, old).await;
    let pinned = seed_listing(&store, "pinned-1", "BKK1", 1, 650.0, old).await;
    let fresh = seed_listing(&store, "fresh-1", "BKK1", 1, 700.0, now - ChronoDuration::days(1)).await;

    admin::patch_listing(&store, pinned, ListingPatch::Activate)
        .await
        .unwrap();

    let report = jobs::mark_stale(&store, 7, now).await.unwrap();
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.already_inactive, 0);

    assert!(!store.get_listing(stale).await.unwrap().unwrap().is_active);
    assert!(store.get_listing(pinned).await.unwrap().unwrap().is_active);
    assert!(store.get_listing(fresh).await.unwrap().unwrap().is_active);

    let again = jobs::mark_stale(&store, 7, now).await.unwrap();
    assert_eq!(again.deactivated, 0);
    assert_eq!(again.already_inactive, 1);

    // Handing the listing back lets staleness deactivate it
    admin::patch_listing(&store, pinned, ListingPatch::Pass)
        .await
        .unwrap();
    let third = jobs::mark_stale(&store, 7, now).await.unwrap();
    assert_eq!(third.deactivated, 1);
}

#[tokio::test]
async fn test_reseen_listing_is_reactivated_unless_overridden() {
    let store = MemoryStore::new();
    let url = detail_url("condo-back-1");
    let listing = parsed(&url, PropertyType::Condo, "BKK1", 1, Some(800.0));

    let id = store
        .upsert_listing(Source::RealestateKh, &listing, at(1, 9))
        .await
        .unwrap()
        .listing_id;
    jobs::mark_stale(&store, 7, at(20, 9)).await.unwrap();
    assert!(!store.get_listing(id).await.unwrap().unwrap().is_active);

    store
        .upsert_listing(Source::RealestateKh, &listing, at(20, 10))
        .await
        .unwrap();
    let reseen = store.get_listing(id).await.unwrap().unwrap();
    assert!(reseen.is_active);
    assert_eq!(reseen.first_seen_at, at(1, 9));
    assert_eq!(reseen.last_seen_at, at(20, 10));

    // An older observation never moves last_seen_at backwards
    store
        .upsert_listing(Source::RealestateKh, &listing, at(5, 10))
        .await
        .unwrap();
    assert_eq!(
        store.get_listing(id).await.unwrap().unwrap().last_seen_at,
        at(20, 10)
    );

    admin::patch_listing(&store, id, ListingPatch::Deactivate)
        .await
        .unwrap();
    admin::patch_listing(&store, id, ListingPatch::PropertyType(PropertyType::Apartment))
        .await
        .unwrap();
    store
        .upsert_listing(Source::RealestateKh, &listing, at(21, 10))
        .await
        .unwrap();
    let pinned = store.get_listing(id).await.unwrap().unwrap();
    assert!(!pinned.is_active);
    assert_eq!(pinned.property_type, PropertyType::Apartment);
}

#[tokio::test]
async fn test_conditional_transition_loses_race() {
    let store = MemoryStore::new();
    store
        .enqueue(Source::Khmer24, "https://www.khmer24.com/en/adid-1234567.html", None)
        .await
        .unwrap();
    let entry = store
        .pending_entries(Source::Khmer24, 1)
        .await
        .unwrap()
        .remove(0);

    assert!(store
        .transition_entry(entry.id, QueueStatus::Pending, QueueEvent::Processed, None)
        .await
        .unwrap());
    assert!(!store
        .transition_entry(entry.id, QueueStatus::Pending, QueueEvent::Failed, Some("late"))
        .await
        .unwrap());
    assert!(store
        .transition_entry(entry.id, QueueStatus::Done, QueueEvent::Processed, None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_failed_job_writes_failed_run() {
    let store = MemoryStore::new();

    let result = jobs::mark_stale(&store, 0, Utc::now()).await;
    assert!(result.is_err());

    let runs = store.recent_job_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_type, JobType::MarkStale);
    assert_eq!(runs[0].status, JobStatus::Failed);
    assert!(runs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("stale window must be positive"));
}

#[tokio::test]
async fn test_summary_overview() {
    let store = MemoryStore::new();
    seed_listing(&store, "sum-1", "BKK1", 1, 600.0, at(10, 9)).await;
    let id = seed_listing(&store, "sum-2", "BKK1", 1, 700.0, at(10, 9)).await;
    admin::patch_listing(&store, id, ListingPatch::Deactivate)
        .await
        .unwrap();
    store
        .enqueue(Source::Khmer24, "https://www.khmer24.com/en/adid-7654321.html", None)
        .await
        .unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
    jobs::build_index(&store, date).await.unwrap();

    let summary = admin::summary(&store, admin::DEFAULT_RECENT_RUNS)
        .await
        .unwrap();
    assert_eq!(summary.total_listings, 2);
    assert_eq!(summary.active_listings, 1);
    assert_eq!(summary.snapshots, 2);
    assert_eq!(summary.queue.len(), 1);
    assert_eq!(summary.queue[0].status, QueueStatus::Pending);
    assert_eq!(summary.recent_runs.len(), 1);

    let market = summary.market.unwrap();
    assert_eq!(market.date, date);
    assert_eq!(market.segments.len(), 1);
    assert_eq!(market.segments[0].listing_count, 1);

    assert!(admin::patch_listing(&store, 999, ListingPatch::Pass).await.is_err());
}

#[tokio::test]
async fn test_adapter_open_failure_writes_failed_run() {
    let store = MemoryStore::new();

    let discovered = jobs::open_and_discover(
        &store,
        Source::Khmer24,
        || Err::<StubAdapter, _>(anyhow!("Chrome executable not found")),
        &discover_options(1),
    )
    .await;
    assert!(discovered.is_err());

    let processed = jobs::open_and_process(
        &store,
        Source::RealestateKh,
        || Err::<StubAdapter, _>(anyhow!("invalid user agent")),
        &process_options(5),
    )
    .await;
    assert!(processed.is_err());

    let runs = store.recent_job_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == JobStatus::Failed));
    assert!(runs.iter().all(|r| r.ended_at.is_some()));

    let discover_run = runs
        .iter()
        .find(|r| r.job_type == JobType::Discover)
        .unwrap();
    assert_eq!(discover_run.source, Some(Source::Khmer24));
    let message = discover_run.error_message.as_deref().unwrap();
    assert!(message.contains("Failed to open khmer24 adapter"));
    assert!(message.contains("Chrome executable not found"));
}

#[tokio::test]
async fn test_opened_adapter_runs_the_job() {
    let store = MemoryStore::new();
    let report = jobs::open_and_discover(
        &store,
        Source::RealestateKh,
        || Ok(StubAdapter::default().with_page(mixed_links())),
        &discover_options(1),
    )
    .await
    .unwrap();

    assert_eq!(report.queued, 9);
    let runs = store.recent_job_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobStatus::Success);
}

/// Adapter whose detail fetch panics
struct PanickingAdapter;

#[async_trait]
impl SourceAdapter for PanickingAdapter {
    fn source(&self) -> Source {
        Source::RealestateKh
    }

    fn category_pages(&self, _page_cap: u32) -> Vec<String> {
        Vec::new()
    }

    async fn fetch_category(&self, _url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        Ok(Vec::new())
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        panic!("parser blew up on {}", url);
    }
}

#[tokio::test]
async fn test_crashed_job_leaves_running_run() {
    let store = MemoryStore::new();
    store
        .enqueue(Source::RealestateKh, &detail_url("condo-crash"), None)
        .await
        .unwrap();

    let crashed = AssertUnwindSafe(jobs::process_queue(
        &store,
        &PanickingAdapter,
        &process_options(5),
    ))
    .catch_unwind()
    .await;
    assert!(crashed.is_err());

    let runs = store.recent_job_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job_type, JobType::ProcessQueue);
    assert_eq!(runs[0].status, JobStatus::Running);
    assert!(runs[0].ended_at.is_none());

    let entry = store
        .queue_entry(Source::RealestateKh, &detail_url("condo-crash"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
}

/// Adapter recording how many detail fetches overlap
#[derive(Default)]
struct CountingAdapter {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl SourceAdapter for CountingAdapter {
    fn source(&self) -> Source {
        Source::RealestateKh
    }

    fn category_pages(&self, _page_cap: u32) -> Vec<String> {
        Vec::new()
    }

    async fn fetch_category(&self, _url: &str) -> Result<Vec<ListingLink>, ScrapeError> {
        Ok(Vec::new())
    }

    async fn fetch_listing(&self, url: &str) -> Result<ParsedListing, ScrapeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(parsed(url, PropertyType::Condo, "BKK1", 1, Some(600.0)))
    }
}

#[tokio::test]
async fn test_detail_fetches_are_bounded_by_concurrency() {
    let store = MemoryStore::new();
    for i in 0..6 {
        store
            .enqueue(Source::RealestateKh, &detail_url(&format!("condo-60{}", i)), None)
            .await
            .unwrap();
    }

    let adapter = CountingAdapter::default();
    let report = jobs::process_queue(&store, &adapter, &process_options(6))
        .await
        .unwrap();

    assert_eq!(report.processed, 6);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 6);
    let peak = adapter.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "{} fetches overlapped", peak);
    assert_eq!(peak, 2);
}
