use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use std::str::FromStr;
use std::time::Duration;

use super::{
    AnomalousListing, ListingPatch, QueueCount, RepairCounts, SourceListingCounts, StaleCounts,
    Store,
};
use crate::models::{
    IndexSample, JobRun, JobStatus, ParsedListing, QueueEvent, QueueStatus, RentalIndexDaily,
    RentalListing, RentalSnapshot, ScrapeQueueEntry, Source, UpsertOutcome,
};

const QUEUE_COLUMNS: &str = "id, source, canonical_url, source_listing_id, status, retry_count, \
     last_error, created_at, updated_at";

const LISTING_COLUMNS: &str = "id, source, canonical_url, source_listing_id, title, property_type, \
     city, district, bedrooms, bathrooms, size_sqm, price_monthly_usd, amenities, image_urls, \
     latitude, longitude, is_active, manual_override, first_seen_at, last_seen_at, posted_at";

const JOB_RUN_COLUMNS: &str = "id, job_type, source, status, started_at, ended_at, duration_ms, \
     discovered_count, processed_count, inserted_count, updated_count, error_message, details";

/// Listings whose own price or any snapshot price is above `$1`
const ANOMALIES_SQL: &str = r#"
    SELECT l.id, l.source, l.canonical_url,
           CASE WHEN l.price_monthly_usd > $1 THEN l.price_monthly_usd END AS price_monthly_usd,
           (SELECT COUNT(*) FROM rental_snapshots s
             WHERE s.listing_id = l.id AND s.price_monthly_usd > $1) AS bad_snapshots
    FROM rental_listings l
    WHERE l.price_monthly_usd > $1
       OR EXISTS (SELECT 1 FROM rental_snapshots s
                   WHERE s.listing_id = l.id AND s.price_monthly_usd > $1)
    ORDER BY l.id
"#;

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

fn parse_text<T: FromStr>(row: &PgRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    T::from_str(&text).map_err(|_| anyhow!("unexpected {} value '{}'", column, text))
}

fn queue_entry_from_row(row: &PgRow) -> Result<ScrapeQueueEntry> {
    Ok(ScrapeQueueEntry {
        id: row.try_get("id")?,
        source: parse_text(row, "source")?,
        canonical_url: row.try_get("canonical_url")?,
        source_listing_id: row.try_get("source_listing_id")?,
        status: parse_text(row, "status")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn listing_from_row(row: &PgRow) -> Result<RentalListing> {
    Ok(RentalListing {
        id: row.try_get("id")?,
        source: parse_text(row, "source")?,
        canonical_url: row.try_get("canonical_url")?,
        source_listing_id: row.try_get("source_listing_id")?,
        title: row.try_get("title")?,
        property_type: parse_text(row, "property_type")?,
        city: row.try_get("city")?,
        district: row.try_get("district")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        size_sqm: row.try_get("size_sqm")?,
        price_monthly_usd: row.try_get("price_monthly_usd")?,
        amenities: row.try_get("amenities")?,
        image_urls: row.try_get("image_urls")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        is_active: row.try_get("is_active")?,
        manual_override: row.try_get("manual_override")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        posted_at: row.try_get("posted_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<RentalSnapshot> {
    Ok(RentalSnapshot {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        scraped_at: row.try_get("scraped_at")?,
        price_monthly_usd: row.try_get("price_monthly_usd")?,
        district: row.try_get("district")?,
        city: row.try_get("city")?,
    })
}

fn index_row_from_row(row: &PgRow) -> Result<RentalIndexDaily> {
    Ok(RentalIndexDaily {
        date: row.try_get("date")?,
        city: row.try_get("city")?,
        district: row.try_get("district")?,
        bedrooms: row.try_get("bedrooms")?,
        property_type: parse_text(row, "property_type")?,
        listing_count: row.try_get("listing_count")?,
        median_price_usd: row.try_get("median_price_usd")?,
        mean_price_usd: row.try_get("mean_price_usd")?,
        p25_price_usd: row.try_get("p25_price_usd")?,
        p75_price_usd: row.try_get("p75_price_usd")?,
    })
}

fn anomaly_from_row(row: &PgRow) -> Result<AnomalousListing> {
    Ok(AnomalousListing {
        listing_id: row.try_get("id")?,
        source: parse_text(row, "source")?,
        canonical_url: row.try_get("canonical_url")?,
        price_monthly_usd: row.try_get("price_monthly_usd")?,
        bad_snapshots: row.try_get("bad_snapshots")?,
    })
}

fn job_run_from_row(row: &PgRow) -> Result<JobRun> {
    let source: Option<String> = row.try_get("source")?;
    let source = source
        .map(|s| Source::from_str(&s).map_err(|_| anyhow!("unexpected source value '{}'", s)))
        .transpose()?;

    Ok(JobRun {
        id: row.try_get("id")?,
        job_type: parse_text(row, "job_type")?,
        source,
        status: parse_text(row, "status")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        duration_ms: row.try_get("duration_ms")?,
        discovered_count: row.try_get("discovered_count")?,
        processed_count: row.try_get("processed_count")?,
        inserted_count: row.try_get("inserted_count")?,
        updated_count: row.try_get("updated_count")?,
        error_message: row.try_get("error_message")?,
        details: row.try_get("details")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn enqueue(
        &self,
        source: Source,
        canonical_url: &str,
        source_listing_id: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO scrape_queue (source, canonical_url, source_listing_id, status)
            VALUES ($1, $2, $3, 'PENDING')
            ON CONFLICT (source, canonical_url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(source.to_string())
        .bind(canonical_url)
        .bind(source_listing_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to enqueue URL")?;

        Ok(row.is_some())
    }

    async fn pending_entries(&self, source: Source, limit: usize) -> Result<Vec<ScrapeQueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scrape_queue WHERE source = $1 AND status = 'PENDING' \
             ORDER BY created_at, id LIMIT $2",
            QUEUE_COLUMNS
        ))
        .bind(source.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pending queue entries")?;

        rows.iter().map(queue_entry_from_row).collect()
    }

    async fn transition_entry(
        &self,
        id: i64,
        from: QueueStatus,
        event: QueueEvent,
        error: Option<&str>,
    ) -> Result<bool> {
        let to = from.next(event)?;
        let retry_increment = i32::from(event == QueueEvent::Failed);

        let result = sqlx::query(
            r#"
            UPDATE scrape_queue
            SET status = $3,
                retry_count = retry_count + $4,
                last_error = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(retry_increment)
        .bind(error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to move queue entry {} out of {}", id, from))?;

        Ok(result.rows_affected() == 1)
    }

    async fn queue_entry(
        &self,
        source: Source,
        canonical_url: &str,
    ) -> Result<Option<ScrapeQueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scrape_queue WHERE source = $1 AND canonical_url = $2",
            QUEUE_COLUMNS
        ))
        .bind(source.to_string())
        .bind(canonical_url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn reset_failed(&self, source: Source) -> Result<u64> {
        let from = QueueStatus::Failed;
        let to = from.next(QueueEvent::MaintenanceReset)?;

        let result = sqlx::query(
            r#"
            UPDATE scrape_queue
            SET status = $3, updated_at = NOW()
            WHERE source = $1 AND status = $2
            "#,
        )
        .bind(source.to_string())
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to reset failed queue entries")?;

        Ok(result.rows_affected())
    }

    async fn queue_counts(&self) -> Result<Vec<QueueCount>> {
        let rows = sqlx::query(
            r#"
            SELECT source, status, COUNT(*) AS count
            FROM scrape_queue
            GROUP BY source, status
            ORDER BY source, status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueueCount {
                    source: parse_text(row, "source")?,
                    status: parse_text(row, "status")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn upsert_listing(
        &self,
        source: Source,
        listing: &ParsedListing,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO rental_listings (
                source, canonical_url, source_listing_id, title, property_type,
                city, district, bedrooms, bathrooms, size_sqm, price_monthly_usd,
                amenities, image_urls, latitude, longitude,
                is_active, manual_override, first_seen_at, last_seen_at, posted_at
            )
            VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15,
                TRUE, FALSE, $16, $16, $17
            )
            ON CONFLICT (source, canonical_url) DO UPDATE SET
                source_listing_id = COALESCE(EXCLUDED.source_listing_id, rental_listings.source_listing_id),
                title = EXCLUDED.title,
                property_type = CASE WHEN rental_listings.manual_override
                                     THEN rental_listings.property_type
                                     ELSE EXCLUDED.property_type END,
                city = EXCLUDED.city,
                district = EXCLUDED.district,
                bedrooms = EXCLUDED.bedrooms,
                bathrooms = EXCLUDED.bathrooms,
                size_sqm = EXCLUDED.size_sqm,
                price_monthly_usd = EXCLUDED.price_monthly_usd,
                amenities = EXCLUDED.amenities,
                image_urls = EXCLUDED.image_urls,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                is_active = CASE WHEN rental_listings.manual_override
                                 THEN rental_listings.is_active
                                 ELSE TRUE END,
                last_seen_at = GREATEST(rental_listings.last_seen_at, EXCLUDED.last_seen_at),
                posted_at = COALESCE(EXCLUDED.posted_at, rental_listings.posted_at)
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(source.to_string())
        .bind(&listing.canonical_url)
        .bind(listing.source_listing_id.as_deref())
        .bind(&listing.title)
        .bind(listing.property_type.to_string())
        .bind(listing.location.city.as_deref())
        .bind(listing.location.district.as_deref())
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.size_sqm)
        .bind(listing.price_monthly_usd)
        .bind(&listing.amenities)
        .bind(&listing.image_urls)
        .bind(listing.location.latitude)
        .bind(listing.location.longitude)
        .bind(seen_at)
        .bind(listing.posted_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert listing {}", listing.canonical_url))?;

        Ok(UpsertOutcome {
            listing_id: row.try_get("id")?,
            inserted: row.try_get("inserted")?,
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
        sqlx::query(
            r#"
            INSERT INTO rental_snapshots (listing_id, scraped_at, price_monthly_usd, district, city)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (listing_id, scraped_at) DO NOTHING
            "#,
        )
        .bind(listing_id)
        .bind(scraped_at)
        .bind(price_monthly_usd)
        .bind(district)
        .bind(city)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to append snapshot for listing {}", listing_id))?;

        Ok(())
    }

    async fn get_listing(&self, id: i64) -> Result<Option<RentalListing>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM rental_listings WHERE id = $1",
            LISTING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(listing_from_row).transpose()
    }

    async fn patch_listing(&self, id: i64, patch: ListingPatch) -> Result<Option<RentalListing>> {
        let assignments = match patch {
            ListingPatch::Activate => "is_active = TRUE, manual_override = TRUE",
            ListingPatch::Deactivate => "is_active = FALSE, manual_override = TRUE",
            ListingPatch::Pass => "manual_override = FALSE",
            ListingPatch::PropertyType(_) => "property_type = $2",
        };
        let sql = format!(
            "UPDATE rental_listings SET {} WHERE id = $1 RETURNING {}",
            assignments, LISTING_COLUMNS
        );

        let mut query = sqlx::query(&sql).bind(id);
        if let ListingPatch::PropertyType(kind) = patch {
            query = query.bind(kind.to_string());
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to patch listing {}", id))?;

        row.as_ref().map(listing_from_row).transpose()
    }

    async fn snapshots_for(&self, listing_id: i64) -> Result<Vec<RentalSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, listing_id, scraped_at, price_monthly_usd, district, city
            FROM rental_snapshots
            WHERE listing_id = $1
            ORDER BY scraped_at, id
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn listing_counts(&self) -> Result<Vec<SourceListingCounts>> {
        let rows = sqlx::query(
            r#"
            SELECT source,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE is_active) AS active
            FROM rental_listings
            GROUP BY source
            ORDER BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SourceListingCounts {
                    source: parse_text(row, "source")?,
                    total: row.try_get("total")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }

    async fn snapshot_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM rental_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn index_samples(&self, as_of: DateTime<Utc>) -> Result<Vec<IndexSample>> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.city, l.district, l.bedrooms, l.property_type,
                   COALESCE(s.price_monthly_usd, l.price_monthly_usd) AS price_monthly_usd
            FROM rental_listings l
            LEFT JOIN LATERAL (
                SELECT price_monthly_usd
                FROM rental_snapshots
                WHERE listing_id = l.id
                  AND scraped_at < $1
                  AND price_monthly_usd IS NOT NULL
                ORDER BY scraped_at DESC, id DESC
                LIMIT 1
            ) s ON TRUE
            WHERE l.is_active
              AND l.first_seen_at < $1
              AND l.property_type IN ('CONDO', 'APARTMENT')
              AND l.district IS NOT NULL
              AND l.bedrooms IS NOT NULL
              AND COALESCE(s.price_monthly_usd, l.price_monthly_usd) IS NOT NULL
            ORDER BY l.id
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load index samples")?;

        rows.iter()
            .map(|row| {
                Ok(IndexSample {
                    listing_id: row.try_get("id")?,
                    city: row.try_get("city")?,
                    district: row.try_get("district")?,
                    bedrooms: row.try_get("bedrooms")?,
                    property_type: parse_text(row, "property_type")?,
                    price_monthly_usd: row.try_get("price_monthly_usd")?,
                })
            })
            .collect()
    }

    async fn replace_index(&self, date: NaiveDate, rows: &[RentalIndexDaily]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rental_index_daily WHERE date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear index rows for {}", date))?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO rental_index_daily (
                    date, city, district, bedrooms, property_type, listing_count,
                    median_price_usd, mean_price_usd, p25_price_usd, p75_price_usd
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(row.date)
            .bind(&row.city)
            .bind(&row.district)
            .bind(row.bedrooms)
            .bind(row.property_type.to_string())
            .bind(row.listing_count)
            .bind(row.median_price_usd)
            .bind(row.mean_price_usd)
            .bind(row.p25_price_usd)
            .bind(row.p75_price_usd)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn index_rows(&self, date: NaiveDate) -> Result<Vec<RentalIndexDaily>> {
        let rows = sqlx::query(
            r#"
            SELECT date, city, district, bedrooms, property_type, listing_count,
                   median_price_usd, mean_price_usd, p25_price_usd, p75_price_usd
            FROM rental_index_daily
            WHERE date = $1
            ORDER BY city, district, property_type, bedrooms
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(index_row_from_row).collect()
    }

    async fn latest_index_date(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(date) AS date FROM rental_index_daily")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("date")?)
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleCounts> {
        let mut tx = self.pool.begin().await?;

        let already_inactive: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM rental_listings
            WHERE NOT is_active AND NOT manual_override AND last_seen_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?
        .try_get("count")?;

        let deactivated = sqlx::query(
            r#"
            UPDATE rental_listings
            SET is_active = FALSE
            WHERE is_active AND NOT manual_override AND last_seen_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .context("Failed to deactivate stale listings")?
        .rows_affected();

        tx.commit().await?;

        Ok(StaleCounts {
            deactivated,
            already_inactive: already_inactive as u64,
        })
    }

    async fn price_anomalies(&self, ceiling: f64) -> Result<Vec<AnomalousListing>> {
        let rows = sqlx::query(ANOMALIES_SQL)
            .bind(ceiling)
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan for price anomalies")?;

        rows.iter().map(anomaly_from_row).collect()
    }

    async fn repair_price_anomalies(&self, ceiling: f64) -> Result<RepairCounts> {
        let mut tx = self.pool.begin().await?;

        // Queue entries first; the listing and snapshot prices still identify them
        let queue_entries_reset = sqlx::query(
            r#"
            UPDATE scrape_queue q
            SET status = 'PENDING', updated_at = NOW()
            FROM rental_listings l
            WHERE l.source = q.source
              AND l.canonical_url = q.canonical_url
              AND q.status IN ('DONE', 'FAILED')
              AND (l.price_monthly_usd > $1
                   OR EXISTS (SELECT 1 FROM rental_snapshots s
                               WHERE s.listing_id = l.id AND s.price_monthly_usd > $1))
            "#,
        )
        .bind(ceiling)
        .execute(&mut *tx)
        .await
        .context("Failed to reset queue entries of anomalous listings")?
        .rows_affected();

        let listings_nulled = sqlx::query(
            "UPDATE rental_listings SET price_monthly_usd = NULL WHERE price_monthly_usd > $1",
        )
        .bind(ceiling)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let snapshots_nulled = sqlx::query(
            "UPDATE rental_snapshots SET price_monthly_usd = NULL WHERE price_monthly_usd > $1",
        )
        .bind(ceiling)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(RepairCounts {
            listings_nulled,
            snapshots_nulled,
            queue_entries_reset,
        })
    }

    async fn start_job_run(&self, run: &JobRun) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_runs (job_type, source, status, started_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(run.job_type.to_string())
        .bind(run.source.map(|s| s.to_string()))
        .bind(run.status.to_string())
        .bind(run.started_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to start job run")?;

        Ok(row.try_get("id")?)
    }

    async fn finish_job_run(&self, run: &JobRun) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = $2, ended_at = $3, duration_ms = $4,
                discovered_count = $5, processed_count = $6,
                inserted_count = $7, updated_count = $8,
                error_message = $9, details = $10
            WHERE id = $1 AND status = $11
            "#,
        )
        .bind(run.id)
        .bind(run.status.to_string())
        .bind(run.ended_at)
        .bind(run.duration_ms)
        .bind(run.discovered_count)
        .bind(run.processed_count)
        .bind(run.inserted_count)
        .bind(run.updated_count)
        .bind(run.error_message.as_deref())
        .bind(&run.details)
        .bind(JobStatus::Running.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to finish job run")?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_job_runs(&self, limit: usize) -> Result<Vec<JobRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_runs ORDER BY started_at DESC, id DESC LIMIT $1",
            JOB_RUN_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_run_from_row).collect()
    }
}
