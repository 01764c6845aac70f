use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Source of the property listing
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Source {
    /// realestate.com.kh, server-rendered pages fetched over plain HTTP
    RealestateKh,
    /// khmer24.com, client-rendered pages that need a headless browser
    Khmer24,
}

/// Property class assigned by keyword classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PropertyType {
    Condo,
    Apartment,
    House,
    Land,
    Commercial,
    Other,
}

impl PropertyType {
    /// Only the condo/apartment class is ever ingested.
    pub fn is_allowed(self) -> bool {
        matches!(self, PropertyType::Condo | PropertyType::Apartment)
    }
}

/// Status of a scrape queue entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    AsRefStr, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum QueueStatus {
    Pending,
    Done,
    Failed,
}

/// Events that move a queue entry between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Detail page fetched and stored (or deliberately rejected).
    Processed,
    /// Fetch or parse failed.
    Failed,
    /// Maintenance tooling forcing re-processing.
    MaintenanceReset,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid queue transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: QueueStatus,
    pub event: QueueEvent,
}

impl QueueStatus {
    /// Transition table for queue entries.
    ///
    /// `PENDING → DONE | FAILED` is the normal processing path. The only way
    /// back to `PENDING` is the maintenance reset, which accepts `FAILED`
    /// entries and `DONE` entries whose stored data needs re-deriving.
    pub fn next(self, event: QueueEvent) -> Result<QueueStatus, TransitionError> {
        match (self, event) {
            (QueueStatus::Pending, QueueEvent::Processed) => Ok(QueueStatus::Done),
            (QueueStatus::Pending, QueueEvent::Failed) => Ok(QueueStatus::Failed),
            (QueueStatus::Failed | QueueStatus::Done, QueueEvent::MaintenanceReset) => {
                Ok(QueueStatus::Pending)
            }
            (from, event) => Err(TransitionError { from, event }),
        }
    }
}

/// A discovered detail-page URL waiting to be processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeQueueEntry {
    pub id: i64,
    pub source: Source,
    pub canonical_url: String,
    pub source_listing_id: Option<String>,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Location information for a listing, as far as the source provides it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Normalized record every source adapter produces from a detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedListing {
    pub canonical_url: String,
    pub source_listing_id: Option<String>,
    pub title: String,
    pub property_type: PropertyType,
    pub location: Location,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub size_sqm: Option<f64>,
    pub price_monthly_usd: Option<f64>,
    pub amenities: Vec<String>,
    pub image_urls: Vec<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Canonical listing row, one per distinct property ad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalListing {
    pub id: i64,
    pub source: Source,
    pub canonical_url: String,
    pub source_listing_id: Option<String>,
    pub title: String,
    pub property_type: PropertyType,
    pub city: Option<String>,
    pub district: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub size_sqm: Option<f64>,
    pub price_monthly_usd: Option<f64>,
    pub amenities: Vec<String>,
    pub image_urls: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub manual_override: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Point-in-time observation of a listing's mutable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalSnapshot {
    pub id: i64,
    pub listing_id: i64,
    pub scraped_at: DateTime<Utc>,
    pub price_monthly_usd: Option<f64>,
    pub district: Option<String>,
    pub city: Option<String>,
}

/// One aggregated segment of the daily price index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalIndexDaily {
    pub date: NaiveDate,
    pub city: String,
    pub district: String,
    pub bedrooms: i32,
    pub property_type: PropertyType,
    pub listing_count: i32,
    pub median_price_usd: f64,
    pub mean_price_usd: f64,
    pub p25_price_usd: Option<f64>,
    pub p75_price_usd: Option<f64>,
}

/// Listing fields the index builder needs, with the price observed as of
/// the target day already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSample {
    pub listing_id: i64,
    pub city: Option<String>,
    pub district: String,
    pub bedrooms: i32,
    pub property_type: PropertyType,
    pub price_monthly_usd: f64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Discover,
    ProcessQueue,
    BuildIndex,
    MarkStale,
    RepairPrices,
    ResetQueue,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Started and not finalized yet; a run left here crashed or is still going
    Running,
    Success,
    Failed,
}

/// One logged execution of a pipeline job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub job_type: JobType,
    pub source: Option<Source>,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    /// Set once, when the run is finalized
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub discovered_count: i32,
    pub processed_count: i32,
    pub inserted_count: i32,
    pub updated_count: i32,
    pub error_message: Option<String>,
    /// Job-specific counters without a dedicated column
    pub details: serde_json::Value,
}

/// Result of a listing upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub listing_id: i64,
    pub inserted: bool,
}
