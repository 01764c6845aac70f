use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use super::ledger::{run_ledgered, JobCounters, JobReport};
use crate::models::{IndexSample, JobType, PropertyType, RentalIndexDaily};
use crate::storage::Store;

/// City used for samples whose source gave no city
pub const UNKNOWN_CITY: &str = "Unknown";

/// Price statistics of one index segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    pub listing_count: usize,
    pub median: f64,
    pub mean: f64,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
}

/// Median, mean and quartiles of `prices`, or `None` when empty.
///
/// Order statistics pick `sorted[floor(n * q)]` without interpolation, so
/// the median of an even-sized group is its upper middle value. Quartiles
/// need at least four prices.
pub fn compute_stats(prices: &[f64]) -> Option<SegmentStats> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();

    let at = |q: f64| sorted[((n as f64 * q).floor() as usize).min(n - 1)];
    let (p25, p75) = if n >= 4 {
        (Some(at(0.25)), Some(at(0.75)))
    } else {
        (None, None)
    };

    Some(SegmentStats {
        listing_count: n,
        median: sorted[n / 2],
        mean: sorted.iter().sum::<f64>() / n as f64,
        p25,
        p75,
    })
}

/// Group samples into `(city, district, property type, bedrooms)` segments.
pub fn aggregate(date: NaiveDate, samples: &[IndexSample]) -> Vec<RentalIndexDaily> {
    let mut groups: BTreeMap<(String, String, PropertyType, i32), Vec<f64>> = BTreeMap::new();
    for sample in samples {
        let city = sample.city.clone().unwrap_or_else(|| UNKNOWN_CITY.to_string());
        groups
            .entry((
                city,
                sample.district.clone(),
                sample.property_type,
                sample.bedrooms,
            ))
            .or_default()
            .push(sample.price_monthly_usd);
    }

    groups
        .into_iter()
        .filter_map(|((city, district, property_type, bedrooms), prices)| {
            let stats = compute_stats(&prices)?;
            Some(RentalIndexDaily {
                date,
                city,
                district,
                bedrooms,
                property_type,
                listing_count: stats.listing_count as i32,
                median_price_usd: stats.median,
                mean_price_usd: stats.mean,
                p25_price_usd: stats.p25,
                p75_price_usd: stats.p75,
            })
        })
        .collect()
}

/// The day before `now`, in UTC
pub fn default_index_date(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive() - Duration::days(1)
}

/// Start of the day after `date`, the exclusive bound of "as of `date`"
fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    let next = date
        .succ_opt()
        .with_context(|| format!("no day after {}", date))?;
    Ok(next
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid midnight for {}", next))?
        .and_utc())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildIndexReport {
    pub date: NaiveDate,
    /// Listings that contributed a price
    pub listings: u32,
    /// Index rows written, replacing the day's previous rows
    pub rows: u32,
}

impl JobReport for BuildIndexReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            processed: self.listings as i32,
            inserted: self.rows as i32,
            ..Default::default()
        }
    }
}

/// Rebuild the index for `date`. Re-running replaces the same rows.
pub async fn build_index<S>(store: &S, date: NaiveDate) -> Result<BuildIndexReport>
where
    S: Store + ?Sized,
{
    info!("📊 Building rental index for {}", date);

    run_ledgered(store, JobType::BuildIndex, None, async {
        let as_of = end_of_day(date)?;
        let samples = store.index_samples(as_of).await?;
        let rows = aggregate(date, &samples);

        store
            .replace_index(date, &rows)
            .await
            .with_context(|| format!("Failed to write index rows for {}", date))?;

        info!(
            "✅ {} segments from {} active listings",
            rows.len(),
            samples.len()
        );

        anyhow::Ok(BuildIndexReport {
            date,
            listings: samples.len() as u32,
            rows: rows.len() as u32,
        })
    })
    .await
}
