use anyhow::{ensure, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::ledger::{run_ledgered, JobCounters, JobReport};
use crate::models::JobType;
use crate::storage::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleReport {
    pub cutoff: DateTime<Utc>,
    pub deactivated: u64,
    pub already_inactive: u64,
}

impl JobReport for StaleReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            updated: self.deactivated as i32,
            ..Default::default()
        }
    }
}

/// Deactivate listings not seen within `window_days` of `now`.
///
/// Listings under a manual override are never touched.
pub async fn mark_stale<S>(store: &S, window_days: i64, now: DateTime<Utc>) -> Result<StaleReport>
where
    S: Store + ?Sized,
{
    run_ledgered(store, JobType::MarkStale, None, async {
        ensure!(window_days > 0, "stale window must be positive, got {}", window_days);

        let cutoff = now - Duration::days(window_days);
        info!("🧹 Deactivating listings last seen before {}", cutoff);

        let counts = store.mark_stale(cutoff).await?;
        info!(
            "✅ {} deactivated, {} already inactive",
            counts.deactivated, counts.already_inactive
        );

        anyhow::Ok(StaleReport {
            cutoff,
            deactivated: counts.deactivated,
            already_inactive: counts.already_inactive,
        })
    })
    .await
}
