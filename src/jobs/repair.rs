use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::ledger::{run_ledgered, JobCounters, JobReport};
use crate::models::JobType;
use crate::storage::{AnomalousListing, RepairCounts, Store};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub dry_run: bool,
    pub ceiling: f64,
    pub anomalies: Vec<AnomalousListing>,
    /// Zero on a dry run
    pub applied: RepairCounts,
}

impl JobReport for RepairReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            discovered: self.anomalies.len() as i32,
            updated: self.applied.listings_nulled as i32,
            ..Default::default()
        }
    }
}

/// Find prices above `ceiling`; with `apply`, null them and reset the
/// affected queue entries so the next process run re-derives them.
pub async fn repair_prices<S>(store: &S, ceiling: f64, apply: bool) -> Result<RepairReport>
where
    S: Store + ?Sized,
{
    run_ledgered(store, JobType::RepairPrices, None, async {
        let anomalies = store.price_anomalies(ceiling).await?;
        info!(
            "🔧 {} listings carry prices above ${}",
            anomalies.len(),
            ceiling
        );

        let applied = if apply {
            let counts = store.repair_price_anomalies(ceiling).await?;
            warn!(
                "Nulled {} listing prices and {} snapshot prices, reset {} queue entries",
                counts.listings_nulled, counts.snapshots_nulled, counts.queue_entries_reset
            );
            counts
        } else {
            info!("Dry run, nothing changed (pass --apply to repair)");
            RepairCounts::default()
        };

        anyhow::Ok(RepairReport {
            dry_run: !apply,
            ceiling,
            anomalies,
            applied,
        })
    })
    .await
}
