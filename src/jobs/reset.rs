use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::ledger::{run_ledgered, JobCounters, JobReport};
use crate::models::{JobType, Source};
use crate::storage::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub source: Source,
    pub reset: u64,
}

impl JobReport for ResetReport {
    fn counters(&self) -> JobCounters {
        JobCounters {
            updated: self.reset as i32,
            ..Default::default()
        }
    }
}

/// Move every `FAILED` queue entry of `source` back to `PENDING`.
pub async fn reset_failed<S>(store: &S, source: Source) -> Result<ResetReport>
where
    S: Store + ?Sized,
{
    run_ledgered(store, JobType::ResetQueue, Some(source), async {
        let reset = store.reset_failed(source).await?;
        info!("♻️ Reset {} failed {} entries to PENDING", reset, source);
        anyhow::Ok(ResetReport { source, reset })
    })
    .await
}
