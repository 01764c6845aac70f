//! Batch jobs. Each one runs to completion, writes exactly one job run row
//! and returns a serializable report.

pub mod build_index;
pub mod discover;
pub mod ledger;
pub mod process_queue;
pub mod repair;
pub mod reset;
pub mod stale;

pub use build_index::{build_index, BuildIndexReport};
pub use discover::{discover, open_and_discover, DiscoverOptions, DiscoverReport};
pub use ledger::{run_ledgered, JobCounters, JobReport};
pub use process_queue::{open_and_process, process_queue, ProcessOptions, ProcessReport};
pub use repair::{repair_prices, RepairReport};
pub use reset::{reset_failed, ResetReport};
pub use stale::{mark_stale, StaleReport};

use crate::config::Politeness;
use rand::Rng;
use std::time::Duration;

/// Sleep `base + uniform(0, jitter)` before an outbound request.
pub async fn politeness_delay(politeness: Politeness) {
    let jitter_ms = politeness.jitter.as_millis() as u64;
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };

    let delay = politeness.base_delay + Duration::from_millis(extra);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
