use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::models::{JobRun, JobStatus, JobType, Source};
use crate::storage::Store;

/// Counters with a dedicated job run column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub discovered: i32,
    pub processed: i32,
    pub inserted: i32,
    pub updated: i32,
}

/// A job's result. The whole report is stored as the run's `details`.
pub trait JobReport: Serialize {
    fn counters(&self) -> JobCounters {
        JobCounters::default()
    }
}

/// Run `work` between the two writes of its job run.
///
/// A `RUNNING` row is inserted before `work` starts and finalized once when
/// it ends, so a run that crashes midway stays visible as `RUNNING`. A
/// failing job is recorded as `FAILED` with the full error chain and the
/// error is returned to the caller. A failed finalize is logged but does not
/// change the job's outcome.
pub async fn run_ledgered<S, R, F>(
    store: &S,
    job_type: JobType,
    source: Option<Source>,
    work: F,
) -> Result<R>
where
    S: Store + ?Sized,
    R: JobReport,
    F: Future<Output = Result<R>>,
{
    let mut run = JobRun {
        id: 0,
        job_type,
        source,
        status: JobStatus::Running,
        started_at: Utc::now(),
        ended_at: None,
        duration_ms: None,
        discovered_count: 0,
        processed_count: 0,
        inserted_count: 0,
        updated_count: 0,
        error_message: None,
        details: serde_json::json!({}),
    };
    run.id = store
        .start_job_run(&run)
        .await
        .with_context(|| format!("Failed to start {} run", job_type))?;
    debug!("📒 {} run #{} started", job_type, run.id);

    let clock = Instant::now();
    let outcome = work.await;
    let duration_ms = clock.elapsed().as_millis() as i64;

    match &outcome {
        Ok(report) => {
            let counters = report.counters();
            run.status = JobStatus::Success;
            run.discovered_count = counters.discovered;
            run.processed_count = counters.processed;
            run.inserted_count = counters.inserted;
            run.updated_count = counters.updated;
            run.details = serde_json::to_value(report).unwrap_or_default();
        }
        Err(e) => {
            run.status = JobStatus::Failed;
            run.error_message = Some(format!("{:#}", e));
        }
    }
    run.ended_at = Some(Utc::now());
    run.duration_ms = Some(duration_ms);

    match store.finish_job_run(&run).await {
        Ok(true) => info!(
            "📒 {} run #{} finished with {} in {} ms",
            job_type, run.id, run.status, duration_ms
        ),
        Ok(false) => error!("{} run #{} was already finalized", job_type, run.id),
        Err(e) => error!("Failed to finalize {} run #{}: {:#}", job_type, run.id, e),
    }

    if let Err(e) = &outcome {
        warn!("{} failed: {:#}", job_type, e);
    }

    outcome
}
