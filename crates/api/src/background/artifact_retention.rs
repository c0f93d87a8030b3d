//! Periodic reclamation of staged artifacts and stale job records.
//!
//! Complements the opportunistic sweep the dispatcher runs on submission,
//! so expired files are removed even when no new jobs arrive. Runs on a
//! fixed interval using `tokio::time::interval`; the first pass happens
//! immediately at startup and clears leftovers from a previous run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use restorer_pipeline::retention;
use restorer_pipeline::{JobStore, StagingArea};
use tokio_util::sync::CancellationToken;

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    staging: Arc<StagingArea>,
    store: Arc<JobStore>,
    retention: chrono::Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_minutes = retention.num_minutes(),
        interval_secs = every.as_secs(),
        "Artifact retention job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Artifact retention job stopping");
                break;
            }
            _ = interval.tick() => {
                match retention::reclaim(&staging, &store, Utc::now(), retention).await {
                    Ok(report) if report.is_empty() => {
                        tracing::debug!("Artifact retention: nothing to reclaim");
                    }
                    Ok(report) => {
                        tracing::info!(
                            files_removed = report.files_removed,
                            files_failed = report.files_failed,
                            records_pruned = report.records_pruned,
                            "Artifact retention: reclaimed expired artifacts"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Artifact retention: sweep failed");
                    }
                }
            }
        }
    }
}
