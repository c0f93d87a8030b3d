//! One reclamation pass: sweep expired artifacts and prune stale records.
//!
//! Called opportunistically by the dispatcher on submission and on a timer
//! by the API's background task. File deletion and record pruning are
//! independent: a file is swept by age whether or not its record still
//! exists, and a terminal record is pruned by age whether or not its files
//! are still on disk.

use restorer_core::error::CoreError;
use restorer_core::types::Timestamp;

use crate::staging::{retention_cutoff, StagingArea};
use crate::store::JobStore;

/// Totals from one [`reclaim`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub files_removed: usize,
    pub files_failed: usize,
    pub records_pruned: usize,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.files_removed == 0 && self.files_failed == 0 && self.records_pruned == 0
    }
}

/// Reclaim everything older than `now - retention`.
///
/// A retention window that reaches before the earliest representable time
/// is a `Validation` error and nothing is reclaimed.
pub async fn reclaim(
    staging: &StagingArea,
    store: &JobStore,
    now: Timestamp,
    retention: chrono::Duration,
) -> Result<RetentionReport, CoreError> {
    let cutoff = retention_cutoff(now, retention)?;
    let sweep = staging.sweep(now, retention).await?;
    let pruned = store.prune_terminal_before(cutoff).await;

    for id in &pruned {
        tracing::debug!(job_id = %id, "Pruned expired job record");
    }

    Ok(RetentionReport {
        files_removed: sweep.removed,
        files_failed: sweep.failed,
        records_pruned: pruned.len(),
    })
}
