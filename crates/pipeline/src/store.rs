//! In-memory job table.
//!
//! [`JobStore`] is the only owner of job records. Every operation takes the
//! inner lock for its whole duration, so callers always observe a record
//! either before or after a change, never in between. Callers get cloned
//! snapshots; nothing hands out references into the map.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use restorer_core::error::CoreError;
use restorer_core::job::{Job, JobStatus};
use restorer_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

/// Number of records in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Thread-safe registry of job records.
///
/// Designed to be wrapped in `Arc` and shared between the dispatcher, the
/// status service and the retention sweep.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Processing` record.
    pub async fn create(
        &self,
        id: JobId,
        input_path: PathBuf,
        output_path: PathBuf,
        filename: impl Into<String>,
    ) -> Result<Job, CoreError> {
        self.insert(Job::new(id, input_path, output_path, filename))
            .await
    }

    /// Insert a record built by the caller. It must still be `Processing`.
    ///
    /// A duplicate id means id generation is broken, so it is reported as an
    /// invariant violation rather than a conflict.
    pub async fn insert(&self, job: Job) -> Result<Job, CoreError> {
        if job.status != JobStatus::Processing {
            return Err(CoreError::InvariantViolation(format!(
                "job {} inserted as {}",
                job.id, job.status
            )));
        }
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(CoreError::InvariantViolation(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Move a job into a terminal status.
    ///
    /// `error` is only kept for `Failed`; a failed job always ends up with a
    /// non-empty message.
    pub async fn transition(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(CoreError::job_not_found(id))?;

        if !job.status.can_transition_to(status) {
            return Err(CoreError::Conflict(format!(
                "job {id} cannot move from {} to {status}",
                job.status
            )));
        }

        job.status = status;
        job.finished_at = Some(Utc::now());
        job.error = match status {
            JobStatus::Failed => Some(
                error
                    .filter(|msg| !msg.trim().is_empty())
                    .unwrap_or_else(|| "Restoration failed".to_string()),
            ),
            _ => None,
        };
        Ok(job.clone())
    }

    /// Snapshot of a single record.
    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::job_not_found(id))
    }

    /// Delete a record, leaving its files alone.
    ///
    /// Of several concurrent callers for the same id exactly one gets the
    /// record back; the rest see `NotFound`.
    pub async fn remove(&self, id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .write()
            .await
            .remove(&id)
            .ok_or(CoreError::job_not_found(id))
    }

    /// Drop terminal records that finished before `cutoff`.
    ///
    /// `Processing` records are never pruned; their owning dispatcher task
    /// still has to transition them.
    pub async fn prune_terminal_before(&self, cutoff: Timestamp) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|job| {
                job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff)
            })
            .map(|job| job.id)
            .collect();
        for id in &stale {
            jobs.remove(id);
        }
        stale
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read().await;
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
