//! Job dispatcher.
//!
//! [`Dispatcher::submit`] validates and stages an upload, records the job,
//! and returns as soon as the record exists. The engine call happens later
//! on a tracked task that first waits for a worker permit and then runs the
//! engine on tokio's blocking thread pool, so a slow restoration never holds
//! up request handling. Whatever the engine does (succeeds, reports failure,
//! returns an error, panics) the job ends up `Completed` or `Failed`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use restorer_core::error::CoreError;
use restorer_core::job::{ArtifactRole, Job, JobStatus};
use restorer_core::types::JobId;
use restorer_core::upload::validate_upload;
use restorer_engine::{EngineError, RestorationEngine};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::retention;
use crate::staging::StagingArea;
use crate::store::JobStore;

/// Message recorded when the engine ran but reported no result.
const MSG_ENGINE_DECLINED: &str = "Restoration engine could not restore this image";

/// Message recorded when the engine claimed success but wrote nothing.
const MSG_OUTPUT_MISSING: &str = "Restoration finished without producing an output image";

// ---------------------------------------------------------------------------
// Job handle
// ---------------------------------------------------------------------------

/// Handle to a submitted job.
///
/// Dropping the handle detaches from the job; it keeps running and is still
/// tracked by the dispatcher for shutdown.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    task: JoinHandle<JobStatus>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait(self) -> JobStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(job_id = %self.id, error = %e, "Job task did not complete");
                JobStatus::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Launches restoration work off the request path.
///
/// Cheap to clone; clones share the same worker pool and task tracker.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<JobStore>,
    staging: Arc<StagingArea>,
    engine: Arc<dyn RestorationEngine>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    pool_size: usize,
    retention: chrono::Duration,
    sweep_on_submit: bool,
    sweep_running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        staging: Arc<StagingArea>,
        engine: Arc<dyn RestorationEngine>,
        config: &PipelineConfig,
    ) -> Self {
        let pool_size = config.worker_pool_size.max(1);
        tracing::info!(
            pool_size,
            engine = engine.name(),
            staging_dir = %staging.root().display(),
            "Job dispatcher ready",
        );
        Self {
            store,
            staging,
            engine,
            permits: Arc::new(Semaphore::new(pool_size)),
            tracker: TaskTracker::new(),
            pool_size,
            retention: config.retention(),
            sweep_on_submit: config.sweep_on_submit,
            sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept an upload and start restoring it in the background.
    ///
    /// Either the job is staged, recorded and scheduled, or an error is
    /// returned and nothing is left behind: an invalid upload is rejected
    /// before any file is written, and a failure after staging removes the
    /// staged files again.
    pub async fn submit(&self, bytes: &[u8], filename: &str) -> Result<JobHandle, CoreError> {
        let upload = validate_upload(filename, bytes)?;

        if self.tracker.is_closed() {
            return Err(CoreError::Conflict(
                "Service is shutting down and not accepting new jobs".into(),
            ));
        }

        let id = JobId::new();
        let input_path = self.staging.stage(id, &upload.filename, ArtifactRole::Input);
        let output_path = self.staging.stage(id, &upload.filename, ArtifactRole::Output);

        self.staging.write_input(&input_path, bytes).await?;

        let job = Job::new(id, input_path, output_path, upload.filename.as_str())
            .with_content_type(upload.content_type());
        let job = match self.store.insert(job.clone()).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record job");
                if let Err(cleanup) = self.staging.release(&job).await {
                    tracing::warn!(job_id = %id, error = %cleanup, "Failed to clean up staged upload");
                }
                return Err(e);
            }
        };

        tracing::info!(
            job_id = %id,
            filename = %upload.filename,
            width = upload.width,
            height = upload.height,
            bytes = bytes.len(),
            queued = self.pool_size.saturating_sub(self.permits.available_permits()),
            "Job submitted",
        );

        if self.sweep_on_submit {
            self.spawn_sweep();
        }

        let task = self.tracker.spawn(run_job(
            Arc::clone(&self.store),
            Arc::clone(&self.staging),
            Arc::clone(&self.engine),
            Arc::clone(&self.permits),
            job,
        ));

        Ok(JobHandle { id, task })
    }

    /// Jobs (and opportunistic sweeps) that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Worker slots not currently running an engine call.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stop accepting jobs and wait up to `grace` for in-flight work.
    ///
    /// Returns how many tracked tasks were still running when the grace
    /// period ran out. Those are abandoned, not killed: engine calls already
    /// on the blocking pool cannot be interrupted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending == 0 {
            return 0;
        }

        tracing::info!(pending, grace_secs = grace.as_secs(), "Waiting for in-flight jobs");
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                let abandoned = self.tracker.len();
                tracing::warn!(abandoned, "Grace period elapsed, abandoning in-flight jobs");
                abandoned
            }
        }
    }

    /// Run one reclamation pass in the background unless one is running.
    fn spawn_sweep(&self) {
        if self.sweep_running.swap(true, Ordering::AcqRel) {
            return;
        }

        let guard = SweepGuard(Arc::clone(&self.sweep_running));
        let staging = Arc::clone(&self.staging);
        let store = Arc::clone(&self.store);
        let retention = self.retention;

        self.tracker.spawn(async move {
            let _guard = guard;
            match retention::reclaim(&staging, &store, Utc::now(), retention).await {
                Ok(report) if report.is_empty() => {
                    tracing::trace!("Opportunistic sweep: nothing to reclaim");
                }
                Ok(report) => {
                    tracing::info!(
                        files_removed = report.files_removed,
                        files_failed = report.files_failed,
                        records_pruned = report.records_pruned,
                        "Opportunistic sweep reclaimed artifacts",
                    );
                }
                Err(e) => tracing::error!(error = %e, "Opportunistic sweep failed"),
            }
        });
    }
}

/// Clears the sweep-in-progress flag when the sweep task ends, including by
/// panic or cancellation.
struct SweepGuard(Arc<AtomicBool>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Job execution
// ---------------------------------------------------------------------------

/// Body of one tracked job task: wait for a worker, run the engine, record
/// the outcome. Never panics and always leaves the job terminal.
async fn run_job(
    store: Arc<JobStore>,
    staging: Arc<StagingArea>,
    engine: Arc<dyn RestorationEngine>,
    permits: Arc<Semaphore>,
    job: Job,
) -> JobStatus {
    let outcome = match permits.acquire_owned().await {
        Ok(_permit) => {
            let start = Instant::now();
            let input = job.input_path.clone();
            let output = job.output_path.clone();
            let engine = Arc::clone(&engine);

            let result =
                tokio::task::spawn_blocking(move || engine.process(&input, &output)).await;
            let outcome = evaluate(result, &job.output_path).await;

            tracing::debug!(
                job_id = %job.id,
                duration_ms = start.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "Engine call returned",
            );
            outcome
        }
        Err(_) => Err(CoreError::Internal("worker pool is closed".into())),
    };

    match outcome {
        Ok(()) => record(&store, &job, JobStatus::Completed, None).await,
        Err(e) => {
            // A failed job must never expose a half-written result.
            if let Err(cleanup) = staging.discard(&job.output_path).await {
                tracing::warn!(job_id = %job.id, error = %cleanup, "Failed to remove partial output");
            }
            let message = match e {
                CoreError::Engine(msg) | CoreError::Artifact(msg) => msg,
                other => other.to_string(),
            };
            record(&store, &job, JobStatus::Failed, Some(message)).await
        }
    }
}

/// Map an engine result onto the job outcome.
///
/// Success requires both a truthy answer from the engine and a non-empty
/// output file on disk.
async fn evaluate(
    result: Result<Result<bool, EngineError>, JoinError>,
    output: &Path,
) -> Result<(), CoreError> {
    match result {
        Ok(Ok(true)) => match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            _ => Err(CoreError::Artifact(MSG_OUTPUT_MISSING.into())),
        },
        Ok(Ok(false)) => Err(CoreError::Engine(MSG_ENGINE_DECLINED.into())),
        Ok(Err(e)) => Err(CoreError::Engine(e.to_string())),
        Err(join) if join.is_panic() => Err(CoreError::Engine(format!(
            "engine panicked: {}",
            panic_message(join)
        ))),
        Err(join) => Err(CoreError::Engine(format!("engine task aborted: {join}"))),
    }
}

async fn record(
    store: &JobStore,
    job: &Job,
    status: JobStatus,
    error: Option<String>,
) -> JobStatus {
    match store.transition(job.id, status, error.clone()).await {
        Ok(_) => {
            match &error {
                Some(error) => tracing::warn!(job_id = %job.id, %error, "Job failed"),
                None => tracing::info!(job_id = %job.id, "Job completed"),
            }
            status
        }
        Err(e) => {
            // Only reachable if someone removed the record mid-flight.
            tracing::error!(job_id = %job.id, %status, error = %e, "Failed to record job outcome");
            status
        }
    }
}

fn panic_message(join: JoinError) -> String {
    let payload = join.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
