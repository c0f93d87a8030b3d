//! Read side of the job lifecycle.
//!
//! [`StatusService`] answers status polls and hands out results. Reading a
//! terminal job can consume it: the record removal is the one atomic step,
//! so when two pollers race for the same finished job exactly one gets the
//! outcome and the other gets `NotFound`.
//!
//! Behaviour per delivery mode:
//!
//! | State       | `SingleRead`                           | `MultiRead`                       |
//! |-------------|----------------------------------------|-----------------------------------|
//! | processing  | elapsed time                           | elapsed time                      |
//! | failed      | error; record and files removed        | error; record removed, files kept |
//! | completed   | bytes inline; record and files removed | reference; everything kept        |

use std::sync::Arc;

use chrono::Utc;
use restorer_core::error::CoreError;
use restorer_core::job::{DeliveryMode, Job, JobStatus};
use restorer_core::types::JobId;

use crate::staging::StagingArea;
use crate::store::JobStore;

/// A restored image ready to send to a client.
#[derive(Debug, Clone)]
pub struct RestoredImage {
    pub job_id: JobId,
    /// Name the client originally uploaded.
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl RestoredImage {
    /// Suggested file name for the download.
    pub fn download_name(&self) -> String {
        format!("restored_{}", self.filename)
    }
}

/// How a completed job is reported.
#[derive(Debug, Clone)]
pub enum ResultDelivery {
    /// The result itself; the job has been consumed.
    Inline(RestoredImage),
    /// A pointer to a result that can be fetched repeatedly.
    Reference { job_id: JobId, filename: String },
}

/// Answer to a status poll.
#[derive(Debug, Clone)]
pub enum StatusReport {
    Processing { job_id: JobId, elapsed_secs: u64 },
    Completed(ResultDelivery),
    Failed { job_id: JobId, error: String },
}

impl StatusReport {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Processing { .. } => JobStatus::Processing,
            Self::Completed(_) => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Status and result protocol consumed by the HTTP layer.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<JobStore>,
    staging: Arc<StagingArea>,
    mode: DeliveryMode,
}

impl StatusService {
    pub fn new(store: Arc<JobStore>, staging: Arc<StagingArea>, mode: DeliveryMode) -> Self {
        Self {
            store,
            staging,
            mode,
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Report the state of a job, consuming it where the mode says so.
    pub async fn get_status(&self, id: JobId) -> Result<StatusReport, CoreError> {
        let job = self.store.get(id).await?;

        match job.status {
            JobStatus::Processing => Ok(StatusReport::Processing {
                job_id: id,
                elapsed_secs: job.elapsed_secs(Utc::now()),
            }),
            JobStatus::Failed => {
                let job = self.store.remove(id).await?;
                if self.mode == DeliveryMode::SingleRead {
                    self.release(&job).await;
                }
                tracing::info!(job_id = %id, "Failed job reported");
                Ok(StatusReport::Failed {
                    job_id: id,
                    error: failure_message(&job),
                })
            }
            JobStatus::Completed => match self.mode {
                DeliveryMode::SingleRead => match self.consume_result(&job).await {
                    Ok(image) => Ok(StatusReport::Completed(ResultDelivery::Inline(image))),
                    Err(CoreError::Artifact(error)) => {
                        Ok(StatusReport::Failed { job_id: id, error })
                    }
                    Err(e) => Err(e),
                },
                DeliveryMode::MultiRead => {
                    if artifact_exists(&job).await {
                        Ok(StatusReport::Completed(ResultDelivery::Reference {
                            job_id: id,
                            filename: job.original_filename,
                        }))
                    } else {
                        self.expire(&job).await?;
                        Ok(StatusReport::Failed {
                            job_id: id,
                            error: expired_message(id),
                        })
                    }
                }
            },
        }
    }

    /// Bytes of a completed job.
    ///
    /// Consumes the job in single-read mode; repeatable in multi-read mode.
    /// A job still processing is a `Conflict`; a failed one has no result and
    /// is `NotFound`.
    pub async fn read_result(&self, id: JobId) -> Result<RestoredImage, CoreError> {
        let job = self.completed_job(id).await?;
        match self.mode {
            DeliveryMode::SingleRead => self.consume_result(&job).await,
            DeliveryMode::MultiRead => match tokio::fs::read(&job.output_path).await {
                Ok(bytes) => Ok(restored(&job, bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.expire(&job).await?;
                    Err(CoreError::Artifact(expired_message(id)))
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Consume a finished job regardless of delivery mode.
    ///
    /// Used when the client waited on the job in a single request and will
    /// not come back for it. A failed job yields its error as
    /// [`CoreError::Engine`].
    pub async fn take_result(&self, id: JobId) -> Result<RestoredImage, CoreError> {
        let job = self.store.get(id).await?;
        match job.status {
            JobStatus::Processing => Err(still_processing(id)),
            JobStatus::Failed => {
                let job = self.store.remove(id).await?;
                self.release(&job).await;
                Err(CoreError::Engine(failure_message(&job)))
            }
            JobStatus::Completed => self.consume_result(&job).await,
        }
    }

    /// Drop a job and its artifacts, whatever its state.
    ///
    /// A job still processing keeps running; its files are recreated by the
    /// engine and left for the sweep.
    pub async fn discard(&self, id: JobId) -> Result<(), CoreError> {
        let job = self.store.remove(id).await?;
        self.release(&job).await;
        tracing::info!(job_id = %id, status = %job.status, "Job discarded");
        Ok(())
    }

    async fn completed_job(&self, id: JobId) -> Result<Job, CoreError> {
        let job = self.store.get(id).await?;
        match job.status {
            JobStatus::Completed => Ok(job),
            JobStatus::Processing => Err(still_processing(id)),
            JobStatus::Failed => Err(CoreError::job_not_found(id)),
        }
    }

    /// Remove the record, read the output, then delete the files.
    ///
    /// The record goes first so a concurrent reader cannot also win.
    async fn consume_result(&self, job: &Job) -> Result<RestoredImage, CoreError> {
        self.store.remove(job.id).await?;
        let read = tokio::fs::read(&job.output_path).await;
        self.release(job).await;

        match read {
            Ok(bytes) => {
                tracing::info!(job_id = %job.id, bytes = bytes.len(), "Result delivered");
                Ok(restored(job, bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(job_id = %job.id, "Completed job lost its output");
                Err(CoreError::Artifact(expired_message(job.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a completed record whose output has vanished.
    async fn expire(&self, job: &Job) -> Result<(), CoreError> {
        tracing::warn!(job_id = %job.id, "Completed job lost its output");
        match self.store.remove(job.id).await {
            Ok(_) => {}
            // Another reader expired it first.
            Err(CoreError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.release(job).await;
        Ok(())
    }

    async fn release(&self, job: &Job) {
        if let Err(e) = self.staging.release(job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to release job artifacts");
        }
    }
}

async fn artifact_exists(job: &Job) -> bool {
    tokio::fs::try_exists(&job.output_path)
        .await
        .unwrap_or(false)
}

fn restored(job: &Job, bytes: Vec<u8>) -> RestoredImage {
    RestoredImage {
        job_id: job.id,
        filename: job.original_filename.clone(),
        content_type: job.content_type,
        bytes,
    }
}

fn failure_message(job: &Job) -> String {
    job.error
        .clone()
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| "Restoration failed".to_string())
}

fn expired_message(id: JobId) -> String {
    format!("Restored image for job {id} is no longer available")
}

fn still_processing(id: JobId) -> CoreError {
    CoreError::Conflict(format!("Job {id} is still processing"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use restorer_core::job::ArtifactRole;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<JobStore>,
        staging: Arc<StagingArea>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let staging = Arc::new(StagingArea::open(dir.path()).await.unwrap());
            Self {
                _dir: dir,
                store: Arc::new(JobStore::new()),
                staging,
            }
        }

        fn service(&self, mode: DeliveryMode) -> StatusService {
            StatusService::new(Arc::clone(&self.store), Arc::clone(&self.staging), mode)
        }

        /// Seed a job in `status`, writing its output when completed.
        async fn job(&self, status: JobStatus) -> JobId {
            let id = JobId::new();
            let input = self.staging.stage(id, "portrait.jpg", ArtifactRole::Input);
            let output = self.staging.stage(id, "portrait.jpg", ArtifactRole::Output);
            self.staging.write_input(&input, b"raw").await.unwrap();
            self.store
                .create(id, input, output.clone(), "portrait.jpg")
                .await
                .unwrap();

            match status {
                JobStatus::Processing => {}
                JobStatus::Completed => {
                    std::fs::write(&output, b"restored").unwrap();
                    self.store.transition(id, status, None).await.unwrap();
                }
                JobStatus::Failed => {
                    self.store
                        .transition(id, status, Some("engine exploded".into()))
                        .await
                        .unwrap();
                }
            }
            id
        }

        fn files(&self) -> usize {
            std::fs::read_dir(self.staging.root()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let fx = Fixture::new().await;
        let result = fx.service(DeliveryMode::SingleRead).get_status(JobId::new()).await;
        assert_matches!(result, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn processing_reports_elapsed_and_keeps_record() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Processing).await;
        let service = fx.service(DeliveryMode::SingleRead);

        let report = service.get_status(id).await.unwrap();
        assert_matches!(report, StatusReport::Processing { job_id, .. } if job_id == id);
        assert!(service.get_status(id).await.is_ok());
    }

    #[tokio::test]
    async fn single_read_delivers_once() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let service = fx.service(DeliveryMode::SingleRead);

        let first = service.get_status(id).await.unwrap();
        assert_matches!(
            first,
            StatusReport::Completed(ResultDelivery::Inline(ref image))
                if image.bytes == b"restored" && image.content_type == "image/jpeg"
        );
        assert_matches!(service.get_status(id).await, Err(CoreError::NotFound { .. }));
        assert_eq!(fx.files(), 0);
    }

    #[tokio::test]
    async fn multi_read_keeps_result_available() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let service = fx.service(DeliveryMode::MultiRead);

        for _ in 0..3 {
            assert_matches!(
                service.get_status(id).await.unwrap(),
                StatusReport::Completed(ResultDelivery::Reference { .. })
            );
            assert_eq!(service.read_result(id).await.unwrap().bytes, b"restored");
        }
        assert_eq!(fx.files(), 2);
    }

    #[tokio::test]
    async fn failed_is_reported_once() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Failed).await;
        let service = fx.service(DeliveryMode::SingleRead);

        assert_matches!(
            service.get_status(id).await.unwrap(),
            StatusReport::Failed { ref error, .. } if error == "engine exploded"
        );
        assert_matches!(service.get_status(id).await, Err(CoreError::NotFound { .. }));
        assert_eq!(fx.files(), 0);
    }

    #[tokio::test]
    async fn multi_read_failure_leaves_files_for_the_sweep() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Failed).await;
        let service = fx.service(DeliveryMode::MultiRead);

        assert_matches!(service.get_status(id).await.unwrap(), StatusReport::Failed { .. });
        assert_matches!(service.get_status(id).await, Err(CoreError::NotFound { .. }));
        assert_eq!(fx.files(), 1);
    }

    #[tokio::test]
    async fn swept_result_is_never_served() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let job = fx.store.get(id).await.unwrap();
        fx.staging.release(&job).await.unwrap();

        for mode in [DeliveryMode::SingleRead, DeliveryMode::MultiRead] {
            let service = fx.service(mode);
            match service.get_status(id).await {
                Ok(StatusReport::Failed { error, .. }) => assert!(!error.is_empty()),
                Err(CoreError::NotFound { .. }) => {}
                other => panic!("stale result served: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn result_is_served_with_recorded_content_type() {
        let fx = Fixture::new().await;
        let id = JobId::new();
        let output = fx.staging.stage(id, "portrait.jpg", ArtifactRole::Output);
        std::fs::write(&output, b"png bytes").unwrap();
        let job = Job::new(
            id,
            fx.staging.stage(id, "portrait.jpg", ArtifactRole::Input),
            output,
            "portrait.jpg",
        )
        .with_content_type("image/png");
        fx.store.insert(job).await.unwrap();
        fx.store.transition(id, JobStatus::Completed, None).await.unwrap();

        let image = fx.service(DeliveryMode::MultiRead).read_result(id).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.filename, "portrait.jpg");
    }

    #[tokio::test]
    async fn read_result_while_processing_is_conflict() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Processing).await;
        let result = fx.service(DeliveryMode::MultiRead).read_result(id).await;
        assert_matches!(result, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn take_result_consumes_in_multi_read_mode() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let service = fx.service(DeliveryMode::MultiRead);

        let image = service.take_result(id).await.unwrap();
        assert_eq!(image.download_name(), "restored_portrait.jpg");
        assert_matches!(service.get_status(id).await, Err(CoreError::NotFound { .. }));
        assert_eq!(fx.files(), 0);
    }

    #[tokio::test]
    async fn take_result_surfaces_engine_failure() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Failed).await;
        let result = fx.service(DeliveryMode::SingleRead).take_result(id).await;
        assert_matches!(result, Err(CoreError::Engine(ref msg)) if msg == "engine exploded");
    }

    #[tokio::test]
    async fn discard_removes_record_and_files() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let service = fx.service(DeliveryMode::MultiRead);

        service.discard(id).await.unwrap();
        assert_eq!(fx.files(), 0);
        assert_matches!(service.discard(id).await, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_single_reads_deliver_once() {
        let fx = Fixture::new().await;
        let id = fx.job(JobStatus::Completed).await;
        let service = fx.service(DeliveryMode::SingleRead);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move { service.get_status(id).await }));
        }

        let mut delivered = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(StatusReport::Completed(ResultDelivery::Inline(_))) => delivered += 1,
                Err(CoreError::NotFound { .. }) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(delivered, 1);
    }
}
