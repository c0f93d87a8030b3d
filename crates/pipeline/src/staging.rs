//! Staged artifact files and their lifetime.
//!
//! Every job owns two files in the staging directory:
//!
//! ```text
//! input_<job_id>_<filename>
//! output_<job_id>_<filename>
//! ```
//!
//! The job id in the name keeps concurrent jobs apart even when clients
//! upload identical file names. The staging area does not consult the job
//! store: [`StagingArea::release`] deletes the paths a job record names and
//! [`StagingArea::sweep`] works purely on what is on disk, so a sweep may
//! delete files a live record still points at. Readers treat a missing file as an expired result.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use restorer_core::error::CoreError;
use restorer_core::job::{ArtifactRole, Job};
use restorer_core::types::{JobId, Timestamp};

/// Outcome of one sweep over the staging directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Artifacts scanned (files with an artifact prefix).
    pub scanned: usize,
    /// Artifacts deleted because they were older than the cutoff.
    pub removed: usize,
    /// Expired artifacts that could not be deleted.
    pub failed: usize,
}

/// Owner of the staging directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Open (creating if needed) the staging directory at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            CoreError::Internal(format!(
                "failed to create staging directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for one artifact of a job. Pure; nothing is created.
    ///
    /// `filename` must already be sanitized to a single path component.
    pub fn stage(&self, job_id: JobId, filename: &str, role: ArtifactRole) -> PathBuf {
        self.root
            .join(format!("{}_{job_id}_{filename}", role.prefix()))
    }

    /// Persist uploaded bytes at a staged input path.
    ///
    /// On failure any partially written file is removed before the error is
    /// returned, so a failed submission leaves nothing behind.
    pub async fn write_input(&self, path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
        if let Err(e) = tokio::fs::write(path, bytes).await {
            remove_quietly(path).await;
            return Err(CoreError::Internal(format!(
                "failed to stage upload at {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Delete a single artifact. Already-absent files are not an error.
    pub async fn discard(&self, path: &Path) -> Result<bool, CoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::Internal(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Delete both artifacts of a job.
    ///
    /// Only the two paths recorded on the job are touched. Idempotent:
    /// returns how many files were actually removed, `0` if the job had
    /// nothing left on disk.
    pub async fn release(&self, job: &Job) -> Result<usize, CoreError> {
        let mut removed = 0;
        for path in [&job.input_path, &job.output_path] {
            if self.discard(path).await? {
                removed += 1;
            }
        }

        tracing::debug!(job_id = %job.id, removed, "Released job artifacts");
        Ok(removed)
    }

    /// Delete every artifact last written before `now - retention`.
    ///
    /// Only files carrying an `input_` / `output_` prefix are considered.
    /// Age is taken from the modification time: both artifacts are written
    /// once and never touched again. Failures on individual files are logged
    /// and counted, not returned.
    pub async fn sweep(
        &self,
        now: Timestamp,
        retention: chrono::Duration,
    ) -> Result<SweepReport, CoreError> {
        let cutoff = retention_cutoff(now, retention)?;
        let mut report = SweepReport::default();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_str().is_some_and(is_artifact_name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                // Deleted between read_dir and stat by a concurrent release.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Sweep: stat failed");
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            let Some(written) = written_at(&metadata) else {
                continue;
            };
            if written >= cutoff {
                continue;
            }

            match self.discard(&entry.path()).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Sweep: delete failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Whether a directory entry name looks like a staged artifact.
pub fn is_artifact_name(name: &str) -> bool {
    [ArtifactRole::Input, ArtifactRole::Output]
        .iter()
        .any(|role| {
            name.strip_prefix(role.prefix())
                .is_some_and(|rest| rest.starts_with('_'))
        })
}

/// `now - retention`, or a validation error when that falls outside the
/// representable time range.
pub fn retention_cutoff(
    now: Timestamp,
    retention: chrono::Duration,
) -> Result<Timestamp, CoreError> {
    now.checked_sub_signed(retention).ok_or_else(|| {
        CoreError::Validation(format!(
            "retention of {} minutes is out of range",
            retention.num_minutes()
        ))
    })
}

fn written_at(metadata: &std::fs::Metadata) -> Option<Timestamp> {
    let time: SystemTime = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(time))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
