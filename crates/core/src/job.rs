//! Job record and lifecycle rules.
//!
//! A job moves `Processing -> Completed` or `Processing -> Failed` exactly
//! once. [`JobStatus::can_transition_to`] is the single place that encodes
//! this; the store consults it before every write.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};
use crate::upload::content_type_for_filename;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Wire name used in status responses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Completed) | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Artifact roles
// ---------------------------------------------------------------------------

/// Which side of the restoration a staged file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    Input,
    Output,
}

impl ArtifactRole {
    /// File name prefix for staged artifacts of this role.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery mode
// ---------------------------------------------------------------------------

/// How completed results are handed back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The first successful retrieval deletes the record and its files.
    #[default]
    SingleRead,
    /// Record and files persist until the retention sweep reclaims them.
    MultiRead,
}

impl FromStr for DeliveryMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single-read" | "single_read" | "single" => Ok(Self::SingleRead),
            "multi-read" | "multi_read" | "multi" => Ok(Self::MultiRead),
            other => Err(CoreError::Validation(format!(
                "Unknown delivery mode '{other}'. Must be one of: single-read, multi-read"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// One submitted restoration request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Sanitized name the client uploaded; reused when naming the result.
    pub original_filename: String,
    /// MIME type the result is served with.
    pub content_type: &'static str,
    pub created_at: Timestamp,
    /// Set when the job reaches a terminal status.
    pub finished_at: Option<Timestamp>,
    /// Only populated for `Failed` jobs.
    pub error: Option<String>,
}

impl Job {
    /// Build a fresh `Processing` record.
    ///
    /// The content type is guessed from the file name until
    /// [`Job::with_content_type`] sets the sniffed one.
    pub fn new(
        id: JobId,
        input_path: PathBuf,
        output_path: PathBuf,
        original_filename: impl Into<String>,
    ) -> Self {
        let original_filename = original_filename.into();
        Self {
            id,
            status: JobStatus::Processing,
            input_path,
            output_path,
            content_type: content_type_for_filename(&original_filename),
            original_filename,
            created_at: chrono::Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    /// Seconds since submission, never negative.
    pub fn elapsed_secs(&self, now: Timestamp) -> u64 {
        (now - self.created_at).num_seconds().max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
