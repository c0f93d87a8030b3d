use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use restorer_core::error::CoreError;
use restorer_core::job::DeliveryMode;

/// Upper bound on `RETENTION_MINUTES` (ten years).
pub const MAX_RETENTION_MINUTES: u64 = 10 * 365 * 24 * 60;

/// Orchestration settings loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding staged `input_*` / `output_*` artifacts.
    pub staging_dir: PathBuf,
    /// Maximum artifact age before the sweep deletes it.
    pub retention_minutes: u64,
    /// Maximum number of engine calls running at once.
    pub worker_pool_size: usize,
    /// Keep-alive period for restore-and-wait clients.
    pub heartbeat_interval_secs: u64,
    /// Whether completed results are consumed on first read.
    pub delivery_mode: DeliveryMode,
    /// Run a sweep in the background whenever a job is submitted.
    pub sweep_on_submit: bool,
    /// Period of the dedicated sweep task; `0` disables it.
    pub sweep_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("staging"),
            retention_minutes: 60,
            worker_pool_size: 2,
            heartbeat_interval_secs: 30,
            delivery_mode: DeliveryMode::SingleRead,
            sweep_on_submit: true,
            sweep_interval_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default       |
    /// |---------------------------|---------------|
    /// | `STAGING_DIR`             | `staging`     |
    /// | `RETENTION_MINUTES`       | `60`          |
    /// | `WORKER_POOL_SIZE`        | `2`           |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`          |
    /// | `RESULT_DELIVERY`         | `single-read` |
    /// | `SWEEP_ON_SUBMIT`         | `true`        |
    /// | `SWEEP_INTERVAL_SECS`     | `300`         |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let staging_dir = std::env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.staging_dir);

        let config = Self {
            staging_dir,
            retention_minutes: env_or("RETENTION_MINUTES", defaults.retention_minutes)?,
            worker_pool_size: env_or("WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            heartbeat_interval_secs: env_or(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            delivery_mode: env_or("RESULT_DELIVERY", defaults.delivery_mode)?,
            sweep_on_submit: env_or("SWEEP_ON_SUBMIT", defaults.sweep_on_submit)?,
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retention_minutes == 0 {
            return Err(CoreError::Validation(
                "RETENTION_MINUTES must be at least 1".into(),
            ));
        }
        if self.retention_minutes > MAX_RETENTION_MINUTES {
            return Err(CoreError::Validation(format!(
                "RETENTION_MINUTES must be at most {MAX_RETENTION_MINUTES}"
            )));
        }
        if self.worker_pool_size == 0 {
            return Err(CoreError::Validation(
                "WORKER_POOL_SIZE must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(CoreError::Validation(
                "HEARTBEAT_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Retention window, clamped to [`MAX_RETENTION_MINUTES`].
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retention_minutes.min(MAX_RETENTION_MINUTES) as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// `None` when the dedicated sweep task is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Validation(format!("{key} is invalid ('{raw}'): {e}"))),
        Err(_) => Ok(default),
    }
}
