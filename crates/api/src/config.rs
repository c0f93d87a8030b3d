use restorer_core::error::CoreError;
use restorer_pipeline::PipelineConfig;

/// Default argument template for the engine program.
pub const DEFAULT_ENGINE_ARGS: &str = "{input} {output}";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which restoration engine to run and how.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Engine executable; `None` selects the passthrough engine.
    pub program: Option<String>,
    /// Argument template with `{input}` and `{output}` placeholders.
    pub args: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// Time allowed to produce a response head, in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 20 MiB).
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
    pub engine: EngineSettings,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `8000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `MAX_UPLOAD_BYTES`      | `20971520`              |
    /// | `LOG_FORMAT`            | `text`                  |
    /// | `ENGINE_PROGRAM`        | unset (passthrough)     |
    /// | `ENGINE_ARGS`           | `{input} {output}`      |
    ///
    /// Pipeline settings are read by [`PipelineConfig::from_env`].
    pub fn from_env() -> Result<Self, CoreError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_env("PORT", 8000)?;

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", 30)?;
        let shutdown_timeout_secs: u64 = parse_env("SHUTDOWN_TIMEOUT_SECS", 30)?;
        let max_upload_bytes: usize = parse_env("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?;

        let log_format = match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(v) if v.is_empty() || v.eq_ignore_ascii_case("text") => LogFormat::Text,
            Ok(v) => {
                return Err(CoreError::Validation(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{v}'"
                )))
            }
            Err(_) => LogFormat::Text,
        };

        let engine = EngineSettings {
            program: std::env::var("ENGINE_PROGRAM")
                .ok()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            args: std::env::var("ENGINE_ARGS").unwrap_or_else(|_| DEFAULT_ENGINE_ARGS.into()),
        };

        let pipeline = PipelineConfig::from_env()?;

        if max_upload_bytes == 0 {
            return Err(CoreError::Validation(
                "MAX_UPLOAD_BYTES must be greater than zero".into(),
            ));
        }

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            log_format,
            engine,
            pipeline,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}
