use std::fmt;

/// Errors an engine call can raise.
#[derive(Debug)]
pub enum EngineError {
    /// The configured engine program does not exist.
    NotFound(String),
    /// The engine ran and exited unsuccessfully.
    ExecutionFailed {
        /// Process exit code (`-1` if killed by signal).
        exit_code: i32,
        /// Captured stderr output, truncated.
        stderr: String,
    },
    /// The engine could not read or write an artifact.
    Io(std::io::Error),
    /// Any other failure reported by an in-process engine.
    Other(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(program) => write!(f, "Engine program not found: {program}"),
            Self::ExecutionFailed { exit_code, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    write!(f, "Engine exited with code {exit_code}")
                } else {
                    write!(f, "Engine exited with code {exit_code}: {stderr}")
                }
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
