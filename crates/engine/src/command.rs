//! Engine backed by an external program.
//!
//! The program is run once per job with an argument template in which
//! `{input}` and `{output}` are replaced by the staged artifact paths. A
//! typical deployment points this at the GFPGAN inference script:
//!
//! ```text
//! ENGINE_PROGRAM=python3
//! ENGINE_ARGS=inference_gfpgan.py --upscale 2 --arch clean -i {input} -o {output}
//! ```
//!
//! The call blocks the current thread until the program exits; there is no
//! timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::error::EngineError;
use crate::RestorationEngine;

/// Placeholder replaced by the input artifact path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced by the output artifact path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Maximum stderr captured from the engine (64 KiB).
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Runs a configured program to restore each image.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build an engine from a whitespace-separated argument template.
    pub fn from_template(program: impl Into<String>, template: &str) -> Self {
        Self::new(
            program,
            template.split_whitespace().map(str::to_string).collect(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders substituted for one job.
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

impl RestorationEngine for CommandEngine {
    fn process(&self, input: &Path, output: &Path) -> Result<bool, EngineError> {
        let args = self.render_args(input, output);
        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::NotFound(self.program.clone()),
                _ => EngineError::Io(e),
            })?;

        // Drain stderr to EOF before waiting. Only the first
        // MAX_STDERR_BYTES are kept; the rest is discarded so the pipe stays
        // open and a chatty engine never blocks or dies on a closed pipe.
        let mut stderr = Vec::new();
        if let Some(mut handle) = child.stderr.take() {
            let _ = (&mut handle).take(MAX_STDERR_BYTES).read_to_end(&mut stderr);
            let _ = std::io::copy(&mut handle, &mut std::io::sink());
        }

        let status = child.wait()?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if status.success() {
            tracing::debug!(program = %self.program, duration_ms, "Engine finished");
            return Ok(true);
        }

        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!(program = %self.program, exit_code, duration_ms, "Engine failed");
        Err(EngineError::ExecutionFailed {
            exit_code,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
