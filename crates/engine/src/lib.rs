//! Restoration engine adapters.
//!
//! The model that actually restores faces is an opaque external program.
//! This crate puts it behind [`RestorationEngine`], a synchronous contract:
//! read an image from one path, write the result to another, report success.
//! Calls may take minutes and must be run on a blocking thread by the caller.

pub mod command;
pub mod error;
pub mod passthrough;

use std::path::Path;

pub use command::CommandEngine;
pub use error::EngineError;
pub use passthrough::PassthroughEngine;

/// Uniform synchronous contract over a restoration model.
///
/// `Ok(true)` means the engine believes it wrote `output`; `Ok(false)` means
/// it ran but produced nothing (for example no face was found). Callers must
/// still confirm the output file exists before trusting either answer.
pub trait RestorationEngine: Send + Sync {
    fn process(&self, input: &Path, output: &Path) -> Result<bool, EngineError>;

    /// Short name used in log fields.
    fn name(&self) -> &'static str;
}
