//! Engine that copies its input unchanged.
//!
//! Used when no engine program is configured so the service can be run and
//! exercised end to end without a GPU or model weights.

use std::path::Path;

use crate::error::EngineError;
use crate::RestorationEngine;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

impl RestorationEngine for PassthroughEngine {
    fn process(&self, input: &Path, output: &Path) -> Result<bool, EngineError> {
        std::fs::copy(input, output)?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
