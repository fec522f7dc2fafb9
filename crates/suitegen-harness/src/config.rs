//! Session configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use suitegen_error::{GenError, Result};

use crate::coverage::CoverageWireFormat;
use crate::extractor::Markers;

pub const DEFAULT_ITERATION_BUDGET: u32 = 20;
pub const DEFAULT_OUTPUT_DIR: &str = "tests";

/// Inputs to a generation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of passes.
    pub iteration_budget: u32,
    /// Directory receiving `test.log.<N>` files.
    pub output_dir: PathBuf,
    /// Remove `output_dir` before the first pass.
    pub reset_output_dir: bool,
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Longest wait for a single harness log record while draining.
    pub drain_timeout_ms: u64,
    pub max_steps_per_pass: u64,
    pub storage_write_attempts: u32,
    /// End the session early once coverage reaches 100%.
    pub stop_on_full_coverage: bool,
    pub coverage_format: CoverageWireFormat,
    pub markers: Markers,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            iteration_budget: DEFAULT_ITERATION_BUDGET,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            reset_output_dir: true,
            start_timeout_ms: 10_000,
            stop_timeout_ms: 10_000,
            drain_timeout_ms: 60_000,
            max_steps_per_pass: 10_000,
            storage_write_attempts: 2,
            stop_on_full_coverage: true,
            coverage_format: CoverageWireFormat::TrailingPercent,
            markers: Markers::default(),
        }
    }
}

impl GenerationConfig {
    /// Read a JSON config file; absent fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|err| {
            GenError::config(format!("{} parse failure: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.iteration_budget == 0 {
            problems.push("iteration_budget must be at least 1");
        }
        if self.start_timeout_ms == 0 || self.stop_timeout_ms == 0 || self.drain_timeout_ms == 0 {
            problems.push("timeouts must be non-zero");
        }
        if self.max_steps_per_pass == 0 {
            problems.push("max_steps_per_pass must be at least 1");
        }
        if self.storage_write_attempts == 0 {
            problems.push("storage_write_attempts must be at least 1");
        }
        if self.markers.run_start.is_empty()
            || self.markers.run_end.is_empty()
            || self.markers.conformance_tag.is_empty()
        {
            problems.push("markers must be non-empty");
        }
        if self.markers.run_start == self.markers.run_end {
            problems.push("run_start and run_end markers must differ");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(GenError::config(problems.join("; ")))
        }
    }

    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
