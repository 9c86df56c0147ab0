//! Engine tuning knobs shared by every target loop.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Cadence and aggregation settings for the evaluation loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Seconds between evaluation ticks.
    pub tick_interval_seconds: u64,
    /// Upper bound on a single metric fetch.
    pub fetch_timeout_seconds: u64,
    /// Samples older than this are unusable.
    pub sample_staleness_seconds: u64,
    /// Fraction of instances that must report for a per-instance
    /// metric to count this tick.
    pub min_sample_fraction: f64,
    /// Observed/target ratios within this band of 1.0 hold the
    /// current scale.
    pub tolerance: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 15,
            fetch_timeout_seconds: 5,
            sample_staleness_seconds: 60,
            min_sample_fraction: 0.5,
            tolerance: 0.10,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_interval_seconds == 0 {
            return Err(EngineError::InvalidSettings(
                "tickIntervalSeconds must be positive".to_string(),
            ));
        }
        if self.fetch_timeout_seconds == 0 {
            return Err(EngineError::InvalidSettings(
                "fetchTimeoutSeconds must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(EngineError::InvalidSettings(format!(
                "tolerance {} outside [0, 1)",
                self.tolerance
            )));
        }
        if !(self.min_sample_fraction > 0.0 && self.min_sample_fraction <= 1.0) {
            return Err(EngineError::InvalidSettings(format!(
                "minSampleFraction {} outside (0, 1]",
                self.min_sample_fraction
            )));
        }
        Ok(())
    }
}
