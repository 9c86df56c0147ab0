//! Planner settings.
//!
//! The flag surface follows cluster-autoscaler conventions: kebab-case
//! keys and duration strings ("10m", "900s"), loadable from TOML.

use serde::{Deserialize, Serialize};

use setpoint_core::time::parse_duration_secs;

use crate::error::{PlanError, PlanResult};
use crate::expander::Expander;

/// Node-group planning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlannerSettings {
    /// Strategy for choosing among feasible scale-up options.
    pub expander: Expander,
    pub scale_down_enabled: bool,
    /// Quiet period after a group grows before its nodes may be
    /// considered for removal.
    pub scale_down_delay_after_add: String,
    /// How long a node must stay under the threshold to become a
    /// removal candidate.
    pub scale_down_unneeded_time: String,
    /// Dominant-resource utilization below which a node counts as
    /// unneeded.
    pub scale_down_utilization_threshold: f64,
    /// How long a requested provision may take before the group is
    /// treated as unhealthy.
    pub max_node_provision_time: String,
    /// Spread chosen deltas across groups with identical shape.
    pub balance_similar_node_groups: bool,
    /// Removal candidates planned per tick, at most.
    pub max_scale_down_parallelism: u32,
    /// Planning loop interval.
    pub scan_interval: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            expander: Expander::LeastWaste,
            scale_down_enabled: true,
            scale_down_delay_after_add: "10m".to_string(),
            scale_down_unneeded_time: "10m".to_string(),
            scale_down_utilization_threshold: 0.5,
            max_node_provision_time: "15m".to_string(),
            balance_similar_node_groups: false,
            max_scale_down_parallelism: 10,
            scan_interval: "10s".to_string(),
        }
    }
}

impl PlannerSettings {
    pub fn from_toml_str(raw: &str) -> PlanResult<Self> {
        let settings: PlannerSettings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> PlanResult<()> {
        for (name, value) in [
            ("scale-down-delay-after-add", &self.scale_down_delay_after_add),
            ("scale-down-unneeded-time", &self.scale_down_unneeded_time),
            ("max-node-provision-time", &self.max_node_provision_time),
            ("scan-interval", &self.scan_interval),
        ] {
            if parse_duration_secs(value).is_none() {
                return Err(PlanError::InvalidSettings(format!(
                    "{name} '{value}' is not a duration"
                )));
            }
        }
        if parse_duration_secs(&self.scan_interval) == Some(0) {
            return Err(PlanError::InvalidSettings(
                "scan-interval must be positive".to_string(),
            ));
        }
        let threshold = self.scale_down_utilization_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(PlanError::InvalidSettings(format!(
                "scale-down-utilization-threshold {threshold} must be in (0, 1)"
            )));
        }
        if self.max_scale_down_parallelism == 0 {
            return Err(PlanError::InvalidSettings(
                "max-scale-down-parallelism must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delay_after_add_secs(&self) -> u64 {
        parse_duration_secs(&self.scale_down_delay_after_add).unwrap_or(600)
    }

    pub fn unneeded_secs(&self) -> u64 {
        parse_duration_secs(&self.scale_down_unneeded_time).unwrap_or(600)
    }

    pub fn provision_secs(&self) -> u64 {
        parse_duration_secs(&self.max_node_provision_time).unwrap_or(900)
    }

    pub fn scan_secs(&self) -> u64 {
        parse_duration_secs(&self.scan_interval).unwrap_or(10)
    }
}
