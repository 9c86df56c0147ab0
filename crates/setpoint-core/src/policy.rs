//! Declarative scaling policy attached to a target.
//!
//! Serialized field names follow the conventional autoscaling surface
//! (camelCase fields, PascalCase kinds) so specs round-trip unchanged
//! from the orchestrator's JSON. Every spec is validated on attach;
//! invalid specs never reach a control loop.

use serde::{Deserialize, Serialize};

use crate::error::{SpecError, SpecResult};
use crate::types::{MetricId, TargetId};

/// Longest accepted stabilization window (seconds).
pub const MAX_STABILIZATION_WINDOW_SECS: u64 = 3600;

/// Accepted range for a policy rule's period (seconds).
pub const POLICY_PERIOD_SECS: std::ops::RangeInclusive<u64> = 1..=1800;

// ── Metrics ───────────────────────────────────────────────────────

/// How a metric series is identified at the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricIdentifier {
    pub name: String,
    /// Optional label selector forwarded to the metrics source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Desired value for one metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum MetricTarget {
    /// Percent of requested capacity, averaged across instances.
    Utilization { average_utilization: f64 },
    /// Absolute value, averaged across instances.
    AverageValue { average_value: f64 },
    /// Absolute value of a single aggregate series.
    Value { value: f64 },
}

impl MetricTarget {
    fn target_value(&self) -> f64 {
        match self {
            MetricTarget::Utilization {
                average_utilization,
            } => *average_utilization,
            MetricTarget::AverageValue { average_value } => *average_value,
            MetricTarget::Value { value } => *value,
        }
    }
}

/// One metric the engine scales a target on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum MetricSpec {
    /// Per-instance resource usage (cpu, memory).
    Resource { name: String, target: MetricTarget },
    /// Arbitrary per-instance metric.
    Pods {
        metric: MetricIdentifier,
        target: MetricTarget,
    },
    /// Single aggregate describing another object (queue depth etc).
    Object {
        metric: MetricIdentifier,
        target: MetricTarget,
    },
    /// Single aggregate sourced from outside the cluster.
    External {
        metric: MetricIdentifier,
        target: MetricTarget,
    },
}

impl MetricSpec {
    /// Stable key for sample bookkeeping, unique within a target.
    pub fn metric_key(&self) -> MetricId {
        match self {
            MetricSpec::Resource { name, .. } => format!("resource/{name}"),
            MetricSpec::Pods { metric, .. } => format!("pods/{}", metric.name),
            MetricSpec::Object { metric, .. } => format!("object/{}", metric.name),
            MetricSpec::External { metric, .. } => format!("external/{}", metric.name),
        }
    }

    pub fn target(&self) -> &MetricTarget {
        match self {
            MetricSpec::Resource { target, .. }
            | MetricSpec::Pods { target, .. }
            | MetricSpec::Object { target, .. }
            | MetricSpec::External { target, .. } => target,
        }
    }

    /// Per-instance metrics are averaged across reporting instances;
    /// aggregate metrics carry one series for the whole target.
    pub fn is_per_instance(&self) -> bool {
        matches!(self, MetricSpec::Resource { .. } | MetricSpec::Pods { .. })
    }

    fn validate(&self) -> SpecResult<()> {
        let key = self.metric_key();
        let target = self.target();
        if target.target_value() <= 0.0 {
            return Err(SpecError::InvalidMetric(format!(
                "{key}: target value must be positive"
            )));
        }
        let allowed = match self {
            MetricSpec::Resource { .. } => matches!(
                target,
                MetricTarget::Utilization { .. } | MetricTarget::AverageValue { .. }
            ),
            MetricSpec::Pods { .. } => matches!(target, MetricTarget::AverageValue { .. }),
            MetricSpec::Object { .. } | MetricSpec::External { .. } => {
                matches!(target, MetricTarget::Value { .. })
            }
        };
        if !allowed {
            return Err(SpecError::InvalidMetric(format!(
                "{key}: target kind not allowed for this metric kind"
            )));
        }
        if let MetricSpec::Resource { name, .. } = self
            && name.is_empty()
        {
            return Err(SpecError::InvalidMetric(
                "resource metric needs a name".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Behavior ──────────────────────────────────────────────────────

/// Unit of a step-policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Percent of the current scale per period.
    Percent,
    /// Absolute replicas per period.
    Pods,
}

/// How multiple eligible rules combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectPolicy {
    /// Most restrictive rule wins.
    Min,
    /// Least restrictive rule wins.
    #[default]
    Max,
    /// Direction is frozen entirely.
    Disabled,
}

/// Bounds how far one direction may move within a period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicyRule {
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    pub value: u32,
    pub period_seconds: u64,
}

/// Per-direction stabilization window and step rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRules {
    #[serde(default)]
    pub stabilization_window_seconds: u64,
    #[serde(default)]
    pub select_policy: SelectPolicy,
    #[serde(default)]
    pub policies: Vec<ScalingPolicyRule>,
}

impl ScalingRules {
    /// Conventional scale-up default: no stabilization, allow doubling
    /// or four pods per 15s, whichever is greater.
    pub fn default_scale_up() -> Self {
        Self {
            stabilization_window_seconds: 0,
            select_policy: SelectPolicy::Max,
            policies: vec![
                ScalingPolicyRule {
                    kind: PolicyKind::Percent,
                    value: 100,
                    period_seconds: 15,
                },
                ScalingPolicyRule {
                    kind: PolicyKind::Pods,
                    value: 4,
                    period_seconds: 15,
                },
            ],
        }
    }

    /// Conventional scale-down default: five-minute stabilization,
    /// up to 100% per 15s once stable.
    pub fn default_scale_down() -> Self {
        Self {
            stabilization_window_seconds: 300,
            select_policy: SelectPolicy::Max,
            policies: vec![ScalingPolicyRule {
                kind: PolicyKind::Percent,
                value: 100,
                period_seconds: 15,
            }],
        }
    }

    fn validate(&self, direction: &str) -> SpecResult<()> {
        if self.stabilization_window_seconds > MAX_STABILIZATION_WINDOW_SECS {
            return Err(SpecError::InvalidBehavior(format!(
                "{direction}: stabilizationWindowSeconds {} exceeds {}",
                self.stabilization_window_seconds, MAX_STABILIZATION_WINDOW_SECS
            )));
        }
        if self.select_policy != SelectPolicy::Disabled && self.policies.is_empty() {
            return Err(SpecError::InvalidBehavior(format!(
                "{direction}: at least one policy rule is required unless disabled"
            )));
        }
        for rule in &self.policies {
            if rule.value == 0 {
                return Err(SpecError::InvalidBehavior(format!(
                    "{direction}: policy value must be positive"
                )));
            }
            if !POLICY_PERIOD_SECS.contains(&rule.period_seconds) {
                return Err(SpecError::InvalidBehavior(format!(
                    "{direction}: periodSeconds {} outside {}..={}",
                    rule.period_seconds,
                    POLICY_PERIOD_SECS.start(),
                    POLICY_PERIOD_SECS.end()
                )));
            }
        }
        Ok(())
    }
}

/// Directional scaling behavior. Omitted directions take the
/// conventional defaults: eager up, cautious down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Behavior {
    #[serde(default = "ScalingRules::default_scale_up")]
    pub scale_up: ScalingRules,
    #[serde(default = "ScalingRules::default_scale_down")]
    pub scale_down: ScalingRules,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            scale_up: ScalingRules::default_scale_up(),
            scale_down: ScalingRules::default_scale_down(),
        }
    }
}

impl Behavior {
    /// Longest window either direction stabilizes over.
    pub fn longest_window_secs(&self) -> u64 {
        self.scale_up
            .stabilization_window_seconds
            .max(self.scale_down.stabilization_window_seconds)
    }

    fn validate(&self) -> SpecResult<()> {
        self.scale_up.validate("scaleUp")?;
        self.scale_down.validate("scaleDown")?;
        Ok(())
    }
}

// ── Target spec ───────────────────────────────────────────────────

/// Complete declarative policy for one scaling target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    pub id: TargetId,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub behavior: Behavior,
}

impl TargetSpec {
    /// Validate the spec before it is attached to a control loop.
    pub fn validate(&self) -> SpecResult<()> {
        if self.id.is_empty() {
            return Err(SpecError::InvalidTarget("empty target id".to_string()));
        }
        if self.min_replicas > self.max_replicas {
            return Err(SpecError::InvalidTarget(format!(
                "{}: minReplicas {} exceeds maxReplicas {}",
                self.id, self.min_replicas, self.max_replicas
            )));
        }
        if self.max_replicas == 0 {
            return Err(SpecError::InvalidTarget(format!(
                "{}: maxReplicas must be positive",
                self.id
            )));
        }
        if self.metrics.is_empty() {
            return Err(SpecError::InvalidTarget(format!(
                "{}: at least one metric is required",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            metric.validate()?;
            if !seen.insert(metric.metric_key()) {
                return Err(SpecError::InvalidTarget(format!(
                    "{}: duplicate metric {}",
                    self.id,
                    metric.metric_key()
                )));
            }
        }
        self.behavior.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_utilization_spec(target: f64) -> MetricSpec {
        MetricSpec::Resource {
            name: "cpu".to_string(),
            target: MetricTarget::Utilization {
                average_utilization: target,
            },
        }
    }

    fn valid_spec() -> TargetSpec {
        TargetSpec {
            id: "default/api".to_string(),
            min_replicas: 1,
            max_replicas: 10,
            metrics: vec![cpu_utilization_spec(70.0)],
            behavior: Behavior::default(),
        }
    }

    #[test]
    fn default_behavior_shape() {
        let b = Behavior::default();
        assert_eq!(b.scale_up.stabilization_window_seconds, 0);
        assert_eq!(b.scale_up.select_policy, SelectPolicy::Max);
        assert_eq!(b.scale_up.policies.len(), 2);
        assert_eq!(b.scale_down.stabilization_window_seconds, 300);
        assert_eq!(b.scale_down.policies.len(), 1);
    }

    #[test]
    fn valid_spec_passes() {
        valid_spec().validate().unwrap();
    }

    #[test]
    fn min_above_max_rejected() {
        let mut spec = valid_spec();
        spec.min_replicas = 11;
        assert!(matches!(
            spec.validate(),
            Err(SpecError::InvalidTarget(_))
        ));
    }

    #[test]
    fn empty_metrics_rejected() {
        let mut spec = valid_spec();
        spec.metrics.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn duplicate_metrics_rejected() {
        let mut spec = valid_spec();
        spec.metrics.push(cpu_utilization_spec(80.0));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn non_positive_target_rejected() {
        let mut spec = valid_spec();
        spec.metrics = vec![cpu_utilization_spec(0.0)];
        assert!(matches!(
            spec.validate(),
            Err(SpecError::InvalidMetric(_))
        ));
    }

    #[test]
    fn pods_metric_requires_average_value() {
        let mut spec = valid_spec();
        spec.metrics = vec![MetricSpec::Pods {
            metric: MetricIdentifier {
                name: "queue_depth".to_string(),
                selector: None,
            },
            target: MetricTarget::Value { value: 100.0 },
        }];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn period_out_of_range_rejected() {
        let mut spec = valid_spec();
        spec.behavior.scale_up.policies[0].period_seconds = 0;
        assert!(matches!(
            spec.validate(),
            Err(SpecError::InvalidBehavior(_))
        ));

        let mut spec = valid_spec();
        spec.behavior.scale_down.policies[0].period_seconds = 1801;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn disabled_direction_allows_empty_policies() {
        let mut spec = valid_spec();
        spec.behavior.scale_down = ScalingRules {
            stabilization_window_seconds: 0,
            select_policy: SelectPolicy::Disabled,
            policies: Vec::new(),
        };
        spec.validate().unwrap();

        spec.behavior.scale_down.select_policy = SelectPolicy::Max;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn oversized_window_rejected() {
        let mut spec = valid_spec();
        spec.behavior.scale_down.stabilization_window_seconds = 3601;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn spec_parses_conventional_surface() {
        let json = r#"{
            "id": "default/api",
            "minReplicas": 2,
            "maxReplicas": 20,
            "metrics": [
                {"type": "Resource", "name": "cpu",
                 "target": {"type": "Utilization", "averageUtilization": 70}},
                {"type": "External",
                 "metric": {"name": "queue_depth", "selector": "queue=orders"},
                 "target": {"type": "Value", "value": 1000}}
            ],
            "behavior": {
                "scaleUp": {
                    "stabilizationWindowSeconds": 30,
                    "selectPolicy": "Min",
                    "policies": [
                        {"type": "Percent", "value": 50, "periodSeconds": 60}
                    ]
                }
            }
        }"#;
        let spec: TargetSpec = serde_json::from_str(json).unwrap();
        spec.validate().unwrap();

        assert_eq!(spec.min_replicas, 2);
        assert_eq!(spec.metrics.len(), 2);
        assert_eq!(spec.metrics[0].metric_key(), "resource/cpu");
        assert_eq!(spec.metrics[1].metric_key(), "external/queue_depth");
        assert_eq!(spec.behavior.scale_up.select_policy, SelectPolicy::Min);
        assert_eq!(
            spec.behavior.scale_up.policies[0].kind,
            PolicyKind::Percent
        );
        // Omitted scaleDown falls back to the cautious default.
        assert_eq!(spec.behavior.scale_down.stabilization_window_seconds, 300);
    }

    #[test]
    fn behavior_round_trips() {
        let behavior = Behavior::default();
        let json = serde_json::to_string(&behavior).unwrap();
        assert!(json.contains("stabilizationWindowSeconds"));
        assert!(json.contains("selectPolicy"));
        assert!(json.contains("periodSeconds"));
        let back: Behavior = serde_json::from_str(&json).unwrap();
        assert_eq!(back, behavior);
    }
}
