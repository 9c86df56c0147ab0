//! Per-metric desired-scale computation.
//!
//! Turns one configured metric's fresh samples into a raw, unrounded
//! desired scale via the ratio rule `desired = current * observed / target`.
//! A metric that cannot produce a usable value this tick reports why;
//! it is never treated as zero.

use setpoint_core::{MetricSample, MetricSpec, MetricTarget};

/// Why a metric produced no usable value this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownReason {
    /// No fresh sample arrived in the sampling window.
    NoSamples,
    /// The fetch from the metrics source failed or timed out.
    FetchFailed,
    /// Too few instances reported for a per-instance metric.
    InsufficientCoverage { reported: usize, expected: u32 },
    /// Ratio scaling has no base at zero scale.
    ZeroCurrentScale,
}

impl std::fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownReason::NoSamples => write!(f, "no fresh samples"),
            UnknownReason::FetchFailed => write!(f, "fetch failed or timed out"),
            UnknownReason::InsufficientCoverage { reported, expected } => {
                write!(f, "only {reported} of {expected} instances reported")
            }
            UnknownReason::ZeroCurrentScale => write!(f, "current scale is zero"),
        }
    }
}

/// Result of evaluating one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDesired {
    /// Unrounded desired scale.
    Scale(f64),
    /// The metric is unusable this tick.
    Unknown(UnknownReason),
}

impl RawDesired {
    pub fn is_valid(&self) -> bool {
        matches!(self, RawDesired::Scale(_))
    }
}

/// Compute the raw desired scale for one metric.
///
/// `samples` is this tick's batch for the metric, already filtered for
/// staleness. Per-instance metrics average across reporting instances
/// and require `min_sample_fraction` of `current_scale` to report;
/// aggregate metrics take the newest sample as the observation. An
/// observed/target ratio within `tolerance` of 1.0 votes to hold.
pub fn desired_for_metric(
    spec: &MetricSpec,
    samples: &[MetricSample],
    current_scale: u32,
    min_sample_fraction: f64,
    tolerance: f64,
) -> RawDesired {
    if current_scale == 0 {
        return RawDesired::Unknown(UnknownReason::ZeroCurrentScale);
    }
    if samples.is_empty() {
        return RawDesired::Unknown(UnknownReason::NoSamples);
    }

    let observed = if spec.is_per_instance() {
        let needed = (min_sample_fraction * current_scale as f64).ceil().max(1.0) as usize;
        if samples.len() < needed {
            return RawDesired::Unknown(UnknownReason::InsufficientCoverage {
                reported: samples.len(),
                expected: current_scale,
            });
        }
        samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
    } else {
        let Some(newest) = samples.iter().max_by_key(|s| s.at) else {
            return RawDesired::Unknown(UnknownReason::NoSamples);
        };
        newest.value
    };

    let target = match spec.target() {
        MetricTarget::Utilization {
            average_utilization,
        } => *average_utilization,
        MetricTarget::AverageValue { average_value } => *average_value,
        MetricTarget::Value { value } => *value,
    };

    let ratio = observed / target;
    if (ratio - 1.0).abs() <= tolerance {
        // Close enough to target; this metric votes for no change.
        return RawDesired::Scale(current_scale as f64);
    }
    RawDesired::Scale(current_scale as f64 * ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_utilization(target: f64) -> MetricSpec {
        MetricSpec::Resource {
            name: "cpu".to_string(),
            target: MetricTarget::Utilization {
                average_utilization: target,
            },
        }
    }

    fn external_value(target: f64) -> MetricSpec {
        MetricSpec::External {
            metric: setpoint_core::MetricIdentifier {
                name: "queue_depth".to_string(),
                selector: None,
            },
            target: MetricTarget::Value { value: target },
        }
    }

    fn samples(values: &[f64], at: u64) -> Vec<MetricSample> {
        values
            .iter()
            .map(|v| MetricSample {
                metric_id: "resource/cpu".to_string(),
                target_id: "default/api".to_string(),
                value: *v,
                at,
            })
            .collect()
    }

    #[test]
    fn utilization_ratio_scales_current() {
        // Three instances at 90% against a 70% target.
        let raw = desired_for_metric(
            &cpu_utilization(70.0),
            &samples(&[90.0, 90.0, 90.0], 100),
            3,
            0.5,
            0.1,
        );
        match raw {
            RawDesired::Scale(v) => assert!((v - 3.0 * 90.0 / 70.0).abs() < 1e-9),
            other => panic!("expected scale, got {other:?}"),
        }
    }

    #[test]
    fn mean_over_reporting_instances() {
        let raw = desired_for_metric(
            &cpu_utilization(50.0),
            &samples(&[40.0, 60.0, 80.0], 100),
            3,
            0.5,
            0.1,
        );
        // Mean is 60 → desired = 3 * 60/50 = 3.6.
        assert_eq!(raw, RawDesired::Scale(3.6));
    }

    #[test]
    fn insufficient_coverage_is_unknown() {
        // 4 instances, half must report, only 1 did.
        let raw = desired_for_metric(
            &cpu_utilization(70.0),
            &samples(&[90.0], 100),
            4,
            0.5,
            0.1,
        );
        assert_eq!(
            raw,
            RawDesired::Unknown(UnknownReason::InsufficientCoverage {
                reported: 1,
                expected: 4
            })
        );
    }

    #[test]
    fn zero_current_scale_is_unknown() {
        let raw = desired_for_metric(&cpu_utilization(70.0), &samples(&[90.0], 100), 0, 0.5, 0.1);
        assert_eq!(raw, RawDesired::Unknown(UnknownReason::ZeroCurrentScale));
    }

    #[test]
    fn empty_batch_is_unknown() {
        let raw = desired_for_metric(&cpu_utilization(70.0), &[], 3, 0.5, 0.1);
        assert_eq!(raw, RawDesired::Unknown(UnknownReason::NoSamples));
    }

    #[test]
    fn within_tolerance_holds_current() {
        // 72 against 70 is within the 10% band.
        let raw = desired_for_metric(
            &cpu_utilization(70.0),
            &samples(&[72.0, 72.0, 72.0], 100),
            3,
            0.5,
            0.1,
        );
        assert_eq!(raw, RawDesired::Scale(3.0));
    }

    #[test]
    fn aggregate_uses_newest_sample() {
        let mut batch = samples(&[500.0], 100);
        batch.extend(samples(&[800.0], 120));
        batch.extend(samples(&[600.0], 110));

        let raw = desired_for_metric(&external_value(400.0), &batch, 2, 0.5, 0.1);
        // Newest aggregate is 800 → desired = 2 * 800/400 = 4.
        assert_eq!(raw, RawDesired::Scale(4.0));
    }

    #[test]
    fn aggregate_has_no_coverage_rule() {
        // A single sample is enough even at high scale.
        let raw = desired_for_metric(&external_value(400.0), &samples(&[800.0], 100), 8, 0.9, 0.1);
        assert_eq!(raw, RawDesired::Scale(16.0));
    }
}
