//! Per-target evaluation pipeline.
//!
//! Owns the state one target carries between ticks (validated spec and
//! limiter bookkeeping) and turns a tick's fetched samples into a
//! `ScalingDecision`.

use setpoint_core::{
    MetricId, MetricSample, ScalingDecision, ScalingTarget, SpecResult, TargetSpec,
};
use tracing::debug;

use crate::calculator::{RawDesired, UnknownReason, desired_for_metric};
use crate::limiter::StabilizationRateLimiter;
use crate::reconciler::reconcile;
use crate::settings::EngineSettings;

/// Samples fetched for one configured metric this tick.
///
/// `None` means the fetch failed or timed out.
pub type FetchedMetric = Option<Vec<MetricSample>>;

/// Evaluation state for a single target.
pub struct TargetEvaluator {
    spec: TargetSpec,
    settings: EngineSettings,
    limiter: StabilizationRateLimiter,
}

impl TargetEvaluator {
    /// Validate a spec and attach it. Invalid specs never evaluate.
    pub fn new(spec: TargetSpec, settings: EngineSettings) -> SpecResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            settings,
            limiter: StabilizationRateLimiter::new(),
        })
    }

    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    /// Replace the spec in place. Limiter history restarts when bounds
    /// or behavior changed materially; metric sample histories are the
    /// caller's to reset (see [`changed_metric_keys`]).
    pub fn update_spec(&mut self, spec: TargetSpec) -> SpecResult<()> {
        spec.validate()?;
        let material = spec.min_replicas != self.spec.min_replicas
            || spec.max_replicas != self.spec.max_replicas
            || spec.behavior != self.spec.behavior;
        if material {
            self.limiter.reset();
        }
        self.spec = spec;
        Ok(())
    }

    /// Evaluate one tick. `fetched` aligns index-for-index with
    /// `spec().metrics`.
    pub fn evaluate(
        &mut self,
        now: u64,
        target: &ScalingTarget,
        fetched: &[FetchedMetric],
    ) -> ScalingDecision {
        let current = target.current_scale;
        let stale_cutoff = now.saturating_sub(self.settings.sample_staleness_seconds);

        let mut raws = Vec::with_capacity(self.spec.metrics.len());
        for (metric, batch) in self.spec.metrics.iter().zip(fetched) {
            let raw = match batch {
                Some(samples) => {
                    let fresh: Vec<MetricSample> = samples
                        .iter()
                        .filter(|s| s.at >= stale_cutoff)
                        .cloned()
                        .collect();
                    desired_for_metric(
                        metric,
                        &fresh,
                        current,
                        self.settings.min_sample_fraction,
                        self.settings.tolerance,
                    )
                }
                None => RawDesired::Unknown(UnknownReason::FetchFailed),
            };
            if let RawDesired::Unknown(reason) = &raw {
                debug!(
                    target = %self.spec.id,
                    metric = %metric.metric_key(),
                    %reason,
                    "metric unusable this tick"
                );
            }
            raws.push(raw);
        }

        // Bounds come from the live view; a transiently inverted pair
        // is reordered rather than trusted.
        let min_scale = target.min_scale.min(target.max_scale);
        let max_scale = target.max_scale.max(target.min_scale);

        let reconciled = reconcile(current, min_scale, max_scale, &raws);
        let limited = self.limiter.apply(
            now,
            current,
            reconciled.candidate,
            &self.spec.behavior,
            min_scale,
            max_scale,
        );

        let reason = if reconciled.degraded {
            format!("no usable metric; {}", limited.reason)
        } else {
            limited.reason
        };

        ScalingDecision {
            target_id: self.spec.id.clone(),
            at: now,
            proposed_scale: reconciled.candidate,
            applied_scale: limited.applied,
            direction: limited.direction,
            reason,
            degraded: reconciled.degraded,
        }
    }
}

/// Metric keys of `old` whose configuration is absent or different in
/// `new`. Their sample histories must be reset on spec replacement.
pub fn changed_metric_keys(old: &TargetSpec, new: &TargetSpec) -> Vec<MetricId> {
    old.metrics
        .iter()
        .filter(|m| !new.metrics.contains(m))
        .map(|m| m.metric_key())
        .collect()
}
