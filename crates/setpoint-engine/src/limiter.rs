//! Stabilization and rate limiting.
//!
//! Every reconciled candidate passes through here before it becomes a
//! decision. A per-direction stabilization window picks the least
//! aggressive candidate seen recently (min going up, max going down),
//! step policies bound how far one tick may move, and cooldown stamps
//! gate rules whose period has not elapsed since the last applied
//! change in that direction.

use std::collections::VecDeque;

use setpoint_core::{Behavior, PolicyKind, ScaleDirection, ScalingRules, SelectPolicy};

/// Outcome of a limiter pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limited {
    pub applied: u32,
    pub direction: ScaleDirection,
    /// Names the binding constraint.
    pub reason: String,
}

/// Per-target candidate history and rate bookkeeping.
#[derive(Debug, Default)]
pub struct StabilizationRateLimiter {
    /// Recent reconciled candidates as (at, candidate).
    history: VecDeque<(u64, u32)>,
    /// Unix timestamp of the last applied scale-up (0 = never).
    last_scale_up_at: u64,
    /// Unix timestamp of the last applied scale-down (0 = never).
    last_scale_down_at: u64,
}

impl StabilizationRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget history and cooldowns. Called when the target's policy
    /// changes materially.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_scale_up_at = 0;
        self.last_scale_down_at = 0;
    }

    /// Run one candidate through stabilization, step policies, and
    /// bound clamps. Requires `min_scale <= max_scale`.
    pub fn apply(
        &mut self,
        now: u64,
        current: u32,
        candidate: u32,
        behavior: &Behavior,
        min_scale: u32,
        max_scale: u32,
    ) -> Limited {
        self.record(now, candidate, behavior.longest_window_secs());

        if candidate > current {
            let rules = &behavior.scale_up;
            if rules.select_policy == SelectPolicy::Disabled {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    "scale up disabled".to_string(),
                );
            }

            // Least aggressive candidate in the window, held at current
            // so a mixed window never flips the direction.
            let stabilized =
                self.window_min(now, rules.stabilization_window_seconds, candidate);
            if stabilized <= current {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    format!(
                        "scale up held by {}s stabilization window",
                        rules.stabilization_window_seconds
                    ),
                );
            }

            let Some(limit) = self.step_limit_up(now, current, rules) else {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    "scale up frozen: no policy period has elapsed".to_string(),
                );
            };

            let (applied, reason) = if limit < stabilized {
                (limit, format!("scale up rate limited to {limit}"))
            } else if stabilized < candidate {
                (stabilized, format!("scale up stabilized at {stabilized}"))
            } else {
                (candidate, format!("scale up to {candidate}"))
            };
            self.finish(now, current, applied, min_scale, max_scale, reason)
        } else if candidate < current {
            let rules = &behavior.scale_down;
            if rules.select_policy == SelectPolicy::Disabled {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    "scale down disabled".to_string(),
                );
            }

            let stabilized =
                self.window_max(now, rules.stabilization_window_seconds, candidate);
            if stabilized >= current {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    format!(
                        "scale down held by {}s stabilization window",
                        rules.stabilization_window_seconds
                    ),
                );
            }

            let Some(limit) = self.step_limit_down(now, current, rules) else {
                return self.finish(
                    now,
                    current,
                    current,
                    min_scale,
                    max_scale,
                    "scale down frozen: no policy period has elapsed".to_string(),
                );
            };

            let (applied, reason) = if limit > stabilized {
                (limit, format!("scale down rate limited to {limit}"))
            } else if stabilized > candidate {
                (stabilized, format!("scale down stabilized at {stabilized}"))
            } else {
                (candidate, format!("scale down to {candidate}"))
            };
            self.finish(now, current, applied, min_scale, max_scale, reason)
        } else {
            self.finish(
                now,
                current,
                current,
                min_scale,
                max_scale,
                "at target".to_string(),
            )
        }
    }

    fn finish(
        &mut self,
        now: u64,
        current: u32,
        applied_raw: u32,
        min_scale: u32,
        max_scale: u32,
        reason: String,
    ) -> Limited {
        let applied = applied_raw.clamp(min_scale, max_scale);
        let reason = if applied != applied_raw {
            format!("{reason}; clamped to [{min_scale}, {max_scale}]")
        } else {
            reason
        };
        let direction = if applied > current {
            self.last_scale_up_at = now;
            ScaleDirection::Up
        } else if applied < current {
            self.last_scale_down_at = now;
            ScaleDirection::Down
        } else {
            ScaleDirection::Hold
        };
        Limited {
            applied,
            direction,
            reason,
        }
    }

    /// Upper step bound for this tick, `None` when no rule is eligible.
    fn step_limit_up(&self, now: u64, current: u32, rules: &ScalingRules) -> Option<u32> {
        let bounds: Vec<f64> = rules
            .policies
            .iter()
            .filter_map(|rule| {
                let elapsed = self.last_scale_up_at == 0
                    || now.saturating_sub(self.last_scale_up_at) >= rule.period_seconds;
                if !elapsed {
                    return None;
                }
                Some(match rule.kind {
                    PolicyKind::Percent => {
                        current as f64 * (1.0 + rule.value as f64 / 100.0)
                    }
                    PolicyKind::Pods => current as f64 + rule.value as f64,
                })
            })
            .collect();
        if bounds.is_empty() {
            return None;
        }
        let bound = match rules.select_policy {
            SelectPolicy::Min => bounds.iter().copied().fold(f64::INFINITY, f64::min),
            SelectPolicy::Max => bounds.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            SelectPolicy::Disabled => return None,
        };
        // A rational bound is never exceeded: floor going up.
        Some(bound.floor() as u32)
    }

    /// Lower step bound for this tick, `None` when no rule is eligible.
    fn step_limit_down(&self, now: u64, current: u32, rules: &ScalingRules) -> Option<u32> {
        let bounds: Vec<f64> = rules
            .policies
            .iter()
            .filter_map(|rule| {
                let elapsed = self.last_scale_down_at == 0
                    || now.saturating_sub(self.last_scale_down_at) >= rule.period_seconds;
                if !elapsed {
                    return None;
                }
                let bound = match rule.kind {
                    PolicyKind::Percent => {
                        current as f64 * (1.0 - rule.value as f64 / 100.0)
                    }
                    PolicyKind::Pods => current as f64 - rule.value as f64,
                };
                Some(bound.max(0.0))
            })
            .collect();
        if bounds.is_empty() {
            return None;
        }
        let bound = match rules.select_policy {
            // Most restrictive going down is the largest floor.
            SelectPolicy::Min => bounds.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            SelectPolicy::Max => bounds.iter().copied().fold(f64::INFINITY, f64::min),
            SelectPolicy::Disabled => return None,
        };
        // Never drop below a rational bound: ceil going down.
        Some(bound.ceil() as u32)
    }

    fn record(&mut self, now: u64, candidate: u32, longest_window_secs: u64) {
        self.history.push_back((now, candidate));
        let cutoff = now.saturating_sub(longest_window_secs);
        while self.history.front().is_some_and(|(at, _)| *at < cutoff) {
            self.history.pop_front();
        }
    }

    fn window_min(&self, now: u64, window_secs: u64, fallback: u32) -> u32 {
        let cutoff = now.saturating_sub(window_secs);
        self.history
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .map(|(_, c)| *c)
            .min()
            .unwrap_or(fallback)
    }

    fn window_max(&self, now: u64, window_secs: u64, fallback: u32) -> u32 {
        let cutoff = now.saturating_sub(window_secs);
        self.history
            .iter()
            .filter(|(at, _)| *at >= cutoff)
            .map(|(_, c)| *c)
            .max()
            .unwrap_or(fallback)
    }
}
