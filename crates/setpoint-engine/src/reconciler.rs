//! Multi-metric reconciliation.
//!
//! Merges per-metric raw desired scales into one integer candidate.
//! Any overloaded metric can force a scale-up; shrinking requires every
//! usable metric to agree. Unknown metrics are excluded, and a tick
//! with no usable metric at all holds the current scale, degraded.

use crate::calculator::RawDesired;

/// Reconciled candidate for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Integer candidate scale, clamped to the target's bounds.
    pub candidate: u32,
    /// True when no metric produced a usable value.
    pub degraded: bool,
}

/// Merge per-metric desired scales into a single bounded candidate.
pub fn reconcile(
    current_scale: u32,
    min_scale: u32,
    max_scale: u32,
    raws: &[RawDesired],
) -> Reconciled {
    let valid: Vec<f64> = raws
        .iter()
        .filter_map(|r| match r {
            RawDesired::Scale(v) => Some(*v),
            RawDesired::Unknown(_) => None,
        })
        .collect();

    if valid.is_empty() {
        return Reconciled {
            candidate: current_scale.clamp(min_scale, max_scale),
            degraded: true,
        };
    }

    let wants_up = valid.iter().any(|v| *v > current_scale as f64);
    let rational = if wants_up {
        valid.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    } else {
        valid.iter().copied().fold(f64::INFINITY, f64::min)
    };

    // Ceil is the single rational-to-integer rule: it is monotonic, so
    // it commutes with the max/min choice, and it keeps shrink steps
    // conservative.
    let candidate = (rational.ceil().max(0.0) as u32).clamp(min_scale, max_scale);
    Reconciled {
        candidate,
        degraded: false,
    }
}
