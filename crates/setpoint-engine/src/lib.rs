//! setpoint-engine — replica-scaling decision pipeline.
//!
//! Turns a stream of metric samples and a declarative policy into a
//! sequence of bounded, rate-limited, non-flapping scaling decisions.
//!
//! # Pipeline
//!
//! ```text
//! samples ─▶ calculator (per metric: desired = current * observed / target)
//!         ─▶ reconciler (max wins up, min wins down, ceil, clamp)
//!         ─▶ limiter    (stabilization window, step policies, cooldowns)
//!         ─▶ ScalingDecision
//! ```
//!
//! The `ControlLoopDriver` runs this pipeline on an interval, one loop
//! per registered target, fetching samples through the collaborator
//! traits in `setpoint-core`. The engine never applies scale changes
//! itself; the orchestrator consumes the decisions.

pub mod calculator;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod limiter;
pub mod reconciler;
pub mod settings;

pub use calculator::{RawDesired, UnknownReason, desired_for_metric};
pub use driver::{ControlLoopDriver, DecisionCallback};
pub use error::{EngineError, EngineResult};
pub use evaluator::TargetEvaluator;
pub use limiter::StabilizationRateLimiter;
pub use reconciler::{Reconciled, reconcile};
pub use settings::EngineSettings;
