//! setpoint-planner — node group scale planning.
//!
//! Decides when node groups should grow (pending pods that fit no
//! existing node) and shrink (nodes continuously underutilized with
//! safely evictable pods). Plans are advisory: the orchestrator
//! executes them and the next snapshot shows the result.
//!
//! ```text
//!  pending pods ──► binpack (FFD per template) ──► ExpansionOption*
//!                                                       │ expander
//!                                                       ▼
//!  live nodes ───► unneeded clocks ──► candidates   ScaleUpPlan*
//!                       │ floors, budgets, caps
//!                       ▼
//!                  ScaleDownPlan*
//! ```

pub mod binpack;
pub mod error;
pub mod expander;
pub mod planner;
pub mod settings;

pub use binpack::{PackingOutcome, pod_fits_template, simulate_packing};
pub use error::{PlanError, PlanResult};
pub use expander::{Expander, ExpansionOption};
pub use planner::{
    NodeGroupScalingPlanner, PlanCallback, PlanSet, ScaleDownPlan, ScaleUpPlan,
};
pub use settings::PlannerSettings;
