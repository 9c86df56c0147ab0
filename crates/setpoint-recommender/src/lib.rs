//! setpoint-recommender — vertical resource recommendation.
//!
//! Watches per-container CPU and memory usage and recommends request
//! values backed by decayed usage percentiles. The output is three
//! bounds per container (lower, target, upper); whether and how they
//! are applied is governed by each container's update mode.
//!
//! ```text
//!  usage samples ──► DecayingHistogram (cpu, memory)
//!                         │ percentile reads
//!                         ▼
//!                   Recommendation { lower ≤ target ≤ upper }
//!                         │ clamped by ContainerPolicy
//!                         ▼
//!                   ApplyDecision (Off / Initial / Auto + floor)
//! ```

pub mod error;
pub mod histogram;
pub mod recommender;

pub use error::{RecommendError, RecommendResult};
pub use histogram::{DecayingHistogram, HistogramOptions};
pub use recommender::{
    ApplyDecision, ContainerPolicy, Recommendation, RecommenderConfig, ResourceRecommender,
    UpdateMode,
};
