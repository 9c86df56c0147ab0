//! setpoint-core — shared model for the setpoint autoscaling engine.
//!
//! Defines the domain types (targets, samples, decisions, node groups),
//! the declarative scaling policy with its validation, the shared
//! `MetricSampleStore`, and the collaborator traits implemented by the
//! embedding orchestrator.
//!
//! The sample store is `Clone` + `Send` + `Sync` (backed by `Arc<RwLock>`)
//! and is shared between the replica engine, the resource recommender,
//! and the node-group planner, each of which runs its own loop.

pub mod error;
pub mod policy;
pub mod samples;
pub mod sources;
pub mod time;
pub mod types;

pub use error::{SpecError, SpecResult};
pub use policy::*;
pub use samples::MetricSampleStore;
pub use sources::{BoxFuture, ClusterView, MetricsSource};
pub use types::*;
