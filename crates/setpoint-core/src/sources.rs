//! Collaborator interfaces to the metrics pipeline and the orchestrator.
//!
//! Implementations live outside this workspace; the engine depends only
//! on these traits. Methods return hand-boxed futures so the traits stay
//! object-safe and `Arc<dyn ...>` collaborators can be shared across
//! loops without extra machinery.

use std::future::Future;
use std::pin::Pin;

use crate::policy::MetricSpec;
use crate::types::{MetricSample, NodeGroup, NodeState, PendingPodSpec, ScalingTarget};

/// Boxed future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Supplies metric samples on demand.
///
/// Failures and timeouts degrade the affected metric for the tick; they
/// never crash a control loop.
pub trait MetricsSource: Send + Sync {
    /// Fetch the current samples for one configured metric of a target.
    ///
    /// Per-instance metrics return one sample per reporting instance;
    /// aggregate metrics return a single sample.
    fn samples<'a>(
        &'a self,
        target_id: &'a str,
        spec: &'a MetricSpec,
    ) -> BoxFuture<'a, anyhow::Result<Vec<MetricSample>>>;
}

/// Read-only view of the orchestrator's state.
pub trait ClusterView: Send + Sync {
    /// Bounds and current scale for a target; `None` once it is deleted.
    fn target<'a>(
        &'a self,
        target_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ScalingTarget>>>;

    /// Pods awaiting placement.
    fn pending_pods(&self) -> BoxFuture<'_, anyhow::Result<Vec<PendingPodSpec>>>;

    /// Provisionable node groups with their templates.
    fn node_groups(&self) -> BoxFuture<'_, anyhow::Result<Vec<NodeGroup>>>;

    /// Live nodes with their hosted pods.
    fn nodes(&self) -> BoxFuture<'_, anyhow::Result<Vec<NodeState>>>;
}
