//! Domain types for the setpoint decision engine.
//!
//! These types describe the three things the engine reasons about:
//! scaling targets (replica-scaled workloads), metric samples, and the
//! node-group side of the world (templates, pending pods, live nodes).
//! All of them are serializable so decisions and inputs can cross the
//! boundary to the embedding orchestrator as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a scaling target (a replica-scaled workload).
pub type TargetId = String;

/// Stable key for one metric series within a target.
pub type MetricId = String;

/// Unique identifier for a node group.
pub type GroupId = String;

/// Unique identifier for a node.
pub type NodeId = String;

/// Unique identifier for a container whose requests are recommended.
pub type ContainerId = String;

// ── Scaling targets ───────────────────────────────────────────────

/// A workload whose replica count the engine manages.
///
/// Targets are created and deleted by the orchestrator; the engine only
/// reads their bounds and writes desired-scale decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingTarget {
    pub id: TargetId,
    pub min_scale: u32,
    pub max_scale: u32,
    /// Replicas currently running according to the orchestrator.
    pub current_scale: u32,
    /// Most recently decided scale (mirrors current once applied).
    pub desired_scale: u32,
    /// Unix timestamp of the last applied scale-up (0 = never).
    pub last_scale_up_at: u64,
    /// Unix timestamp of the last applied scale-down (0 = never).
    pub last_scale_down_at: u64,
}

/// A single observed metric value.
///
/// Per-instance metrics produce one sample per reporting instance per
/// collection tick; aggregate metrics produce exactly one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub metric_id: MetricId,
    pub target_id: TargetId,
    pub value: f64,
    /// Unix timestamp (seconds) the sample was observed.
    pub at: u64,
}

/// Which way a decision moved the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    Hold,
}

/// Outcome of one evaluation tick for a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingDecision {
    pub target_id: TargetId,
    /// Unix timestamp the decision was made.
    pub at: u64,
    /// Reconciled candidate before stabilization and rate limits.
    pub proposed_scale: u32,
    /// Final scale after stabilization, step limits, and bound clamps.
    pub applied_scale: u32,
    pub direction: ScaleDirection,
    /// Human-readable description of the binding constraint.
    pub reason: String,
    /// True when no configured metric produced a usable value this tick.
    pub degraded: bool,
}

// ── Resources ─────────────────────────────────────────────────────

/// Resource quantity vector shared by node capacities, pod requests,
/// and container recommendations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVec {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub gpus: u32,
}

impl ResourceVec {
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            gpus: 0,
        }
    }

    /// Whether this request fits inside the given capacity.
    pub fn fits(&self, capacity: &ResourceVec) -> bool {
        self.cpu_millis <= capacity.cpu_millis
            && self.memory_bytes <= capacity.memory_bytes
            && self.gpus <= capacity.gpus
    }

    pub fn saturating_add(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            gpus: self.gpus.saturating_add(other.gpus),
        }
    }

    pub fn saturating_sub(&self, other: &ResourceVec) -> ResourceVec {
        ResourceVec {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            gpus: self.gpus.saturating_sub(other.gpus),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0 && self.gpus == 0
    }
}

// ── Node groups ───────────────────────────────────────────────────

/// Effect of a node taint on pods that do not tolerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A taint applied to every node provisioned from a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

/// A pod-side declaration that a taint is acceptable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` tolerates the matching taint regardless of effect.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Whether this toleration covers the given taint.
    ///
    /// An `Exists` toleration with an empty key matches every taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect
            && effect != taint.effect
        {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

/// Shape of every node a group provisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeTemplate {
    pub capacity: ResourceVec,
    /// Labels carried by provisioned nodes (selector matching).
    pub labels: HashMap<String, String>,
    pub taints: Vec<Taint>,
    /// Availability zones the group spans.
    pub zones: Vec<String>,
}

/// A homogeneous, provisionable pool of nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeGroup {
    pub id: GroupId,
    pub min_size: u32,
    pub max_size: u32,
    pub current_size: u32,
    /// Expander preference weight; larger wins ties.
    pub priority: i32,
    pub template: NodeTemplate,
}

impl NodeGroup {
    /// Nodes this group could still add.
    pub fn headroom(&self) -> u32 {
        self.max_size.saturating_sub(self.current_size)
    }
}

// ── Planner inputs ────────────────────────────────────────────────

/// A pod awaiting placement, as seen by the node planner.
///
/// Planning input only; the planner never mutates pods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPodSpec {
    pub id: String,
    pub requests: ResourceVec,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Labels a hosting node must carry.
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
}

/// Pod-level detail relevant to eviction safety during scale-down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePod {
    pub id: String,
    pub requests: ResourceVec,
    /// Uses node-local storage that is not backed elsewhere.
    pub local_storage: bool,
    /// Evicting now would violate the pod's disruption budget.
    pub eviction_blocked: bool,
}

/// Live node snapshot used for scale-down evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeState {
    pub id: NodeId,
    pub group_id: GroupId,
    pub allocatable: ResourceVec,
    /// Sum of requests of every pod on the node.
    pub requested: ResourceVec,
    pub pods: Vec<NodePod>,
}

impl NodeState {
    /// Dominant-resource utilization: the larger of the CPU and memory
    /// requested-over-allocatable fractions.
    pub fn utilization(&self) -> f64 {
        let cpu = fraction(self.requested.cpu_millis, self.allocatable.cpu_millis);
        let mem = fraction(self.requested.memory_bytes, self.allocatable.memory_bytes);
        cpu.max(mem)
    }

    /// Whether every pod on the node can be evicted safely.
    pub fn safely_evictable(&self) -> bool {
        self.pods
            .iter()
            .all(|p| !p.local_storage && !p.eviction_blocked)
    }
}

fn fraction(used: u64, total: u64) -> f64 {
    if total == 0 {
        // A node with no allocatable capacity is never "underused".
        if used == 0 { 0.0 } else { 1.0 }
    } else {
        used as f64 / total as f64
    }
}
