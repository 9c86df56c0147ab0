//! Packing simulation for scale-up planning.
//!
//! Answers "how many template nodes would these pods need" by first-fit
//! decreasing over hypothetical empty nodes. The result feeds the
//! expander; nothing here is ever applied directly.

use std::collections::HashMap;

use setpoint_core::{NodeTemplate, PendingPodSpec, ResourceVec, TaintEffect};

/// Well-known selector key matched against a template's zone list
/// rather than its label map.
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Whether a pending pod could schedule onto a node from this template.
///
/// Checks resource fit, taint toleration (`PreferNoSchedule` is
/// advisory and never blocks), and node-selector coverage.
pub fn pod_fits_template(pod: &PendingPodSpec, template: &NodeTemplate) -> bool {
    if !pod.requests.fits(&template.capacity) {
        return false;
    }
    for taint in &template.taints {
        if matches!(taint.effect, TaintEffect::PreferNoSchedule) {
            continue;
        }
        if !pod.tolerations.iter().any(|t| t.tolerates(taint)) {
            return false;
        }
    }
    selector_matches(&pod.node_selector, template)
}

fn selector_matches(selector: &HashMap<String, String>, template: &NodeTemplate) -> bool {
    selector.iter().all(|(key, value)| {
        if template.labels.get(key) == Some(value) {
            return true;
        }
        key == ZONE_LABEL && template.zones.contains(value)
    })
}

/// Result of packing a pod set onto fresh template nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PackingOutcome {
    /// Hypothetical new nodes used.
    pub nodes_needed: u32,
    /// Ids of pods that found a slot.
    pub packed: Vec<String>,
    /// Ids of pods that did not fit within `max_nodes`.
    pub leftover: Vec<String>,
    /// Mean free-capacity fraction (CPU and memory averaged) across
    /// the new nodes. Lower is tighter packing.
    pub waste_fraction: f64,
}

/// First-fit-decreasing simulation against empty nodes of one
/// template, using at most `max_nodes` of them.
///
/// Pods are placed largest-first by dominant resource share; each pod
/// goes to the first node with room, opening a new node only when
/// none has room and the cap allows it.
pub fn simulate_packing(
    pods: &[&PendingPodSpec],
    template: &NodeTemplate,
    max_nodes: u32,
) -> PackingOutcome {
    let capacity = template.capacity;
    let mut order: Vec<&PendingPodSpec> = pods.to_vec();
    order.sort_by(|a, b| {
        dominant_share(&b.requests, &capacity)
            .total_cmp(&dominant_share(&a.requests, &capacity))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut free: Vec<ResourceVec> = Vec::new();
    let mut packed = Vec::new();
    let mut leftover = Vec::new();

    for pod in order {
        if !pod_fits_template(pod, template) {
            leftover.push(pod.id.clone());
            continue;
        }
        if let Some(slot) = free.iter_mut().find(|f| pod.requests.fits(f)) {
            *slot = slot.saturating_sub(&pod.requests);
            packed.push(pod.id.clone());
        } else if (free.len() as u32) < max_nodes {
            free.push(capacity.saturating_sub(&pod.requests));
            packed.push(pod.id.clone());
        } else {
            leftover.push(pod.id.clone());
        }
    }

    let waste_fraction = if free.is_empty() {
        0.0
    } else {
        free.iter().map(|f| free_fraction(f, &capacity)).sum::<f64>() / free.len() as f64
    };

    PackingOutcome {
        nodes_needed: free.len() as u32,
        packed,
        leftover,
        waste_fraction,
    }
}

/// Larger of the CPU and memory shares a request takes of a capacity.
fn dominant_share(request: &ResourceVec, capacity: &ResourceVec) -> f64 {
    let cpu = share(request.cpu_millis, capacity.cpu_millis);
    let mem = share(request.memory_bytes, capacity.memory_bytes);
    cpu.max(mem)
}

fn free_fraction(free: &ResourceVec, capacity: &ResourceVec) -> f64 {
    let cpu = share(free.cpu_millis, capacity.cpu_millis);
    let mem = share(free.memory_bytes, capacity.memory_bytes);
    (cpu + mem) / 2.0
}

fn share(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
