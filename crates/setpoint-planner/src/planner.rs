//! Node-group scale planning.
//!
//! The planner turns a snapshot of pending pods, node groups, and live
//! nodes into scale-up and scale-down plans. It never provisions or
//! drains anything itself: plans go to a callback and the orchestrator
//! is expected to act on them and reflect the result in the next
//! snapshot. All bookkeeping (in-flight provisions, group backoffs,
//! per-node unneeded clocks) lives in the planner, which is therefore
//! owned by exactly one loop rather than shared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use setpoint_core::time::epoch_secs;
use setpoint_core::{ClusterView, GroupId, NodeGroup, NodeId, NodeState, PendingPodSpec};

use crate::binpack::{pod_fits_template, simulate_packing};
use crate::error::PlanResult;
use crate::expander::ExpansionOption;
use crate::settings::PlannerSettings;

/// How long a group stays out of planning after a provision timeout.
const GROUP_BACKOFF_SECS: u64 = 300;

/// Planned growth for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleUpPlan {
    pub group_id: GroupId,
    pub delta_nodes: u32,
}

/// Planned removal of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDownPlan {
    pub node_id: NodeId,
    pub group_id: GroupId,
}

/// Everything one planning tick decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSet {
    pub at: u64,
    pub scale_ups: Vec<ScaleUpPlan>,
    pub scale_downs: Vec<ScaleDownPlan>,
}

impl PlanSet {
    pub fn is_empty(&self) -> bool {
        self.scale_ups.is_empty() && self.scale_downs.is_empty()
    }
}

/// Callback invoked with every non-empty plan set.
pub type PlanCallback = Arc<dyn Fn(PlanSet) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// A scale-up handed to the orchestrator that has not shown up in the
/// group's observed size yet.
#[derive(Debug, Clone, PartialEq)]
struct PendingProvision {
    group_id: GroupId,
    target_size: u32,
    requested_at: u64,
}

/// Plans node-group growth and shrink from cluster snapshots.
pub struct NodeGroupScalingPlanner {
    settings: PlannerSettings,
    pending: Vec<PendingProvision>,
    /// Groups sidelined by a provisioning failure, until the given time.
    backoff_until: HashMap<GroupId, u64>,
    /// Last planned growth per group, for the delay-after-add gate.
    last_scale_up_at: HashMap<GroupId, u64>,
    /// Since when each node has been continuously under the threshold.
    unneeded_since: HashMap<NodeId, u64>,
}

impl NodeGroupScalingPlanner {
    pub fn new(settings: PlannerSettings) -> PlanResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            pending: Vec::new(),
            backoff_until: HashMap::new(),
            last_scale_up_at: HashMap::new(),
            unneeded_since: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Plan group growth for the current pending pods.
    ///
    /// At most one group family grows per tick: the expander picks a
    /// winner, and balancing (when enabled) may spread the winner's
    /// delta across identically shaped groups.
    pub fn plan_scale_up(
        &mut self,
        now: u64,
        pending_pods: &[PendingPodSpec],
        groups: &[NodeGroup],
    ) -> Vec<ScaleUpPlan> {
        self.expire_provisions(now, groups);
        if pending_pods.is_empty() {
            return Vec::new();
        }
        let by_id: HashMap<&str, &NodeGroup> =
            groups.iter().map(|g| (g.id.as_str(), g)).collect();

        // Pods that fit on already-requested nodes are expected to
        // schedule once those nodes arrive; planning them again would
        // double-provision.
        let remaining = self.absorb_into_upcoming(pending_pods, &by_id);
        if remaining.is_empty() {
            debug!("all pending pods covered by in-flight provisions");
            return Vec::new();
        }

        let mut options = Vec::new();
        for group in groups {
            if self.in_backoff(&group.id, now) {
                debug!(group = %group.id, "group in provisioning backoff, skipped");
                continue;
            }
            let headroom = group.max_size.saturating_sub(self.effective_size(group));
            if headroom == 0 {
                continue;
            }
            let feasible: Vec<&PendingPodSpec> = remaining
                .iter()
                .copied()
                .filter(|pod| pod_fits_template(pod, &group.template))
                .collect();
            if feasible.is_empty() {
                continue;
            }
            let outcome = simulate_packing(&feasible, &group.template, headroom);
            if outcome.nodes_needed == 0 || outcome.packed.is_empty() {
                continue;
            }
            options.push(ExpansionOption {
                group_id: group.id.clone(),
                delta_nodes: outcome.nodes_needed,
                packed_pods: outcome.packed,
                waste_fraction: outcome.waste_fraction,
                priority: group.priority,
            });
        }

        let Some(winner) = self.settings.expander.choose(&options) else {
            warn!(
                pods = remaining.len(),
                "pending pods fit no expandable node group"
            );
            return Vec::new();
        };
        info!(
            group = %winner.group_id,
            delta = winner.delta_nodes,
            pods = winner.packed_pods.len(),
            waste = winner.waste_fraction,
            "expansion selected"
        );
        if winner.packed_pods.len() < remaining.len() {
            debug!(
                unplaced = remaining.len() - winner.packed_pods.len(),
                "some pending pods remain unplaced this tick"
            );
        }

        let plans = if self.settings.balance_similar_node_groups {
            self.spread_across_similar(winner, groups, now)
        } else {
            vec![ScaleUpPlan {
                group_id: winner.group_id.clone(),
                delta_nodes: winner.delta_nodes,
            }]
        };

        for plan in &plans {
            if let Some(group) = by_id.get(plan.group_id.as_str()) {
                let target = self.effective_size(group) + plan.delta_nodes;
                self.note_provision(&plan.group_id, target, now);
                self.last_scale_up_at.insert(plan.group_id.clone(), now);
                info!(group = %plan.group_id, delta = plan.delta_nodes, target, "scale-up planned");
            }
        }
        plans
    }

    /// Plan node removals from groups that have been quiet long enough.
    pub fn plan_scale_down(
        &mut self,
        now: u64,
        nodes: &[NodeState],
        groups: &[NodeGroup],
    ) -> Vec<ScaleDownPlan> {
        if !self.settings.scale_down_enabled {
            return Vec::new();
        }
        let live: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        self.unneeded_since.retain(|id, _| live.contains(id.as_str()));

        let threshold = self.settings.scale_down_utilization_threshold;
        for node in nodes {
            if node.utilization() < threshold {
                self.unneeded_since.entry(node.id.clone()).or_insert(now);
            } else {
                self.unneeded_since.remove(&node.id);
            }
        }

        let by_id: HashMap<&str, &NodeGroup> =
            groups.iter().map(|g| (g.id.as_str(), g)).collect();
        let unneeded_secs = self.settings.unneeded_secs();
        let delay = self.settings.delay_after_add_secs();

        let mut candidates: Vec<&NodeState> = nodes
            .iter()
            .filter(|node| {
                let Some(since) = self.unneeded_since.get(&node.id) else {
                    return false;
                };
                if now.saturating_sub(*since) < unneeded_secs {
                    return false;
                }
                let Some(group) = by_id.get(node.group_id.as_str()) else {
                    return false;
                };
                if self.in_backoff(&group.id, now) {
                    return false;
                }
                if let Some(last) = self.last_scale_up_at.get(&group.id)
                    && now.saturating_sub(*last) < delay
                {
                    return false;
                }
                if !node.safely_evictable() {
                    // The clock keeps running; the node is retried
                    // once eviction becomes safe.
                    debug!(node = %node.id, "unneeded node not safely evictable, kept");
                    return false;
                }
                true
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.utilization()
                .total_cmp(&b.utilization())
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut removed_per_group: HashMap<&str, u32> = HashMap::new();
        let mut plans = Vec::new();
        for node in candidates {
            if plans.len() as u32 >= self.settings.max_scale_down_parallelism {
                debug!("scale-down parallelism cap reached");
                break;
            }
            let Some(group) = by_id.get(node.group_id.as_str()) else {
                continue;
            };
            let planned = removed_per_group.entry(group.id.as_str()).or_insert(0);
            if group.current_size.saturating_sub(*planned) <= group.min_size {
                debug!(node = %node.id, group = %group.id, "removal would breach group floor");
                continue;
            }
            *planned += 1;
            info!(
                node = %node.id,
                group = %group.id,
                utilization = node.utilization(),
                "scale-down planned"
            );
            plans.push(ScaleDownPlan {
                node_id: node.id.clone(),
                group_id: group.id.clone(),
            });
        }
        for plan in &plans {
            self.unneeded_since.remove(&plan.node_id);
        }
        plans
    }

    /// Run the planning loop until shutdown, reading snapshots from
    /// the view and pushing non-empty plan sets to the callback.
    pub async fn run(
        mut self,
        view: Arc<dyn ClusterView>,
        on_plan: PlanCallback,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.settings.scan_secs());
        info!(interval_secs = interval.as_secs(), "planner loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.tick(view.as_ref()).await {
                        Ok(Some(plans)) => on_plan(plans).await,
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "planner tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("planner loop shutting down");
                    break;
                }
            }
        }
    }

    /// One planning pass over a fresh snapshot.
    async fn tick(&mut self, view: &dyn ClusterView) -> anyhow::Result<Option<PlanSet>> {
        let groups = view.node_groups().await?;
        let pods = view.pending_pods().await?;
        let nodes = view.nodes().await?;
        let now = epoch_secs();

        let scale_ups = self.plan_scale_up(now, &pods, &groups);
        let scale_downs = self.plan_scale_down(now, &nodes, &groups);
        let plans = PlanSet {
            at: now,
            scale_ups,
            scale_downs,
        };
        if plans.is_empty() {
            debug!("planner tick: nothing to do");
            Ok(None)
        } else {
            Ok(Some(plans))
        }
    }

    // ── Provision bookkeeping ─────────────────────────────────────

    /// Drop provisions that arrived; back off groups whose provisions
    /// timed out.
    fn expire_provisions(&mut self, now: u64, groups: &[NodeGroup]) {
        let by_id: HashMap<&str, &NodeGroup> =
            groups.iter().map(|g| (g.id.as_str(), g)).collect();
        let provision_secs = self.settings.provision_secs();
        let mut timed_out: Vec<GroupId> = Vec::new();

        self.pending.retain(|provision| {
            let Some(group) = by_id.get(provision.group_id.as_str()) else {
                // Group deleted; nothing left to wait for.
                return false;
            };
            if group.current_size >= provision.target_size {
                debug!(group = %provision.group_id, size = group.current_size, "provision fulfilled");
                return false;
            }
            if now.saturating_sub(provision.requested_at) > provision_secs {
                timed_out.push(provision.group_id.clone());
                return false;
            }
            true
        });

        for group_id in timed_out {
            warn!(
                group = %group_id,
                backoff_secs = GROUP_BACKOFF_SECS,
                "provision timed out, backing group off"
            );
            self.backoff_until
                .insert(group_id, now + GROUP_BACKOFF_SECS);
        }
    }

    fn in_backoff(&self, group_id: &str, now: u64) -> bool {
        self.backoff_until
            .get(group_id)
            .is_some_and(|until| *until > now)
    }

    /// Observed size plus whatever is already on order.
    fn effective_size(&self, group: &NodeGroup) -> u32 {
        self.pending
            .iter()
            .filter(|p| p.group_id == group.id)
            .map(|p| p.target_size)
            .fold(group.current_size, u32::max)
    }

    fn note_provision(&mut self, group_id: &str, target_size: u32, now: u64) {
        if let Some(existing) = self.pending.iter_mut().find(|p| p.group_id == group_id) {
            existing.target_size = existing.target_size.max(target_size);
            existing.requested_at = now;
        } else {
            self.pending.push(PendingProvision {
                group_id: group_id.to_string(),
                target_size,
                requested_at: now,
            });
        }
    }

    /// Strip pods that fit onto nodes already on order.
    fn absorb_into_upcoming<'a>(
        &self,
        pods: &'a [PendingPodSpec],
        by_id: &HashMap<&str, &NodeGroup>,
    ) -> Vec<&'a PendingPodSpec> {
        let mut remaining: Vec<&PendingPodSpec> = pods.iter().collect();
        for provision in &self.pending {
            let Some(group) = by_id.get(provision.group_id.as_str()) else {
                continue;
            };
            let upcoming = provision.target_size.saturating_sub(group.current_size);
            if upcoming == 0 || remaining.is_empty() {
                continue;
            }
            let feasible: Vec<&PendingPodSpec> = remaining
                .iter()
                .copied()
                .filter(|pod| pod_fits_template(pod, &group.template))
                .collect();
            if feasible.is_empty() {
                continue;
            }
            let outcome = simulate_packing(&feasible, &group.template, upcoming);
            if outcome.packed.is_empty() {
                continue;
            }
            let absorbed: HashSet<&str> = outcome.packed.iter().map(String::as_str).collect();
            remaining.retain(|pod| !absorbed.contains(pod.id.as_str()));
            debug!(
                group = %provision.group_id,
                absorbed = absorbed.len(),
                "pods covered by in-flight provision"
            );
        }
        remaining
    }

    /// Split the winner's delta across identically shaped groups,
    /// growing the smallest first so sizes level out.
    fn spread_across_similar(
        &self,
        winner: &ExpansionOption,
        groups: &[NodeGroup],
        now: u64,
    ) -> Vec<ScaleUpPlan> {
        let Some(winner_group) = groups.iter().find(|g| g.id == winner.group_id) else {
            return vec![ScaleUpPlan {
                group_id: winner.group_id.clone(),
                delta_nodes: winner.delta_nodes,
            }];
        };
        let family: Vec<&NodeGroup> = groups
            .iter()
            .filter(|g| similar_groups(winner_group, g) && !self.in_backoff(&g.id, now))
            .collect();

        let mut sizes: HashMap<&str, u32> = family
            .iter()
            .map(|g| (g.id.as_str(), self.effective_size(g)))
            .collect();
        let mut added: HashMap<&str, u32> = HashMap::new();

        for _ in 0..winner.delta_nodes {
            let pick = family
                .iter()
                .filter(|g| sizes[g.id.as_str()] < g.max_size)
                .min_by_key(|g| (sizes[g.id.as_str()], g.id.as_str()));
            let Some(group) = pick else {
                break;
            };
            *sizes.entry(group.id.as_str()).or_insert(0) += 1;
            *added.entry(group.id.as_str()).or_insert(0) += 1;
        }

        let mut plans: Vec<ScaleUpPlan> = added
            .into_iter()
            .map(|(group_id, delta_nodes)| ScaleUpPlan {
                group_id: group_id.to_string(),
                delta_nodes,
            })
            .collect();
        plans.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        plans
    }
}

/// Groups count as similar when they provision the same shape at the
/// same priority; labels and zones may differ.
fn similar_groups(a: &NodeGroup, b: &NodeGroup) -> bool {
    a.priority == b.priority
        && a.template.capacity == b.template.capacity
        && a.template.taints.len() == b.template.taints.len()
        && a.template.taints.iter().all(|t| b.template.taints.contains(t))
}
