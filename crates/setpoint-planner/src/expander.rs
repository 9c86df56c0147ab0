//! Expansion option selection.
//!
//! When several node groups could absorb the pending pods, the
//! expander picks one. Every strategy ends with deterministic
//! tie-breaks so identical inputs always plan identically.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use setpoint_core::GroupId;

/// One feasible way to expand a node group.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionOption {
    pub group_id: GroupId,
    /// New nodes required, already capped by group headroom.
    pub delta_nodes: u32,
    /// Ids of pending pods this expansion would place.
    pub packed_pods: Vec<String>,
    /// Mean free-capacity fraction across the new nodes.
    pub waste_fraction: f64,
    /// The group's configured priority.
    pub priority: i32,
}

/// Strategy for choosing among feasible expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expander {
    /// Tightest packing wins.
    #[default]
    LeastWaste,
    /// Most pending pods placed wins.
    MostPods,
    /// Highest group priority wins.
    Priority,
}

impl Expander {
    /// Pick the winning option. `None` when the slate is empty.
    pub fn choose<'a>(&self, options: &'a [ExpansionOption]) -> Option<&'a ExpansionOption> {
        options.iter().min_by(|a, b| self.rank(a, b))
    }

    /// Total order over options; `Less` means preferred.
    fn rank(&self, a: &ExpansionOption, b: &ExpansionOption) -> Ordering {
        let primary = match self {
            Expander::LeastWaste => a.waste_fraction.total_cmp(&b.waste_fraction),
            Expander::MostPods => b.packed_pods.len().cmp(&a.packed_pods.len()),
            Expander::Priority => b.priority.cmp(&a.priority),
        };
        primary
            .then_with(|| a.delta_nodes.cmp(&b.delta_nodes))
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.group_id.cmp(&b.group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(group: &str, delta: u32, pods: usize, waste: f64, priority: i32) -> ExpansionOption {
        ExpansionOption {
            group_id: group.to_string(),
            delta_nodes: delta,
            packed_pods: (0..pods).map(|i| format!("pod-{i}")).collect(),
            waste_fraction: waste,
            priority,
        }
    }

    #[test]
    fn empty_slate_selects_nothing() {
        assert!(Expander::LeastWaste.choose(&[]).is_none());
    }

    #[test]
    fn least_waste_prefers_tight_packing() {
        let options = [
            option("m5-xlarge", 1, 3, 0.79, 0),
            option("m5-large", 1, 3, 0.58, 0),
        ];
        let winner = Expander::LeastWaste.choose(&options).unwrap();
        assert_eq!(winner.group_id, "m5-large");
    }

    #[test]
    fn least_waste_ties_break_on_fewer_nodes() {
        let options = [
            option("two-nodes", 2, 3, 0.40, 0),
            option("one-node", 1, 3, 0.40, 0),
        ];
        let winner = Expander::LeastWaste.choose(&options).unwrap();
        assert_eq!(winner.group_id, "one-node");
    }

    #[test]
    fn least_waste_then_priority_then_id() {
        let options = [
            option("gamma", 1, 3, 0.40, 5),
            option("alpha", 1, 3, 0.40, 5),
            option("beta", 1, 3, 0.40, 2),
        ];
        let winner = Expander::LeastWaste.choose(&options).unwrap();
        assert_eq!(winner.group_id, "alpha");
    }

    #[test]
    fn most_pods_prefers_coverage() {
        let options = [
            option("partial", 1, 2, 0.10, 0),
            option("full", 2, 5, 0.70, 0),
        ];
        let winner = Expander::MostPods.choose(&options).unwrap();
        assert_eq!(winner.group_id, "full");
    }

    #[test]
    fn priority_expander_ignores_waste() {
        let options = [
            option("cheap", 1, 3, 0.05, 1),
            option("preferred", 1, 3, 0.90, 50),
        ];
        let winner = Expander::Priority.choose(&options).unwrap();
        assert_eq!(winner.group_id, "preferred");
    }

    #[test]
    fn expander_parses_kebab_case() {
        let e: Expander = serde_json::from_str("\"least-waste\"").unwrap();
        assert_eq!(e, Expander::LeastWaste);
        let e: Expander = serde_json::from_str("\"most-pods\"").unwrap();
        assert_eq!(e, Expander::MostPods);
        assert!(serde_json::from_str::<Expander>("\"random\"").is_err());
    }
}
