// src/scheduler.rs

//! Policy -> action-plan transformation (spec §4.G). Pure function: no
//! side effects, no engine access.

use crate::cluster::ClusterEntry;
use crate::types::{Action, ActionPlan, DockerEntry, Policies, RunConfig};
use std::collections::BTreeMap;

/// The only concrete scheduler class named by the spec: for every
/// `(image, policy)`, ensure exactly one running container per node
/// and cull duplicates.
pub struct Distribution;

impl Distribution {
    pub fn new() -> Self {
        Self
    }

    /// `min`/`max`/`affinity`/`strict` policy fields are read but
    /// currently ignored (spec §4.G edge-case policy + §9 Open
    /// Questions: honoring `min`/`max` is left unspecified, so this
    /// implementation sticks to the literal contract — exactly one
    /// running instance per node, per image).
    ///
    /// `clusterState` is accepted to match the contract's
    /// `schedule(policies, clusterState, dockerState)` signature, but
    /// the node loop below ranges over `dockerState` — per §4.G, "For
    /// each node in dockerState" — not `clusterState`. A node with a
    /// live cluster entry but no gossiped docker inventory yet is
    /// unknown, not empty, and must not be scheduled onto.
    pub fn schedule(
        &self,
        policies: &Policies,
        _cluster_state: &BTreeMap<String, ClusterEntry>,
        docker_state: &BTreeMap<String, DockerEntry>,
    ) -> ActionPlan {
        let mut plan: ActionPlan = BTreeMap::new();

        // Sorted by image name (BTreeMap already iterates in key order).
        for (image, policy) in policies {
            // Sorted by node name (BTreeMap already iterates in key order).
            for (node, images) in docker_state {
                let empty_containers = BTreeMap::new();
                let containers = images.get(image).unwrap_or(&empty_containers);

                let mut running: Vec<(&String, &crate::types::ContainerState)> =
                    containers.iter().filter(|(_, c)| c.running).collect();
                running.sort_by_key(|(id, _)| id.as_str());

                let actions = plan.entry(node.clone()).or_default();

                if running.is_empty() {
                    actions.actions.push(Action::Run {
                        image: image.clone(),
                        name: policy.name.clone(),
                        config: RunConfig {
                            ports: policy.ports.clone(),
                        },
                    });
                } else if running.len() > 1 {
                    for (id, _) in &running[1..] {
                        actions.actions.push(Action::Die {
                            uuid: (*id).clone(),
                        });
                    }
                }
            }
        }

        // The output plan omits nodes with empty action lists.
        plan.retain(|_, actions| !actions.actions.is_empty());
        plan
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new()
    }
}
