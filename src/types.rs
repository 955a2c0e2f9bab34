// src/types.rs

//! Shared wire/data-model types from spec §3, used by both the
//! `docker` reconciler and the `scheduler`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One container as tracked in a node's docker inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub running: bool,
}

/// `image -> containerId -> {name, running}`, one node's inventory.
pub type DockerEntry = BTreeMap<String, BTreeMap<String, ContainerState>>;

/// The declared desired state for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub affinity: Option<bool>,
    #[serde(default)]
    pub strict: Option<bool>,
}

/// `image -> Policy`.
pub type Policies = BTreeMap<String, Policy>;

/// One scheduling decision for a target node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum Action {
    Run {
        image: String,
        name: String,
        config: RunConfig,
    },
    Die {
        uuid: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    pub ports: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct NodeActions {
    pub actions: Vec<Action>,
}

/// `hostname -> { actions: [Action, ...] }`, produced only by the
/// coordinator.
pub type ActionPlan = BTreeMap<String, NodeActions>;
