// src/cluster/state.rs

//! The cluster entry type, keyed by hostname in the `cluster` store.

use serde::{Deserialize, Serialize};

/// One node's membership record (spec §3 "Cluster entry").
///
/// `master` is a derived field, not authoritative on its own — it only
/// means something in the context of the *local* store it was computed
/// against (see [`crate::cluster::Cluster::is_coordinator`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterEntry {
    pub address: String,
    /// Monotonic-wallclock seconds of the last heartbeat received,
    /// stamped by the *receiver's* clock.
    pub timestamp: u64,
    pub master: bool,
}
