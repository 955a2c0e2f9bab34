// src/cluster/mod.rs

//! Membership heartbeat, liveness tracking, and deterministic
//! coordinator election (spec §4.E).

pub mod state;

use crate::pubsub::PubSub;
use crate::store::Store;
use anyhow::Result;
pub use state::ClusterEntry;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Effective intervals a `Cluster` is configured with, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct ClusterIntervals {
    pub announce: u64,
    pub update: u64,
    pub zombie: u64,
}

/// Cluster membership: seeds its own entry, gossips heartbeats on
/// topic `cluster`, evicts zombies, and answers the coordinator
/// predicate.
pub struct Cluster {
    hostname: String,
    store: Arc<Store<String, ClusterEntry>>,
}

impl Cluster {
    /// Subscribes to `cluster`, seeds the local store with this node's
    /// own entry, and starts the announcer/listener/reaper workers.
    /// Returns the cluster handle plus a channel that yields the
    /// hostname of every node evicted as a zombie, so the
    /// `ContainerAgent` can drop its docker-inventory entry in lockstep
    /// (spec §3 "Docker entries... are destroyed synchronously").
    pub async fn new(
        hostname: String,
        address: String,
        intervals: ClusterIntervals,
        pubsub: PubSub,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<String>)> {
        let store: Arc<Store<String, ClusterEntry>> = Arc::new(Store::new());
        store
            .set(
                hostname.clone(),
                ClusterEntry {
                    address,
                    timestamp: now_secs(),
                    master: false,
                },
            )
            .await;

        let queue = pubsub.subscribe("cluster");
        let (zombie_tx, zombie_rx) = mpsc::channel(128);

        let cluster = Arc::new(Self {
            hostname: hostname.clone(),
            store,
        });

        spawn_announcer(cluster.clone(), pubsub.clone(), intervals.announce, shutdown.resubscribe());
        spawn_listener(cluster.clone(), queue, shutdown.resubscribe());
        spawn_reaper(cluster.clone(), intervals.zombie, intervals.update, zombie_tx, shutdown);

        Ok((cluster, zombie_rx))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &Arc<Store<String, ClusterEntry>> {
        &self.store
    }

    /// True iff exactly one entry in the local `cluster` store has
    /// `master == true` and it is this node's own entry.
    pub async fn is_coordinator(&self) -> bool {
        let entries = self.store.items().await;
        let masters: Vec<&String> = entries
            .iter()
            .filter(|(_, e)| e.master)
            .map(|(h, _)| h)
            .collect();
        matches!(masters.as_slice(), [only] if **only == self.hostname)
    }

    /// Renders a human-readable snapshot, used by the manager's update
    /// worker (spec §4.H step 4).
    pub async fn snapshot(&self) -> String {
        let entries = self.store.items().await;
        serde_json::to_string_pretty(&entries.into_iter().collect::<std::collections::BTreeMap<_, _>>())
            .unwrap_or_default()
    }
}

fn spawn_announcer(
    cluster: Arc<Cluster>,
    pubsub: PubSub,
    announce_interval: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(announce_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("cluster announcer shutting down"); return; }
                _ = tick.tick() => {
                    let Some(mut own) = cluster.store.get(&cluster.hostname.clone()).await else { continue; };
                    own.timestamp = now_secs();
                    cluster.store.set(cluster.hostname.clone(), own.clone()).await;
                    // Covers the solo-node case, where no inbound
                    // heartbeat ever triggers the listener's
                    // reconciliation: a node with no peers is
                    // trivially its own smallest hostname.
                    reconcile_master_bits(&cluster).await;
                    if let Some(refreshed) = cluster.store.get(&cluster.hostname.clone()).await {
                        pubsub.publish("cluster", &refreshed, false).await;
                    }
                }
            }
        }
    });
}

fn spawn_listener(
    cluster: Arc<Cluster>,
    mut queue: mpsc::Receiver<crate::pubsub::Delivery>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("cluster listener shutting down"); return; }
                received = queue.recv() => {
                    let Some(delivery) = received else { return; };
                    let mut entry: ClusterEntry = match serde_json::from_value(delivery.payload) {
                        Ok(e) => e,
                        Err(e) => { warn!("dropping malformed cluster entry from {:?}: {e}", delivery.origin); continue; }
                    };

                    // Receiver's clock, defends against drift/replay delay.
                    entry.timestamp = now_secs();

                    let mut keys = cluster.store.keys().await;
                    keys.push(delivery.origin.clone());
                    let smallest = keys.iter().min().cloned();
                    entry.master = smallest.as_deref() == Some(delivery.origin.as_str());

                    if !cluster.store.contains(&delivery.origin).await {
                        info!("cluster: node {:?} joined", delivery.origin);
                    }
                    cluster.store.set(delivery.origin, entry).await;

                    // Membership just changed, so the set of keys the
                    // coordinator predicate ranges over changed too.
                    // Recompute every entry's `master` bit (including
                    // our own, which the listener otherwise never
                    // touches) so the invariant "at most one master,
                    // always the lexicographically smallest hostname"
                    // holds for the *whole* store, not just the entry
                    // that just arrived.
                    reconcile_master_bits(&cluster).await;
                }
            }
        }
    });
}

async fn reconcile_master_bits(cluster: &Arc<Cluster>) {
    let keys = cluster.store.keys().await;
    let Some(smallest) = keys.iter().min().cloned() else { return; };
    for key in keys {
        if let Some(mut entry) = cluster.store.get(&key).await {
            let should_be_master = key == smallest;
            if entry.master != should_be_master {
                entry.master = should_be_master;
                cluster.store.set(key, entry).await;
            }
        }
    }
}

fn spawn_reaper(
    cluster: Arc<Cluster>,
    zombie_interval: u64,
    update_interval: u64,
    zombie_tx: mpsc::Sender<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(update_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("cluster reaper shutting down"); return; }
                _ = tick.tick() => {
                    let now = now_secs();
                    let entries = cluster.store.items().await;
                    let zombies: Vec<String> = entries
                        .into_iter()
                        .filter(|(hostname, entry)| {
                            hostname != &cluster.hostname && now.saturating_sub(entry.timestamp) > zombie_interval
                        })
                        .map(|(hostname, _)| hostname)
                        .collect();

                    let any_evicted = !zombies.is_empty();
                    for hostname in zombies {
                        warn!("cluster: evicting zombie node {:?}", hostname);
                        cluster.store.delete(&hostname).await;
                        let _ = zombie_tx.send(hostname).await;
                    }
                    if any_evicted {
                        reconcile_master_bits(&cluster).await;
                    }
                }
            }
        }
    });
}
