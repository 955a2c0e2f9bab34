// src/docker/mod.rs

//! Local container inventory, event ingestion, and cross-node
//! inventory gossip (spec §4.F).

pub mod engine;

pub use engine::{CliDockerEngine, ContainerEngine};

use crate::cluster::ClusterEntry;
use crate::error::ScramblerError;
use crate::pubsub::PubSub;
use crate::store::Store;
use crate::types::{Action, ActionPlan, ContainerState, DockerEntry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Floor on event-stream reconnect backoff (spec §4.F, §7).
const EVENT_RECONNECT_FLOOR: Duration = Duration::from_secs(3);

/// Local inventory + cross-node gossip for container state.
pub struct ContainerAgent {
    hostname: String,
    store: Arc<Store<String, DockerEntry>>,
}

impl ContainerAgent {
    /// Seeds the local entry from `engine.containers()`, subscribes to
    /// `docker` and `schedule`, and starts the announcer, event
    /// ingester, docker-topic handler, and schedule-topic handler
    /// workers. `zombie_rx` is the channel fed by
    /// [`crate::cluster::Cluster`]'s reaper: when a peer's cluster
    /// entry is evicted, its docker entry is destroyed synchronously
    /// (spec §3 Lifecycles).
    pub async fn new(
        hostname: String,
        announce_interval: u64,
        engine: Arc<dyn ContainerEngine>,
        pubsub: PubSub,
        cluster_store: Arc<Store<String, ClusterEntry>>,
        zombie_rx: mpsc::Receiver<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<Arc<Self>> {
        let store: Arc<Store<String, DockerEntry>> = Arc::new(Store::new());
        let own = containers_by_image(engine.as_ref()).await?;
        store.set(hostname.clone(), own).await;

        let docker_queue = pubsub.subscribe("docker");
        let schedule_queue = pubsub.subscribe("schedule");

        let agent = Arc::new(Self {
            hostname: hostname.clone(),
            store,
        });

        spawn_announcer(agent.clone(), pubsub, announce_interval, shutdown.resubscribe());
        spawn_event_ingester(agent.clone(), engine.clone(), shutdown.resubscribe());
        spawn_docker_handler(agent.clone(), docker_queue, shutdown.resubscribe());
        spawn_schedule_handler(agent.clone(), engine, cluster_store, schedule_queue, shutdown.resubscribe());
        spawn_zombie_reaper(agent.clone(), zombie_rx, shutdown);

        Ok(agent)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &Arc<Store<String, DockerEntry>> {
        &self.store
    }

    pub async fn snapshot(&self) -> String {
        let entries = self.store.items().await;
        serde_json::to_string_pretty(&entries.into_iter().collect::<BTreeMap<_, _>>()).unwrap_or_default()
    }
}

/// `containersByImage()`: list the engine's running containers,
/// bucket by image, inspect each to extract `{name, running}`.
async fn containers_by_image(engine: &dyn ContainerEngine) -> anyhow::Result<DockerEntry> {
    let mut result = DockerEntry::new();
    for summary in engine.containers().await? {
        let detail = match engine.inspect(&summary.id).await {
            Ok(d) => d,
            Err(e) => {
                warn!("{}", ScramblerError::Engine(format!("inspecting container {:?}: {e}", summary.id)));
                continue;
            }
        };
        result.entry(summary.image).or_default().insert(
            summary.id,
            ContainerState {
                name: detail.name,
                running: detail.running,
            },
        );
    }
    Ok(result)
}

fn spawn_announcer(
    agent: Arc<ContainerAgent>,
    pubsub: PubSub,
    announce_interval: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(announce_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("docker announcer shutting down"); return; }
                _ = tick.tick() => {
                    if let Some(own) = agent.store.get(&agent.hostname.clone()).await {
                        pubsub.publish("docker", &own, false).await;
                    }
                }
            }
        }
    });
}

fn spawn_event_ingester(
    agent: Arc<ContainerAgent>,
    engine: Arc<dyn ContainerEngine>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.try_recv().is_ok() {
                debug!("docker event ingester shutting down");
                return;
            }

            match engine.next_events().await {
                Ok(events) if !events.is_empty() => {
                    for event in events {
                        apply_event(&agent, &engine, event).await;
                    }
                }
                Ok(_) => {
                    // Stream yielded nothing this round; treat like a
                    // termination and reconnect after the backoff floor.
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(EVENT_RECONNECT_FLOOR) => {}
                    }
                }
                Err(e) => {
                    warn!("{}", ScramblerError::Engine(format!("event stream: {e}; reconnecting in {EVENT_RECONNECT_FLOOR:?}")));
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(EVENT_RECONNECT_FLOOR) => {}
                    }
                }
            }
        }
    });
}

async fn apply_event(agent: &Arc<ContainerAgent>, engine: &Arc<dyn ContainerEngine>, event: engine::EngineEvent) {
    match event.status.as_str() {
        "start" => {
            let detail = match engine.inspect(&event.id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("{}", ScramblerError::Engine(format!("inspecting started container {:?}: {e}", event.id)));
                    return;
                }
            };
            let mut own = agent
                .store
                .get(&agent.hostname.clone())
                .await
                .unwrap_or_default();
            own.entry(event.image.clone()).or_default().insert(
                event.id.clone(),
                ContainerState {
                    name: detail.name,
                    running: true,
                },
            );
            agent.store.set(agent.hostname.clone(), own).await;
        }
        "die" => {
            let mut own = agent
                .store
                .get(&agent.hostname.clone())
                .await
                .unwrap_or_default();
            if let Some(containers) = own.get_mut(&event.image) {
                containers.remove(&event.id);
            }
            agent.store.set(agent.hostname.clone(), own).await;
        }
        _ => { /* other statuses are ignored */ }
    }
}

fn spawn_docker_handler(
    agent: Arc<ContainerAgent>,
    mut queue: mpsc::Receiver<crate::pubsub::Delivery>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("docker-topic handler shutting down"); return; }
                received = queue.recv() => {
                    let Some(delivery) = received else { return; };
                    if delivery.origin == agent.hostname {
                        continue;
                    }
                    match serde_json::from_value::<DockerEntry>(delivery.payload) {
                        Ok(data) => {
                            agent.store.set(delivery.origin, data).await;
                        }
                        Err(e) => warn!("{}", ScramblerError::Deserialize(format!("docker entry from {:?}: {e}", delivery.origin))),
                    }
                }
            }
        }
    });
}

fn spawn_schedule_handler(
    agent: Arc<ContainerAgent>,
    engine: Arc<dyn ContainerEngine>,
    cluster_store: Arc<Store<String, ClusterEntry>>,
    mut queue: mpsc::Receiver<crate::pubsub::Delivery>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("schedule-topic handler shutting down"); return; }
                received = queue.recv() => {
                    let Some(delivery) = received else { return; };

                    // Defensive: ignore plans from a node we don't
                    // currently believe is the coordinator (spec §9
                    // Open Questions).
                    match cluster_store.get(&delivery.origin).await {
                        Some(entry) if entry.master => {}
                        _ => {
                            warn!(
                                "ignoring schedule plan from {:?}: not the believed coordinator",
                                delivery.origin
                            );
                            continue;
                        }
                    }

                    let plan: ActionPlan = match serde_json::from_value(delivery.payload) {
                        Ok(p) => p,
                        Err(e) => { warn!("{}", ScramblerError::Deserialize(format!("action plan from {:?}: {e}", delivery.origin))); continue; }
                    };

                    let Some(node_actions) = plan.get(&agent.hostname) else { continue; };
                    for action in &node_actions.actions {
                        match action {
                            Action::Run { image, config, .. } => {
                                match engine.create_container(image, true, &config.ports).await {
                                    Ok(id) => {
                                        if let Err(e) = engine.start(&id, &config.ports).await {
                                            warn!("{}", ScramblerError::Engine(format!("starting container {id:?} for image {image:?}: {e}")));
                                        } else {
                                            info!("started container {id:?} for image {image:?} from plan by {:?}", delivery.origin);
                                        }
                                    }
                                    Err(e) => warn!("{}", ScramblerError::Engine(format!("creating container for image {image:?}: {e}"))),
                                }
                            }
                            Action::Die { uuid } => {
                                if let Err(e) = engine.kill(uuid).await {
                                    warn!("{}", ScramblerError::Engine(format!("killing container {uuid:?}: {e}")));
                                }
                            }
                        }
                    }
                }
            }
        }
    });
}

fn spawn_zombie_reaper(
    agent: Arc<ContainerAgent>,
    mut zombie_rx: mpsc::Receiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => { debug!("docker zombie reaper shutting down"); return; }
                received = zombie_rx.recv() => {
                    let Some(hostname) = received else { return; };
                    agent.store.delete(&hostname).await;
                }
            }
        }
    });
}
