// src/manager.rs

//! Wires components A–G together and supervises their workers (spec
//! §4.H).

use crate::cluster::{Cluster, ClusterIntervals};
use crate::config::Config;
use crate::docker::{CliDockerEngine, ContainerAgent, ContainerEngine};
use crate::pubsub::transport::ConnectionString;
use crate::pubsub::PubSub;
use crate::scheduler::Distribution;
use crate::types::ActionPlan;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::info;

/// Lifecycle orchestrator: loads configuration, wires up the PubSub
/// bus, the `ContainerAgent`, and `Cluster`, then runs the update and
/// schedule workers until interrupted.
pub struct Manager {
    shutdown_tx: broadcast::Sender<()>,
}

impl Manager {
    /// Builds and starts every component, but does not block — call
    /// [`Manager::run_until_interrupted`] for that.
    pub async fn start(mut config: Config) -> Result<(Self, tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
        config.resolve_identity().await?;
        let hostname = config.hostname.clone().expect("resolve_identity sets hostname");
        let address = config.address.clone().expect("resolve_identity sets address");
        info!("starting cluster manager as {hostname:?} at {address:?}");

        let (shutdown_tx, _) = broadcast::channel(1);

        let conn = ConnectionString::parse(&format!(
            "{}://{}{}:{}",
            config.connection.protocol,
            config
                .connection
                .interface
                .as_ref()
                .map(|i| format!("{i};"))
                .unwrap_or_default(),
            config.connection.group,
            config.connection.port,
        ))
        .context("invalid connection configuration")?;

        let pubsub = PubSub::new(
            &conn,
            config.auth.cluster_key.clone().into_bytes(),
            hostname.clone(),
            shutdown_tx.subscribe(),
        )
        .context("failed to start pubsub bus")?;

        let (cluster, zombie_rx) = Cluster::new(
            hostname.clone(),
            address,
            ClusterIntervals {
                announce: config.interval.announce,
                update: config.interval.update,
                zombie: config.interval.zombie,
            },
            pubsub.clone(),
            shutdown_tx.subscribe(),
        )
        .await
        .context("failed to start cluster membership")?;

        let engine: Arc<dyn ContainerEngine> = Arc::new(CliDockerEngine::new());
        let docker_agent = ContainerAgent::new(
            hostname.clone(),
            config.interval.announce,
            engine,
            pubsub.clone(),
            cluster.store().clone(),
            zombie_rx,
            shutdown_tx.subscribe(),
        )
        .await
        .context("failed to start container agent")?;

        let update_handle = spawn_update_worker(
            cluster.clone(),
            docker_agent.clone(),
            config.interval.update,
            shutdown_tx.subscribe(),
        );

        let schedule_handle = spawn_schedule_worker(
            cluster,
            docker_agent,
            pubsub,
            config.policies.clone(),
            config.interval.schedule,
            shutdown_tx.subscribe(),
        );

        Ok((Self { shutdown_tx }, update_handle, schedule_handle))
    }

    /// Blocks until SIGINT/SIGTERM, then signals every worker to stop.
    pub async fn run_until_interrupted(
        self,
        update_handle: tokio::task::JoinHandle<()>,
        schedule_handle: tokio::task::JoinHandle<()>,
    ) -> Result<()> {
        wait_for_interrupt().await;
        info!("interrupt received, shutting down");
        let _ = self.shutdown_tx.send(());

        // Give workers one polling interval to drain.
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            let _ = update_handle.await;
            let _ = schedule_handle.await;
        })
        .await;

        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

fn spawn_update_worker(
    cluster: Arc<Cluster>,
    docker_agent: Arc<ContainerAgent>,
    update_interval: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(update_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => { return; }
                _ = tick.tick() => {
                    info!("cluster state:\n{}", cluster.snapshot().await);
                    info!("docker state:\n{}", docker_agent.snapshot().await);
                }
            }
        }
    })
}

fn spawn_schedule_worker(
    cluster: Arc<Cluster>,
    docker_agent: Arc<ContainerAgent>,
    pubsub: PubSub,
    policies: crate::types::Policies,
    schedule_interval: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let scheduler = Distribution::new();
        let mut tick = tokio::time::interval(Duration::from_secs(schedule_interval.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => { return; }
                _ = tick.tick() => {
                    if !cluster.is_coordinator().await {
                        continue;
                    }
                    let cluster_state: BTreeMap<_, _> = cluster.store().items().await.into_iter().collect();
                    let docker_state: BTreeMap<_, _> = docker_agent.store().items().await.into_iter().collect();
                    let plan: ActionPlan = scheduler.schedule(&policies, &cluster_state, &docker_state);
                    if !plan.is_empty() {
                        info!("coordinator publishing action plan covering {} node(s)", plan.len());
                        pubsub.publish("schedule", &plan, true).await;
                    } else {
                        tracing::debug!("coordinator computed an empty action plan; nothing to publish");
                    }
                }
            }
        }
    })
}
