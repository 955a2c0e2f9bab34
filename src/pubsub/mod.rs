// src/pubsub/mod.rs

//! Authenticated multicast publish/subscribe bus with in-process
//! per-topic fan-out (spec §4.D).
//!
//! Two long-lived workers run per instance: a publisher that drains
//! outbound messages onto the multicast socket, and a subscriber that
//! polls the socket, authenticates inbound envelopes, and fans valid
//! ones out to whichever in-process topic queue is listening.

pub mod envelope;
pub mod transport;

use crate::auth::Auth;
use crate::error::ScramblerError;
pub use envelope::{Delivery, Envelope};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, warn};
use transport::ConnectionString;

/// Bound of every in-process subscription queue and the outbound
/// publish queue, matching the reference transport's default
/// high-water mark (spec §4.D).
const QUEUE_CAPACITY: usize = 1000;
const POLL_BOUND: Duration = Duration::from_secs(1);

struct Outbound {
    topic: String,
    payload: Value,
    loopback: bool,
}

/// Authenticated multicast bus. Cheaply cloneable — every clone shares
/// the same subscriptions map and outbound queue.
#[derive(Clone)]
pub struct PubSub {
    origin: String,
    auth: Arc<Auth>,
    subscriptions: Arc<DashMap<String, mpsc::Sender<Delivery>>>,
    outbound_tx: mpsc::Sender<Outbound>,
}

impl PubSub {
    /// Binds the multicast socket described by `conn`, then spawns the
    /// publisher and subscriber workers. Both workers stop within one
    /// polling interval of `shutdown` firing.
    pub fn new(
        conn: &ConnectionString,
        key: Vec<u8>,
        origin: String,
        shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<Self> {
        let socket = transport::bind_multicast(conn)?;
        let group_addr = conn.group_addr();
        let auth = Arc::new(Auth::new(key, origin.clone()));
        let subscriptions: Arc<DashMap<String, mpsc::Sender<Delivery>>> = Arc::new(DashMap::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);

        let socket = Arc::new(socket);
        spawn_publisher(
            socket.clone(),
            group_addr,
            auth.clone(),
            origin.clone(),
            subscriptions.clone(),
            outbound_rx,
            shutdown.resubscribe(),
        );
        spawn_subscriber(socket, auth.clone(), origin.clone(), subscriptions.clone(), shutdown);

        Ok(Self {
            origin,
            auth,
            subscriptions,
            outbound_tx,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// This node's own authentication tag, as computed by [`Auth::digest`].
    pub fn digest(&self) -> String {
        self.auth.digest()
    }

    /// Registers `topic` with the transport and returns a bounded FIFO
    /// that will receive `(topic, origin, payload)` deliveries.
    pub fn subscribe(&self, topic: &str) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        self.subscriptions.insert(topic.to_string(), tx);
        rx
    }

    /// Enqueues `payload` for transmission on `topic`. When `loopback`
    /// is true, the message is additionally (not instead) delivered to
    /// any local subscriber without transiting the network, which is
    /// how the coordinator is guaranteed to receive its own action
    /// plan deterministically.
    pub async fn publish(&self, topic: &str, payload: impl Serialize, loopback: bool) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("{}", ScramblerError::Deserialize(format!("topic {topic:?}: {e}")));
                return;
            }
        };
        let outbound = Outbound {
            topic: topic.to_string(),
            payload,
            loopback,
        };
        if self.outbound_tx.send(outbound).await.is_err() {
            warn!("publisher worker has shut down; dropping publish on topic {topic:?}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_publisher(
    socket: Arc<UdpSocket>,
    group_addr: SocketAddr,
    auth: Arc<Auth>,
    origin: String,
    subscriptions: Arc<DashMap<String, mpsc::Sender<Delivery>>>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("pubsub publisher worker shutting down");
                    return;
                }
                received = outbound_rx.recv() => {
                    let Some(outbound) = received else { return; };
                    let envelope = Envelope {
                        topic: outbound.topic.clone(),
                        origin: origin.clone(),
                        tag: auth.digest(),
                        payload: outbound.payload.clone(),
                    };
                    match serde_json::to_vec(&envelope) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, group_addr).await {
                                warn!("{}", ScramblerError::Transport(format!("publish on topic {:?}: {e}", outbound.topic)));
                            }
                        }
                        Err(e) => warn!(
                            "{}",
                            ScramblerError::Deserialize(format!("encoding envelope for topic {:?}: {e}", outbound.topic))
                        ),
                    }

                    if outbound.loopback {
                        if let Some(sender) = subscriptions.get(&outbound.topic) {
                            let delivery = Delivery {
                                topic: outbound.topic.clone(),
                                origin: origin.clone(),
                                payload: outbound.payload,
                            };
                            if sender.try_send(delivery).is_err() {
                                warn!("loopback delivery queue full for topic {:?}", outbound.topic);
                            }
                        }
                    }
                }
            }
        }
    });
}

fn spawn_subscriber(
    socket: Arc<UdpSocket>,
    auth: Arc<Auth>,
    self_origin: String,
    subscriptions: Arc<DashMap<String, mpsc::Sender<Delivery>>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            if shutdown.try_recv().is_ok() {
                debug!("pubsub subscriber worker shutting down");
                return;
            }

            let recv = tokio::time::timeout(POLL_BOUND, socket.recv_from(&mut buf)).await;
            let (len, _peer) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("{}", ScramblerError::Transport(format!("polling multicast socket: {e}")));
                    continue;
                }
                Err(_) => continue, // periodic wake to recheck shutdown
            };

            let envelope: Envelope = match serde_json::from_slice(&buf[..len]) {
                Ok(e) => e,
                Err(e) => {
                    warn!("{}", ScramblerError::Deserialize(format!("envelope: {e}")));
                    continue;
                }
            };

            if envelope.origin == self_origin {
                // Our own reflection off the multicast group; loopback
                // delivery (if requested) already handled this locally.
                continue;
            }

            if !auth.verify(&envelope.tag, &envelope.origin) {
                warn!(
                    "{}",
                    ScramblerError::Auth(format!("{:?} on topic {:?}", envelope.origin, envelope.topic))
                );
                continue;
            }

            if let Some(sender) = subscriptions.get(&envelope.topic) {
                let delivery = Delivery {
                    topic: envelope.topic.clone(),
                    origin: envelope.origin,
                    payload: envelope.payload,
                };
                if sender.try_send(delivery).is_err() {
                    warn!("subscriber queue full for topic {:?}; dropping message", envelope.topic);
                }
            }
        }
    });
}
