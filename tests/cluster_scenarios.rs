// tests/cluster_scenarios.rs

//! End-to-end scenarios from spec §8, exercised over the real
//! multicast transport (no mocked network): election, zombie
//! eviction, and rejection of forged envelopes.

use scrambler::cluster::{Cluster, ClusterIntervals};
use scrambler::pubsub::PubSub;
use std::time::Duration;
use tokio::sync::broadcast;

const KEY: &[u8] = b"test-shared-secret";

async fn spin_up(
    conn: &str,
    hostname: &str,
    intervals: ClusterIntervals,
) -> (std::sync::Arc<Cluster>, broadcast::Sender<()>) {
    let connection = scrambler::pubsub::transport::ConnectionString::parse(conn).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let pubsub = PubSub::new(&connection, KEY.to_vec(), hostname.to_string(), shutdown_rx).unwrap();
    let (cluster, _zombie_rx) = Cluster::new(
        hostname.to_string(),
        format!("10.0.0.{}", hostname.len()),
        intervals,
        pubsub,
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();
    (cluster, shutdown_tx)
}

#[tokio::test]
async fn election_picks_lexicographically_smallest_hostname() {
    let conn = "udp://224.0.2.10:15101";
    let intervals = ClusterIntervals {
        announce: 1,
        update: 1,
        zombie: 30,
    };

    let (alpha, _a_shutdown) = spin_up(conn, "alpha", intervals).await;
    let (bravo, _b_shutdown) = spin_up(conn, "bravo", intervals).await;
    let (charlie, _c_shutdown) = spin_up(conn, "charlie", intervals).await;

    // Give two announce cycles for heartbeats to converge.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(alpha.is_coordinator().await, "alpha should be coordinator");
    assert!(!bravo.is_coordinator().await);
    assert!(!charlie.is_coordinator().await);
}

#[tokio::test]
async fn zombie_node_is_evicted_after_silence() {
    let conn = "udp://224.0.2.11:15102";
    let intervals = ClusterIntervals {
        announce: 1,
        update: 1,
        zombie: 2,
    };

    let (node_a, _a_shutdown) = spin_up(conn, "a-node", intervals).await;
    let (_node_b, b_shutdown) = spin_up(conn, "b-node", intervals).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(node_a.store().keys().await.len(), 2, "both nodes should be visible");

    // Silence b: stop its announcer (and every other worker) by firing
    // shutdown, without touching a.
    let _ = b_shutdown.send(());

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let remaining = node_a.store().keys().await;
    assert_eq!(remaining, vec!["a-node".to_string()], "b-node should have been reaped as a zombie");
    assert!(node_a.is_coordinator().await);
}

#[tokio::test]
async fn forged_envelope_is_never_admitted() {
    let conn = "udp://224.0.2.12:15103";
    let intervals = ClusterIntervals {
        announce: 1,
        update: 1,
        zombie: 30,
    };
    let (node_a, _a_shutdown) = spin_up(conn, "a-node", intervals).await;

    // Craft a raw envelope claiming to be "mallory" with a bogus tag,
    // and inject it directly onto the multicast group — bypassing our
    // own PubSub so the tag is never honestly computed.
    let forged = serde_json::json!({
        "topic": "cluster",
        "origin": "mallory",
        "tag": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        "payload": { "address": "10.6.6.6", "timestamp": 0, "master": true },
    });
    let bytes = serde_json::to_vec(&forged).unwrap();

    let connection = scrambler::pubsub::transport::ConnectionString::parse(conn).unwrap();
    let injector = scrambler::pubsub::transport::bind_multicast(&connection).unwrap();
    injector.send_to(&bytes, connection.group_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert!(
        !node_a.store().contains(&"mallory".to_string()).await,
        "forged envelope must never be admitted into the cluster store"
    );
}
