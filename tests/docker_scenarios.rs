// tests/docker_scenarios.rs

//! End-to-end coordinator-loopback scenario from spec §8: the
//! coordinator publishes its own action plan with loopback enabled and
//! must execute each action exactly once, never twice via the
//! multicast echo.

mod common;

use common::{Call, MockEngine};
use scrambler::cluster::{Cluster, ClusterIntervals};
use scrambler::docker::ContainerAgent;
use scrambler::pubsub::PubSub;
use scrambler::scheduler::Distribution;
use scrambler::types::{DockerEntry, Policies, Policy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const KEY: &[u8] = b"test-shared-secret";

#[tokio::test]
async fn coordinator_loopback_executes_exactly_once() {
    let conn = "udp://224.0.2.20:15201";
    let connection = scrambler::pubsub::transport::ConnectionString::parse(conn).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let pubsub = PubSub::new(&connection, KEY.to_vec(), "alpha".to_string(), shutdown_rx).unwrap();

    let intervals = ClusterIntervals {
        announce: 1,
        update: 1,
        zombie: 30,
    };
    let (cluster, zombie_rx) = Cluster::new(
        "alpha".to_string(),
        "10.0.0.1".to_string(),
        intervals,
        pubsub.clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();

    // Solo node: alpha should be its own coordinator once the
    // announcer's first tick reconciles master bits.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(cluster.is_coordinator().await);

    let engine = Arc::new(MockEngine::new());
    let agent = ContainerAgent::new(
        "alpha".to_string(),
        1,
        engine.clone() as Arc<dyn scrambler::docker::ContainerEngine>,
        pubsub.clone(),
        cluster.store().clone(),
        zombie_rx,
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();

    let mut policies = Policies::new();
    policies.insert(
        "nginx".to_string(),
        Policy {
            name: "web".to_string(),
            ports: BTreeMap::new(),
            min: None,
            max: None,
            affinity: None,
            strict: None,
        },
    );
    let cluster_state = cluster.store().items().await.into_iter().collect();
    let docker_state: BTreeMap<String, DockerEntry> = agent.store().items().await.into_iter().collect();

    let plan = Distribution::new().schedule(&policies, &cluster_state, &docker_state);
    assert_eq!(plan["alpha"].actions.len(), 1);

    pubsub.publish("schedule", &plan, true).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let calls = engine.calls();
    let creates = calls.iter().filter(|c| matches!(c, Call::Create { .. })).count();
    let starts = calls.iter().filter(|c| matches!(c, Call::Start { .. })).count();
    assert_eq!(creates, 1, "expected exactly one create, got {calls:?}");
    assert_eq!(starts, 1, "expected exactly one start, got {calls:?}");
}

#[tokio::test]
async fn schedule_plan_from_non_coordinator_is_ignored() {
    // "alpha" believes itself coordinator (solo node); a plan claiming
    // to come from "mallory" (never a known, master-flagged peer) must
    // not be executed.
    let conn = "udp://224.0.2.21:15202";
    let connection = scrambler::pubsub::transport::ConnectionString::parse(conn).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let pubsub = PubSub::new(&connection, KEY.to_vec(), "alpha".to_string(), shutdown_rx).unwrap();

    let intervals = ClusterIntervals {
        announce: 1,
        update: 1,
        zombie: 30,
    };
    let (cluster, zombie_rx) = Cluster::new(
        "alpha".to_string(),
        "10.0.0.1".to_string(),
        intervals,
        pubsub.clone(),
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let engine = Arc::new(MockEngine::new());
    let _agent = ContainerAgent::new(
        "alpha".to_string(),
        1,
        engine.clone() as Arc<dyn scrambler::docker::ContainerEngine>,
        pubsub.clone(),
        cluster.store().clone(),
        zombie_rx,
        shutdown_tx.subscribe(),
    )
    .await
    .unwrap();

    // Forge a raw envelope from an unknown, non-coordinator origin.
    let forged = serde_json::json!({
        "topic": "schedule",
        "origin": "mallory",
        "tag": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        "payload": { "alpha": { "actions": [{ "do": "run", "image": "nginx", "name": "web", "config": { "ports": {} } }] } },
    });
    let bytes = serde_json::to_vec(&forged).unwrap();
    let injector = scrambler::pubsub::transport::bind_multicast(&connection).unwrap();
    injector.send_to(&bytes, connection.group_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert!(engine.calls().is_empty(), "plan from unauthenticated/non-coordinator origin must not execute");
}
