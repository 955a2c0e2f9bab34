// tests/common/mod.rs

//! Shared test fixtures for the end-to-end scenarios in spec §8: an
//! in-memory `ContainerEngine` fake so tests can observe exactly what
//! a `ContainerAgent` would have told a real engine to do, without
//! shelling out to `docker`.

use async_trait::async_trait;
use scrambler::docker::engine::{ContainerDetail, ContainerEngine, ContainerSummary, EngineEvent};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { image: String },
    Start { container: String },
    Kill { uuid: String },
}

/// Records every call it receives; never produces real events.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u64>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerSummary>> {
        Ok(Vec::new())
    }

    async fn inspect(&self, _id: &str) -> anyhow::Result<ContainerDetail> {
        Ok(ContainerDetail {
            name: "mock".to_string(),
            running: true,
        })
    }

    async fn next_events(&self) -> anyhow::Result<Vec<EngineEvent>> {
        // Never produces events; the test drives state purely through
        // schedule-topic delivery, not the event stream.
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn create_container(
        &self,
        image: &str,
        _detach: bool,
        _ports: &BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(Call::Create {
            image: image.to_string(),
        });
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(format!("mock-container-{id}"))
    }

    async fn start(&self, container: &str, _port_bindings: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Start {
            container: container.to_string(),
        });
        Ok(())
    }

    async fn kill(&self, uuid: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Call::Kill { uuid: uuid.to_string() });
        Ok(())
    }
}
