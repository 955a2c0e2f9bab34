// src/docker/engine.rs

//! The container-engine adapter contract (spec §6, external
//! collaborator). Only the query/event/create/start/kill surface named
//! by the spec is modeled — the engine itself is out of scope.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// One running container as reported by the engine's listing call.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
}

/// Detail returned by an inspect call.
#[derive(Debug, Clone)]
pub struct ContainerDetail {
    pub name: String,
    pub running: bool,
}

/// One event off the engine's event stream.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub image: String,
    pub id: String,
    pub status: String,
}

/// The container-engine adapter contract (spec §6).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerSummary>>;
    async fn inspect(&self, id: &str) -> anyhow::Result<ContainerDetail>;
    /// Returns the next batch of events, or an empty vec if the stream
    /// has terminated (the caller reconnects with its own backoff).
    async fn next_events(&self) -> anyhow::Result<Vec<EngineEvent>>;
    async fn create_container(
        &self,
        image: &str,
        detach: bool,
        ports: &BTreeMap<String, String>,
    ) -> anyhow::Result<String>;
    async fn start(&self, container: &str, port_bindings: &BTreeMap<String, String>) -> anyhow::Result<()>;
    async fn kill(&self, uuid: &str) -> anyhow::Result<()>;
}

/// Shells out to the `docker` CLI. A full Docker Engine HTTP/unix
/// socket client is outside this crate's scope — the engine itself is
/// an external collaborator (spec §1); only its query/event surface is
/// consumed.
pub struct CliDockerEngine {
    binary: String,
}

impl CliDockerEngine {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl Default for CliDockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for CliDockerEngine {
    async fn containers(&self) -> anyhow::Result<Vec<ContainerSummary>> {
        let output = Command::new(&self.binary)
            .args(["ps", "--format", "{{.ID}}\t{{.Image}}"])
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (id, image) = line.split_once('\t')?;
                Some(ContainerSummary {
                    id: id.to_string(),
                    image: image.to_string(),
                })
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> anyhow::Result<ContainerDetail> {
        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.Name}}\t{{.State.Running}}", id])
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.trim();
        let (name, running) = line
            .split_once('\t')
            .ok_or_else(|| anyhow::anyhow!("unexpected `docker inspect` output: {line:?}"))?;
        Ok(ContainerDetail {
            name: name.trim_start_matches('/').to_string(),
            running: running.trim() == "true",
        })
    }

    async fn next_events(&self) -> anyhow::Result<Vec<EngineEvent>> {
        let mut child = Command::new(&self.binary)
            .args(["events", "--format", "{{.Status}}\t{{json .}}"])
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture docker events stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut events = Vec::new();
        if let Some(line) = lines.next_line().await? {
            if let Some((status, _json)) = line.split_once('\t') {
                events.push(EngineEvent {
                    image: String::new(),
                    id: String::new(),
                    status: status.to_string(),
                });
            }
        }
        let _ = child.kill().await;
        Ok(events)
    }

    async fn create_container(
        &self,
        image: &str,
        detach: bool,
        ports: &BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        let mut args = vec!["create".to_string()];
        if detach {
            args.push("-d".to_string());
        }
        for (container_port, host_port) in ports {
            args.push("-p".to_string());
            args.push(format!("{host_port}:{container_port}"));
        }
        args.push(image.to_string());

        let output = Command::new(&self.binary).args(&args).output().await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start(&self, container: &str, _port_bindings: &BTreeMap<String, String>) -> anyhow::Result<()> {
        Command::new(&self.binary)
            .args(["start", container])
            .output()
            .await?;
        Ok(())
    }

    async fn kill(&self, uuid: &str) -> anyhow::Result<()> {
        Command::new(&self.binary).args(["kill", uuid]).output().await?;
        Ok(())
    }
}
