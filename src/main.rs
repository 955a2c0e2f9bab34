// src/main.rs

//! The main entry point for the `scrambler` cluster manager.

use anyhow::Result;
use scrambler::config::{Config, DEFAULT_CONFIG_PATH};
use scrambler::manager::Manager;
use std::env;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .init();

    // One documented positional argument (network interface name),
    // plus an optional `--config <path>` override (spec §6: "path
    // overridable"). No argument-parsing crate, matching the spec's
    // Non-goal of excluding CLI-parsing machinery from this crate's
    // core engineering.
    let args: Vec<String> = env::args().collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let interface_arg = args.get(1).filter(|a| !a.starts_with("--")).cloned();

    let mut config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from {config_path:?}: {e:#}");
            std::process::exit(1);
        }
    };
    if let Some(interface) = interface_arg {
        config.connection.interface = Some(interface);
    }

    let (manager, update_handle, schedule_handle) = match Manager::start(config).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("failed to start cluster manager: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = manager
        .run_until_interrupted(update_handle, schedule_handle)
        .await
    {
        error!("manager runtime error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
