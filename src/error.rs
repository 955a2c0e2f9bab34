// src/error.rs

//! Defines the primary error type for the cluster manager runtime.

use thiserror::Error;

/// Errors surfaced by the running manager's components.
///
/// Every variant other than [`ScramblerError::Config`] is logged and
/// swallowed by the worker that produced it; `Config` is the only
/// variant that aborts the process, during startup.
#[derive(Error, Debug)]
pub enum ScramblerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed for origin {0:?}")]
    Auth(String),

    #[error("failed to deserialize payload: {0}")]
    Deserialize(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),
}
