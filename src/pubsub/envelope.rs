// src/pubsub/envelope.rs

//! Wire envelope for authenticated multicast messages.
//!
//! The reference transport (ZeroMQ/epgm) frames four byte segments;
//! since our transport is a single UDP datagram (inherently
//! message-oriented, never needing explicit frame delimiters), the
//! four logical fields are carried as one JSON object per datagram.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(topic, origin, authTag, payload)` as named in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub origin: String,
    /// Hex-encoded HMAC tag over `origin`.
    pub tag: String,
    pub payload: Value,
}

/// A message delivered to an in-process subscriber, post-verification.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub origin: String,
    pub payload: Value,
}
