//! The seam between the client core and the relay network.

use crate::error::Result;
use crate::message::Filter;
use crate::stream::EventStream;
use async_trait::async_trait;
use hub_nostr::Event;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a reachability probe failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Timeout,
    Error(String),
    /// Socket closed before the handshake finished
    Closed,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "timeout"),
            ProbeFailure::Error(reason) => write!(f, "error: {}", reason),
            ProbeFailure::Closed => write!(f, "closed"),
        }
    }
}

/// Result of publishing one event to one relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayPublishOutcome {
    pub url: String,
    pub accepted: bool,
    pub message: String,
}

/// Relay network operations the client core depends on.
///
/// [`crate::RelayPool`] is the WebSocket implementation; tests plug in an
/// in-memory one.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open and immediately close a connection, returning the handshake latency.
    async fn probe(&self, url: &str, timeout: Duration) -> std::result::Result<Duration, ProbeFailure>;

    /// Open one subscription across `relays`.
    ///
    /// Fails only if no relay accepted it. Events are deduplicated by id and
    /// end-of-stored-events is emitted once every relay has sent EOSE.
    async fn subscribe(&self, relays: &[String], filters: Vec<Filter>) -> Result<EventStream>;

    /// Send `event` to every relay. Never fails as a whole.
    async fn publish(
        &self,
        relays: &[String],
        event: &Event,
        timeout: Duration,
    ) -> Vec<RelayPublishOutcome>;

    /// Drop every open connection.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_failure_display() {
        assert_eq!(ProbeFailure::Timeout.to_string(), "timeout");
        assert_eq!(ProbeFailure::Closed.to_string(), "closed");
        assert_eq!(
            ProbeFailure::Error("refused".to_string()).to_string(),
            "error: refused"
        );
    }
}
