use crate::types::ConnectionId;
use bytes::Bytes;

/// Result of pushing one payload to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The peer no longer exists and never will again.
    Gone,
    /// Any other failure. The connection may still be alive.
    Transient(String),
}

/// Pushes payloads to individual connections. Owned by the network layer.
#[async_trait::async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(&self, connection_id: &ConnectionId, payload: Bytes) -> DeliveryOutcome;
}
