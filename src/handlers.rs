//! Trigger entry points.
//!
//! Each inbound trigger (connect, disconnect, inbound message, broadcast
//! request) maps to exactly one method here and gets back a plain
//! accept/deny answer. Nothing else is relayed to the triggering party.

use crate::broadcaster::{BroadcastPayload, BroadcastReport, Broadcaster};
use crate::error::BroadcastError;
use crate::lifecycle::ConnectionLifecycleHandler;
use crate::types::ConnectionId;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Accepted,
    Denied,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    /// Body text returned to HTTP-style triggers
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::Denied => "Denied",
        }
    }
}

pub struct EventHandlers {
    lifecycle: ConnectionLifecycleHandler,
    broadcaster: Arc<Broadcaster>,
}

impl EventHandlers {
    pub fn new(lifecycle: ConnectionLifecycleHandler, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            lifecycle,
            broadcaster,
        }
    }

    /// Denied means the transport must refuse the connection.
    pub async fn on_connect(&self, connection_id: &str) -> Verdict {
        match self.lifecycle.on_connect(connection_id).await {
            Ok(_) => {
                info!("Accepted");
                Verdict::Accepted
            }
            Err(e) => {
                warn!("Connect denied for '{}': {}", connection_id, e);
                Verdict::Denied
            }
        }
    }

    pub async fn on_disconnect(&self, connection_id: &str) -> Verdict {
        match self.lifecycle.on_disconnect(connection_id).await {
            Ok(_) => Verdict::Accepted,
            Err(e) => {
                warn!("Disconnect denied for '{}': {}", connection_id, e);
                Verdict::Denied
            }
        }
    }

    /// An inbound message from a connected peer is parsed as JSON and
    /// relayed to every connection, the sender included.
    pub async fn on_message(&self, connection_id: &str, body: &str) -> Verdict {
        let Some(sender) = ConnectionId::parse(connection_id) else {
            warn!("Message denied: connection id missing");
            return Verdict::Denied;
        };

        let payload = match BroadcastPayload::from_json_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Message from {} denied: invalid JSON: {}", sender, e);
                return Verdict::Denied;
            }
        };

        debug!("Broadcasting message from {}", sender);
        match self.broadcaster.broadcast(&payload).await {
            Ok(_) => Verdict::Accepted,
            Err(e) => {
                warn!("Broadcast for {} failed: {}", sender, e);
                Verdict::Denied
            }
        }
    }

    /// Externally requested broadcast. Without a payload a heartbeat
    /// carrying the current UTC time is sent.
    pub async fn on_broadcast_request(
        &self,
        payload: Option<serde_json::Value>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let payload = payload.unwrap_or_else(heartbeat_payload);
        self.broadcaster.broadcast_value(&payload).await
    }
}

pub fn heartbeat_payload() -> serde_json::Value {
    serde_json::json!({ "now": chrono::Utc::now().to_rfc3339() })
}
