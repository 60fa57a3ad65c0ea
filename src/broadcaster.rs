//! Fan-out of one payload to every registered connection.
//!
//! A broadcast takes a single snapshot of the registry, spawns one delivery
//! task per connection and joins them all. Deliveries that come back `Gone`
//! delete their registry entry from inside the task, so the registry heals
//! itself as stale peers are discovered, even if the caller stops waiting.

use crate::error::BroadcastError;
use crate::storage::ConnectionStore;
use crate::transport::{DeliveryOutcome, DeliveryTransport};
use crate::types::ConnectionId;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A message encoded once and delivered byte-identically to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPayload {
    bytes: Bytes,
}

impl BroadcastPayload {
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            bytes: Bytes::from(serde_json::to_vec(value)?),
        })
    }

    /// Parse a raw JSON body and re-encode it compactly. Object keys keep
    /// the order the sender wrote them in.
    pub fn from_json_str(body: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        Self::from_value(&value)
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub gone: usize,
    pub transient: usize,
    /// Attempts still in flight when the deadline passed
    pub abandoned: usize,
    /// Gone entries whose registry delete itself failed
    pub cleanup_failed: usize,
    /// Connections removed from the registry as stale
    pub removed: Vec<ConnectionId>,
}

impl BroadcastReport {
    fn resolved(&self) -> usize {
        self.delivered + self.gone + self.transient
    }

    fn record(&mut self, attempt: Attempt) {
        match attempt.outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Gone => {
                self.gone += 1;
                if attempt.cleaned_up {
                    self.removed.push(attempt.connection_id);
                } else {
                    self.cleanup_failed += 1;
                }
            }
            DeliveryOutcome::Transient(_) => self.transient += 1,
        }
    }
}

struct Attempt {
    connection_id: ConnectionId,
    outcome: DeliveryOutcome,
    cleaned_up: bool,
}

pub struct Broadcaster {
    store: Arc<dyn ConnectionStore>,
    transport: Arc<dyn DeliveryTransport>,
    deadline: Option<Duration>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn ConnectionStore>, transport: Arc<dyn DeliveryTransport>) -> Self {
        Self {
            store,
            transport,
            deadline: None,
        }
    }

    /// Stop waiting for deliveries after `deadline`. Unfinished attempts keep
    /// running detached and are reported as abandoned.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Encode `value` and broadcast it.
    pub async fn broadcast_value<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<BroadcastReport, BroadcastError> {
        let payload = BroadcastPayload::from_value(value)?;
        self.broadcast(&payload).await
    }

    /// Deliver `payload` to every registered connection.
    ///
    /// Fails only when the registry cannot be enumerated; individual delivery
    /// failures are reflected in the report.
    pub async fn broadcast(
        &self,
        payload: &BroadcastPayload,
    ) -> Result<BroadcastReport, BroadcastError> {
        debug!("Getting connections...");
        let records = self.store.list_all().await?;

        let mut report = BroadcastReport {
            attempted: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            debug!("Broadcast: no connections registered");
            return Ok(report);
        }

        debug!(
            connections = records.len(),
            bytes = payload.len(),
            "Sending broadcast"
        );

        let mut tasks = JoinSet::new();
        for record in records {
            let store = Arc::clone(&self.store);
            let transport = Arc::clone(&self.transport);
            let bytes = payload.bytes();
            tasks.spawn(deliver(store, transport, record.connection_id, bytes));
        }

        match self.deadline {
            Some(deadline) => {
                let joined = tokio::time::timeout(deadline, join_all(&mut tasks, &mut report)).await;
                if joined.is_err() {
                    report.abandoned = report.attempted - report.resolved();
                    warn!(
                        abandoned = report.abandoned,
                        deadline_ms = deadline.as_millis() as u64,
                        "Broadcast deadline exceeded, abandoning in-flight deliveries"
                    );
                    tasks.detach_all();
                }
            }
            None => join_all(&mut tasks, &mut report).await,
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            gone = report.gone,
            transient = report.transient,
            abandoned = report.abandoned,
            "Broadcast complete"
        );

        Ok(report)
    }
}

async fn join_all(tasks: &mut JoinSet<Attempt>, report: &mut BroadcastReport) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(attempt) => report.record(attempt),
            Err(e) => {
                // A panicking transport is just another failed delivery
                warn!("Delivery task failed: {}", e);
                report.transient += 1;
            }
        }
    }
}

async fn deliver(
    store: Arc<dyn ConnectionStore>,
    transport: Arc<dyn DeliveryTransport>,
    connection_id: ConnectionId,
    payload: Bytes,
) -> Attempt {
    let outcome = transport.send(&connection_id, payload).await;
    let mut cleaned_up = false;

    match &outcome {
        DeliveryOutcome::Delivered => {
            debug!("Delivered to {}", connection_id);
        }
        DeliveryOutcome::Gone => {
            info!("Found stale connection, deleting {}", connection_id);
            match store.delete(&connection_id).await {
                Ok(()) => cleaned_up = true,
                Err(e) => warn!("Failed to delete stale connection {}: {}", connection_id, e),
            }
        }
        DeliveryOutcome::Transient(reason) => {
            warn!("Failed to deliver to {}: {}", connection_id, reason);
        }
    }

    Attempt {
        connection_id,
        outcome,
        cleaned_up,
    }
}
