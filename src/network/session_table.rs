//! Outbound queues of the WebSocket sessions served by this process.
//!
//! This is transport state, not registry state: it tells the delivery path
//! where to write for a connection id, and reports `Gone` when there is no
//! longer anywhere to write.

use crate::transport::{DeliveryOutcome, DeliveryTransport};
use crate::types::ConnectionId;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub struct SessionTable {
    sessions: DashMap<ConnectionId, mpsc::Sender<Bytes>>,
    queue_depth: usize,
}

impl SessionTable {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Open an outbound queue for a session. Payloads sent before the socket
    /// is writable wait in the queue.
    pub fn open(&self, connection_id: ConnectionId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.sessions.insert(connection_id, tx);
        rx
    }

    pub fn close(&self, connection_id: &ConnectionId) {
        if self.sessions.remove(connection_id).is_some() {
            debug!("Closed session queue for {}", connection_id);
        }
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.sessions.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait::async_trait]
impl DeliveryTransport for SessionTable {
    async fn send(&self, connection_id: &ConnectionId, payload: Bytes) -> DeliveryOutcome {
        let result = match self.sessions.get(connection_id) {
            Some(sender) => sender.try_send(payload),
            None => return DeliveryOutcome::Gone,
        };

        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                DeliveryOutcome::Transient("outbound queue full".to_string())
            }
            Err(TrySendError::Closed(_)) => {
                self.sessions
                    .remove_if(connection_id, |_, sender| sender.is_closed());
                DeliveryOutcome::Gone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_connection_is_gone() {
        let table = SessionTable::new(4);
        assert_eq!(
            table.send(&id("nobody"), Bytes::from_static(b"{}")).await,
            DeliveryOutcome::Gone
        );
    }

    #[tokio::test]
    async fn test_delivered_payload_reaches_queue() {
        let table = SessionTable::new(4);
        let mut rx = table.open(id("a"));

        let outcome = table.send(&id("a"), Bytes::from_static(b"{\"n\":1}")).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"{\"n\":1}");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_gone_and_forgotten() {
        let table = SessionTable::new(4);
        let rx = table.open(id("a"));
        drop(rx);

        let outcome = table.send(&id("a"), Bytes::from_static(b"{}")).await;

        assert_eq!(outcome, DeliveryOutcome::Gone);
        assert!(!table.contains(&id("a")));
    }

    #[tokio::test]
    async fn test_full_queue_is_transient() {
        let table = SessionTable::new(1);
        let _rx = table.open(id("a"));

        assert_eq!(
            table.send(&id("a"), Bytes::from_static(b"1")).await,
            DeliveryOutcome::Delivered
        );
        assert!(matches!(
            table.send(&id("a"), Bytes::from_static(b"2")).await,
            DeliveryOutcome::Transient(_)
        ));
        assert!(table.contains(&id("a")));
    }
}
