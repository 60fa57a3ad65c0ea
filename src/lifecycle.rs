//! Connect/disconnect handling for the connection registry.

use crate::error::LifecycleError;
use crate::storage::ConnectionStore;
use crate::types::{ConnectionId, ConnectionRecord};
use std::sync::Arc;
use tracing::info;

pub struct ConnectionLifecycleHandler {
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionLifecycleHandler {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }

    /// Register a newly accepted connection.
    ///
    /// Must complete before the transport finishes its accept handshake; an
    /// error here means the connection has to be refused, since a peer the
    /// registry does not know about can never be cleaned up.
    pub async fn on_connect(&self, connection_id: &str) -> Result<ConnectionId, LifecycleError> {
        let connection_id =
            ConnectionId::parse(connection_id).ok_or(LifecycleError::InvalidConnection)?;

        info!("Storing connection: {}", connection_id);
        self.store
            .put(ConnectionRecord::new(connection_id.clone()))
            .await?;

        Ok(connection_id)
    }

    /// Drop a connection from the registry. Succeeds whether or not the id
    /// was present.
    pub async fn on_disconnect(&self, connection_id: &str) -> Result<ConnectionId, LifecycleError> {
        let connection_id =
            ConnectionId::parse(connection_id).ok_or(LifecycleError::InvalidConnection)?;

        info!("Removing connection: {}", connection_id);
        self.store.delete(&connection_id).await?;

        Ok(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryConnectionStore;

    fn handler() -> (Arc<InMemoryConnectionStore>, ConnectionLifecycleHandler) {
        let store = Arc::new(InMemoryConnectionStore::new());
        let handler = ConnectionLifecycleHandler::new(store.clone());
        (store, handler)
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let (store, handler) = handler();

        handler.on_connect("conn-1").await.unwrap();
        let ids: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.connection_id)
            .collect();
        assert_eq!(ids, vec![ConnectionId::parse("conn-1").unwrap()]);

        handler.on_disconnect("conn-1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected_without_mutation() {
        let (store, handler) = handler();

        assert!(matches!(
            handler.on_connect("").await,
            Err(LifecycleError::InvalidConnection)
        ));
        assert!(matches!(
            handler.on_disconnect("  ").await,
            Err(LifecycleError::InvalidConnection)
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (store, handler) = handler();
        handler.on_connect("keep").await.unwrap();

        handler.on_disconnect("never-seen").await.unwrap();
        handler.on_disconnect("never-seen").await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
