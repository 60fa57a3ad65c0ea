//! End-to-end relay through the WebSocket front end.

use fanoutd::network::session_table::SessionTable;
use fanoutd::network::ws_server::WsServer;
use async_trait::async_trait;
use fanoutd::{
    Broadcaster, ConnectionId, ConnectionLifecycleHandler, ConnectionRecord, ConnectionStore,
    EventHandlers, InMemoryConnectionStore, StoreError,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Registry whose backing store rejects every call.
struct FailingStore;

#[async_trait]
impl ConnectionStore for FailingStore {
    async fn put(&self, _record: ConnectionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("throttled".to_string()))
    }

    async fn delete(&self, _connection_id: &ConnectionId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("throttled".to_string()))
    }

    async fn list_all(&self) -> Result<Vec<ConnectionRecord>, StoreError> {
        Err(StoreError::Unavailable("throttled".to_string()))
    }
}

async fn wait_for_count(store: &InMemoryConnectionStore, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {} entries (has {})",
            expected,
            store.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {:?}", other),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a text frame")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_messages_relay_and_registry_tracks_sessions() {
    let store = Arc::new(InMemoryConnectionStore::new());
    let sessions = Arc::new(SessionTable::new(16));
    let broadcaster = Arc::new(
        Broadcaster::new(store.clone(), sessions.clone())
            .with_deadline(Some(Duration::from_secs(2))),
    );
    let handlers = Arc::new(EventHandlers::new(
        ConnectionLifecycleHandler::new(store.clone()),
        broadcaster,
    ));

    let server = WsServer::bind(
        "127.0.0.1:0",
        handlers.clone(),
        sessions.clone(),
        Duration::from_secs(30),
    )
    .await
    .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    let (mut alice, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
    wait_for_count(&store, 2).await;

    alice
        .send(Message::Text(r#"{ "msg": "hi" }"#.to_string().into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut alice).await, r#"{"msg":"hi"}"#);
    assert_eq!(next_text(&mut bob).await, r#"{"msg":"hi"}"#);

    // Invalid JSON is denied and relayed to nobody
    alice
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();

    bob.close(None).await.unwrap();
    wait_for_count(&store, 1).await;

    // A record with no live session is pruned by the next broadcast
    store
        .put(ConnectionRecord::new(ConnectionId::parse("ghost").unwrap()))
        .await
        .unwrap();
    let report = handlers.on_broadcast_request(None).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.removed, vec![ConnectionId::parse("ghost").unwrap()]);
    assert_eq!(store.len(), 1);

    let heartbeat: serde_json::Value = serde_json::from_str(&next_text(&mut alice).await).unwrap();
    assert!(heartbeat.get("now").is_some());

    // Shutdown waits for open sessions to deregister
    shutdown.cancel();
    server_task.await.unwrap();
    assert!(store.is_empty());
    assert!(sessions.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_registration_never_upgrades() {
    let store: Arc<dyn ConnectionStore> = Arc::new(FailingStore);
    let sessions = Arc::new(SessionTable::new(16));
    let handlers = Arc::new(EventHandlers::new(
        ConnectionLifecycleHandler::new(store.clone()),
        Arc::new(Broadcaster::new(store, sessions.clone())),
    ));

    let server = WsServer::bind(
        "127.0.0.1:0",
        handlers,
        sessions.clone(),
        Duration::from_secs(30),
    )
    .await
    .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    let attempt = tokio::time::timeout(
        Duration::from_secs(5),
        tokio_tungstenite::connect_async(url),
    )
    .await
    .expect("server never answered the handshake");

    assert!(attempt.is_err());
    assert!(sessions.is_empty());

    shutdown.cancel();
    server_task.await.unwrap();
}
