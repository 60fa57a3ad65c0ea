//! WebSocket front end.
//!
//! Every accepted TCP stream gets a fresh connection id. The id is registered
//! (outbound queue plus registry record) before the WebSocket upgrade
//! completes, so a refused registration never becomes an open connection.
//!
//! Protocol:
//!   Client → Server: any JSON text frame, relayed to every connection
//!   Server → Client: broadcast payloads as text frames
//!   Server → Client: ping every `heartbeat_interval`

use crate::handlers::EventHandlers;
use crate::network::session_table::SessionTable;
use crate::types::ConnectionId;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub struct WsServer {
    listener: TcpListener,
    handlers: Arc<EventHandlers>,
    sessions: Arc<SessionTable>,
    heartbeat_interval: Duration,
}

impl WsServer {
    pub async fn bind(
        addr: &str,
        handlers: Arc<EventHandlers>,
        sessions: Arc<SessionTable>,
        heartbeat_interval: Duration,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handlers,
            sessions,
            heartbeat_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled, then wait for every
    /// session to close and deregister.
    pub async fn run(self, shutdown: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("WebSocket server listening on {}", addr),
            Err(e) => tracing::warn!("WebSocket server listening (address unknown: {})", e),
        }

        let mut session_tasks = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("WebSocket connection from {}", addr);
                            let handlers = self.handlers.clone();
                            let sessions = self.sessions.clone();
                            let conn_shutdown = shutdown.clone();
                            let heartbeat = self.heartbeat_interval;
                            session_tasks.spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers, sessions, heartbeat, conn_shutdown).await {
                                    tracing::debug!("WebSocket connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("WebSocket accept error: {}", e);
                        }
                    }
                }
                Some(joined) = session_tasks.join_next(), if !session_tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("WebSocket session task failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("WebSocket server shutting down");
                    break;
                }
            }
        }

        if !self.sessions.is_empty() {
            tracing::info!("Closing {} WebSocket sessions", self.sessions.len());
        }
        while let Some(joined) = session_tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("WebSocket session task failed: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    handlers: Arc<EventHandlers>,
    sessions: Arc<SessionTable>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let connection_id = ConnectionId::generate();
    let outbound = sessions.open(connection_id.clone());

    if !handlers.on_connect(connection_id.as_str()).await.is_accepted() {
        sessions.close(&connection_id);
        tracing::info!("Refused connection {}", connection_id);
        return Ok(());
    }

    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            sessions.close(&connection_id);
            handlers.on_disconnect(connection_id.as_str()).await;
            return Err(e.into());
        }
    };

    let result = run_session(
        ws_stream,
        &connection_id,
        &handlers,
        outbound,
        heartbeat_interval,
        shutdown,
    )
    .await;

    sessions.close(&connection_id);
    handlers.on_disconnect(connection_id.as_str()).await;

    result
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    connection_id: &ConnectionId,
    handlers: &EventHandlers,
    mut outbound: mpsc::Receiver<Bytes>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    // First tick fires immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let verdict = handlers.on_message(connection_id.as_str(), text.as_str()).await;
                        tracing::debug!("Message from {}: {}", connection_id, verdict.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => {
                                handlers.on_message(connection_id.as_str(), text).await;
                            }
                            Err(_) => tracing::debug!("Ignoring non-UTF-8 frame from {}", connection_id),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket receive error from {}: {}", connection_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            Some(payload) = outbound.recv() => {
                if ws_sender.send(frame(payload)).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            _ = shutdown.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

fn frame(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}
