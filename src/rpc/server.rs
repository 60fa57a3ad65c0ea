//! Minimal HTTP trigger surface over raw TCP.
//!
//! - `GET /broadcast` sends a heartbeat broadcast and answers `Success` or
//!   `Denied` as text/plain.
//! - `POST` with a JSON-RPC 2.0 body dispatches to [`RpcHandler`].

use super::handler::{RpcHandler, PARSE_ERROR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: String, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: String, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub async fn bind(addr: &str, handler: Arc<RpcHandler>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!("RPC server listening on {}", addr);
        }

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, handler).await {
                                    tracing::debug!("RPC error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("RPC accept error: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    handler: Arc<RpcHandler>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request = read_request(&mut socket).await?;
    if request.is_empty() {
        return Ok(());
    }

    let http_request = String::from_utf8_lossy(&request);
    let request_line = http_request.lines().next().unwrap_or("");

    if is_broadcast_trigger(request_line) {
        let verdict = match handler.handlers().on_broadcast_request(None).await {
            Ok(_) => "Success",
            Err(e) => {
                tracing::warn!("Broadcast trigger failed: {}", e);
                "Denied"
            }
        };
        let status = if verdict == "Success" {
            "200 OK"
        } else {
            "500 Internal Server Error"
        };
        write_response(&mut socket, status, "text/plain", verdict).await?;
        return Ok(());
    }

    let body = split_body(&http_request);
    let response = if body.is_empty() {
        RpcResponse::failure(
            "unknown".to_string(),
            RpcError {
                code: PARSE_ERROR,
                message: "No request body".to_string(),
            },
        )
    } else {
        match serde_json::from_str::<RpcRequest>(body) {
            Ok(request) => handler.handle_request(request).await,
            Err(e) => RpcResponse::failure(
                "unknown".to_string(),
                RpcError {
                    code: PARSE_ERROR,
                    message: format!("Parse error: {}", e),
                },
            ),
        }
    };

    let response_json = serde_json::to_string(&response)?;
    write_response(&mut socket, "200 OK", "application/json", &response_json).await?;
    Ok(())
}

/// Read headers, then as much body as `Content-Length` announces.
async fn read_request(socket: &mut TcpStream) -> Result<Vec<u8>, std::io::Error> {
    let mut buffer = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);

        if let Some(header_end) = find_header_end(&buffer) {
            let headers = String::from_utf8_lossy(&buffer[..header_end]);
            let expected = header_end + content_length(&headers);
            if buffer.len() >= expected {
                break;
            }
        }

        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }
    }

    Ok(buffer)
}

/// `GET /broadcast`, optionally with a query string.
fn is_broadcast_trigger(request_line: &str) -> bool {
    let mut parts = request_line.split_whitespace();
    let method = parts.next();
    let path = parts
        .next()
        .map(|target| target.split('?').next().unwrap_or(target));
    method == Some("GET") && path == Some("/broadcast")
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn split_body(http_request: &str) -> &str {
    let body = if let Some(body_start) = http_request.find("\r\n\r\n") {
        &http_request[body_start + 4..]
    } else if let Some(body_start) = http_request.find("\n\n") {
        &http_request[body_start + 2..]
    } else {
        ""
    };
    body.trim_end_matches('\0').trim()
}

async fn write_response(
    socket: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), std::io::Error> {
    let http_response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        content_type,
        body.len(),
        body
    );

    socket.write_all(http_response.as_bytes()).await?;
    socket.flush().await
}
