use super::server::{RpcError, RpcRequest, RpcResponse};
use crate::error::BroadcastError;
use crate::handlers::EventHandlers;
use crate::storage::ConnectionStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const STORE_ERROR: i32 = -32000;

pub struct RpcHandler {
    handlers: Arc<EventHandlers>,
    store: Arc<dyn ConnectionStore>,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(handlers: Arc<EventHandlers>, store: Arc<dyn ConnectionStore>) -> Self {
        Self {
            handlers,
            store,
            start_time: Instant::now(),
        }
    }

    pub fn handlers(&self) -> &Arc<EventHandlers> {
        &self.handlers
    }

    pub async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        let params_array = match &request.params {
            Value::Array(arr) => arr.clone(),
            Value::Null => vec![],
            other => vec![other.clone()],
        };

        let result = match request.method.as_str() {
            "broadcast" => self.broadcast(&params_array).await,
            "listconnections" => self.list_connections().await,
            "getconnectioncount" => self.get_connection_count().await,
            "uptime" => Ok(json!(self.start_time.elapsed().as_secs())),
            _ => Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", request.method),
            }),
        };

        match result {
            Ok(value) => RpcResponse::success(request.id, value),
            Err(error) => RpcResponse::failure(request.id, error),
        }
    }

    /// `broadcast [payload]`. Without a payload a heartbeat is sent.
    async fn broadcast(&self, params: &[Value]) -> Result<Value, RpcError> {
        if params.len() > 1 {
            return Err(RpcError {
                code: INVALID_PARAMS,
                message: "Usage: broadcast [payload]".to_string(),
            });
        }

        let report = self
            .handlers
            .on_broadcast_request(params.first().cloned())
            .await
            .map_err(|e| match e {
                BroadcastError::Store(e) => RpcError {
                    code: STORE_ERROR,
                    message: e.to_string(),
                },
                BroadcastError::Payload(e) => RpcError {
                    code: INVALID_PARAMS,
                    message: e.to_string(),
                },
            })?;

        serde_json::to_value(report).map_err(|e| RpcError {
            code: PARSE_ERROR,
            message: e.to_string(),
        })
    }

    async fn list_connections(&self) -> Result<Value, RpcError> {
        let mut records = self.store.list_all().await.map_err(store_error)?;
        records.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

        let connections: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "connection_id": r.connection_id,
                    "category": r.category.as_str(),
                    "connected_at": r.connected_at,
                })
            })
            .collect();

        Ok(json!({
            "count": connections.len(),
            "connections": connections,
        }))
    }

    async fn get_connection_count(&self) -> Result<Value, RpcError> {
        let records = self.store.list_all().await.map_err(store_error)?;
        Ok(json!(records.len()))
    }
}

fn store_error(e: crate::error::StoreError) -> RpcError {
    RpcError {
        code: STORE_ERROR,
        message: e.to_string(),
    }
}
