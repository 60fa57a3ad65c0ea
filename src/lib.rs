//! Connection registry with fan-out broadcast.
//!
//! Connections are tracked in a [`storage::ConnectionStore`]; a
//! [`broadcaster::Broadcaster`] delivers one payload to every registered
//! connection and prunes the ones whose peer is gone.

pub mod app_utils;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod network;
pub mod rpc;
pub mod shutdown;
pub mod storage;
pub mod transport;
pub mod types;

pub use broadcaster::{BroadcastPayload, BroadcastReport, Broadcaster};
pub use error::{BroadcastError, LifecycleError, StoreError};
pub use handlers::{EventHandlers, Verdict};
pub use lifecycle::ConnectionLifecycleHandler;
pub use storage::{ConnectionStore, InMemoryConnectionStore, SledConnectionStore};
pub use transport::{DeliveryOutcome, DeliveryTransport};
pub use types::{ConnectionId, ConnectionRecord, RecordCategory};
