use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure talking to the connection registry's backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open {name} database: {source}")]
    Open {
        name: String,
        #[source]
        source: sled::Error,
    },

    #[error("Database operation failed: {0}")]
    Backend(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the connect/disconnect handlers.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Connection id missing")]
    InvalidConnection,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that fail a broadcast as a whole. Per-connection delivery
/// failures never show up here.
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Failed to enumerate connections: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}
