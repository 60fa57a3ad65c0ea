//! Connection registry storage.
//!
//! The registry is the single source of truth for which connections are
//! live. Every operation goes to the backing store; nothing is cached in
//! between calls.

use crate::error::StoreError;
use crate::types::{storage_key, ConnectionId, ConnectionRecord, RecordCategory};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

#[async_trait::async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Upsert keyed by `(category, connection_id)`. Overwrites silently.
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError>;

    /// Remove the connection if present. Missing ids are not an error.
    async fn delete(&self, connection_id: &ConnectionId) -> Result<(), StoreError>;

    /// Point-in-time snapshot of every connection record, in no particular order.
    async fn list_all(&self) -> Result<Vec<ConnectionRecord>, StoreError>;
}

pub struct InMemoryConnectionStore {
    records: RwLock<HashMap<(RecordCategory, ConnectionId), ConnectionRecord>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for InMemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        let key = (record.category, record.connection_id.clone());
        self.records.write().insert(key, record);
        Ok(())
    }

    async fn delete(&self, connection_id: &ConnectionId) -> Result<(), StoreError> {
        self.records
            .write()
            .remove(&(RecordCategory::Connection, connection_id.clone()));
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConnectionRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.category == RecordCategory::Connection)
            .cloned()
            .collect())
    }
}

/// Registry persisted in a sled tree.
///
/// Keys are `CONNECTION#<id>`, values are bincode-encoded records. Other
/// record categories may share the tree; `list_all` only scans the
/// connection prefix.
pub struct SledConnectionStore {
    db: sled::Db,
    flush_on_write: bool,
}

impl SledConnectionStore {
    pub fn open(path: &str, cache_capacity: u64) -> Result<Self, StoreError> {
        let db = crate::app_utils::open_sled_database(path, cache_capacity).map_err(|source| {
            StoreError::Open {
                name: "connections".to_string(),
                source,
            }
        })?;
        Ok(Self::from_db(db))
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            flush_on_write: false,
        }
    }

    /// Flush to disk after every put/delete instead of relying on sled's
    /// background flusher.
    pub fn with_flush_on_write(mut self, flush_on_write: bool) -> Self {
        self.flush_on_write = flush_on_write;
        self
    }

    pub fn len(&self) -> usize {
        self.db
            .scan_prefix(RecordCategory::Connection.key_prefix())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn maybe_flush(&self) -> Result<(), StoreError> {
        if self.flush_on_write {
            self.db.flush_async().await?;
        }
        Ok(())
    }

    /// Decode one scanned entry. A value that no longer decodes still names
    /// its connection through the key, so it stays visible and deletable.
    fn decode_entry(prefix: &str, key: &[u8], value: &[u8]) -> Option<ConnectionRecord> {
        match bincode::deserialize::<ConnectionRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                let raw_id = std::str::from_utf8(key).ok()?.strip_prefix(prefix)?;
                let connection_id = ConnectionId::parse(raw_id)?;
                warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Undecodable connection record, rebuilding from key"
                );
                Some(ConnectionRecord {
                    category: RecordCategory::Connection,
                    connection_id,
                    connected_at: 0,
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl ConnectionStore for SledConnectionStore {
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        let value =
            bincode::serialize(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.db.insert(record.storage_key(), value)?;
        self.maybe_flush().await?;
        debug!(connection_id = %record.connection_id, "Stored connection record");
        Ok(())
    }

    async fn delete(&self, connection_id: &ConnectionId) -> Result<(), StoreError> {
        let removed = self
            .db
            .remove(storage_key(RecordCategory::Connection, connection_id))?;
        if removed.is_some() {
            self.maybe_flush().await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConnectionRecord>, StoreError> {
        let prefix = RecordCategory::Connection.key_prefix();
        let mut records = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            if let Some(record) = Self::decode_entry(&prefix, &key, &value) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::parse(raw).unwrap()
    }

    fn sorted_ids(records: Vec<ConnectionRecord>) -> Vec<String> {
        let mut ids: Vec<String> = records
            .into_iter()
            .map(|r| r.connection_id.to_string())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_in_memory_put_is_upsert() {
        let store = InMemoryConnectionStore::new();
        store.put(ConnectionRecord::new(id("a"))).await.unwrap();
        store.put(ConnectionRecord::new(id("a"))).await.unwrap();
        store.put(ConnectionRecord::new(id("b"))).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(sorted_ids(store.list_all().await.unwrap()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_in_memory_delete_missing_is_ok() {
        let store = InMemoryConnectionStore::new();
        store.delete(&id("ghost")).await.unwrap();
        store.put(ConnectionRecord::new(id("a"))).await.unwrap();
        store.delete(&id("a")).await.unwrap();
        store.delete(&id("a")).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry");
        let path = path.to_str().unwrap();

        {
            let store = SledConnectionStore::open(path, 1024 * 1024).unwrap();
            store.put(ConnectionRecord::new(id("a"))).await.unwrap();
            store.put(ConnectionRecord::new(id("b"))).await.unwrap();
            store.delete(&id("a")).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = SledConnectionStore::open(path, 1024 * 1024).unwrap();
        assert_eq!(sorted_ids(store.list_all().await.unwrap()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_sled_scan_ignores_other_categories() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.insert(b"SESSION#a", b"unrelated".to_vec()).unwrap();
        let store = SledConnectionStore::from_db(db);
        store.put(ConnectionRecord::new(id("a"))).await.unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, RecordCategory::Connection);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sled_rebuilds_corrupt_record_from_key() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.insert(b"CONNECTION#stale", vec![0xff]).unwrap();
        let store = SledConnectionStore::from_db(db);

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].connection_id, id("stale"));

        store.delete(&id("stale")).await.unwrap();
        assert!(store.is_empty());
    }
}
