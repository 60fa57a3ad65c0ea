use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record kinds sharing the registry store. Only connections exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordCategory {
    #[serde(rename = "CONNECTION")]
    Connection,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::Connection => "CONNECTION",
        }
    }

    /// Key prefix used by stores that flatten `(category, id)` into one key.
    pub fn key_prefix(&self) -> String {
        format!("{}#", self.as_str())
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of one live duplex connection, issued by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Returns `None` for empty or whitespace-only identifiers.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    /// Random 128-bit identifier. Collisions are not a practical concern,
    /// so a deleted id is never handed out again for a new connection.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One live connection as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub category: RecordCategory,
    pub connection_id: ConnectionId,
    /// Unix seconds when the record was written
    pub connected_at: i64,
}

impl ConnectionRecord {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            category: RecordCategory::Connection,
            connection_id,
            connected_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Storage key: `CONNECTION#<id>`
    pub fn storage_key(&self) -> Vec<u8> {
        storage_key(self.category, &self.connection_id)
    }
}

pub fn storage_key(category: RecordCategory, connection_id: &ConnectionId) -> Vec<u8> {
    format!("{}{}", category.key_prefix(), connection_id).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_blank_ids() {
        assert!(ConnectionId::parse("").is_none());
        assert!(ConnectionId::parse("   ").is_none());
        assert_eq!(ConnectionId::parse("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_generated_ids_are_distinct_hex() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(hex::decode(a.as_str()).is_ok());
    }

    #[test]
    fn test_storage_key_layout() {
        let record = ConnectionRecord::new(ConnectionId::parse("Zx9=").unwrap());
        assert_eq!(record.storage_key(), b"CONNECTION#Zx9=".to_vec());
    }
}
