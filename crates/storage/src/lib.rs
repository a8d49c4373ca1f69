//! Porchain storage layer.
//!
//! This crate provides the key-value persistence the consensus engine
//! builds on:
//!
//! - [`KvStore`]: the narrow get/put/delete interface consumed by the
//!   engine for snapshot checkpoints and consensus markers
//! - [`Database`]: a RocksDB wrapper with column families
//! - [`MemoryStore`]: a HashMap-backed store for tests

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod db;

pub use db::{Database, DatabaseConfig};

use parking_lot::RwLock;
use std::collections::HashMap;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying database error
    #[error("database error: {0}")]
    Database(String),

    /// Requested column family does not exist
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Stored value could not be decoded
    #[error("corrupt value under key 0x{0}")]
    Corrupt(String),
}

/// The key-value interface the consensus engine persists through.
///
/// Keys are opaque byte strings with stable prefixes chosen by the
/// caller; the store imposes no structure on them.
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes the value stored under `key`, if any.
    fn delete(&self, key: &[u8]) -> Result<()>;
}

/// An in-memory [`KvStore`] for tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Checks whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(b"k").unwrap().is_none());

        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));

        store.put(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap().as_deref(), Some(&b"v2"[..]));

        store.delete(b"k").unwrap();
        assert!(store.get(b"k").unwrap().is_none());
    }
}
