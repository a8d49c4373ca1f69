//! RocksDB wrapper with column families for chain data.

use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, DB,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{KvStore, Result, StorageError};

/// Column family names
pub mod cf {
    /// Blocks column family - headers and bodies of finalized blocks
    pub const BLOCKS: &str = "blocks";
    /// Consensus column family - snapshots, checkpoints and signed markers
    pub const CONSENSUS: &str = "consensus";
    /// Metadata column family - chain head, config fingerprints
    pub const METADATA: &str = "metadata";

    /// All column families
    pub const ALL: &[&str] = &[BLOCKS, CONSENSUS, METADATA];
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory
    pub path: String,
    /// Enable LZ4 compression
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/porchain"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

/// RocksDB wrapper with column families.
///
/// The [`KvStore`] implementation routes flat keys to the consensus
/// column family, which is where the engine keeps its snapshots,
/// checkpoints and signed-block markers.
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    config: DatabaseConfig,
    write_lock: RwLock<()>,
}

impl Database {
    /// Opens or creates a database at the configured path.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!(path = %config.path, "opening database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let path = Path::new(&config.path);
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(Self {
            inner: db,
            config,
            write_lock: RwLock::new(()),
        })
    }

    /// Opens a database with default options at `path`.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::open(config)
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Reads a value from a column family.
    pub fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Writes a value into a column family.
    pub fn put_cf(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let _guard = self.write_lock.write();
        self.inner
            .put_cf(&cf, key, value)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Deletes a value from a column family.
    pub fn delete_cf(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let _guard = self.write_lock.write();
        self.inner
            .delete_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Flushes all column families to disk.
    pub fn flush_all(&self) -> Result<()> {
        for cf_name in cf::ALL {
            let cf = self.cf_handle(cf_name)?;
            self.inner
                .flush_cf(&cf)
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        Ok(())
    }

    /// The path the database was opened at.
    pub fn path(&self) -> &str {
        &self.config.path
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!(path = %self.config.path, "closing database");
    }
}

impl KvStore for Database {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_cf(cf::CONSENSUS, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_cf(cf::CONSENSUS, key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_cf(cf::CONSENSUS, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_default(dir.path()).unwrap();

        assert!(db.get(b"snap/ab").unwrap().is_none());
        db.put(b"snap/ab", b"payload").unwrap();
        assert_eq!(db.get(b"snap/ab").unwrap().as_deref(), Some(&b"payload"[..]));

        db.delete(b"snap/ab").unwrap();
        assert!(db.get(b"snap/ab").unwrap().is_none());
    }

    #[test]
    fn column_families_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_default(dir.path()).unwrap();

        db.put_cf(cf::BLOCKS, b"k", b"block").unwrap();
        db.put_cf(cf::CONSENSUS, b"k", b"consensus").unwrap();

        assert_eq!(db.get_cf(cf::BLOCKS, b"k").unwrap().as_deref(), Some(&b"block"[..]));
        assert_eq!(
            db.get_cf(cf::CONSENSUS, b"k").unwrap().as_deref(),
            Some(&b"consensus"[..])
        );
        assert!(db.get_cf(cf::METADATA, b"k").unwrap().is_none());
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open_default(dir.path()).unwrap();
            db.put(b"chkpt/3", b"snapshot").unwrap();
            db.flush_all().unwrap();
        }
        let db = Database::open_default(dir.path()).unwrap();
        assert_eq!(db.get(b"chkpt/3").unwrap().as_deref(), Some(&b"snapshot"[..]));
    }
}
