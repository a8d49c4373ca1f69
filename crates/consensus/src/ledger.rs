//! The signed-blocks ledger guarding against self-equivocation.
//!
//! Before the local signer authorizes a prepare or commit it records the
//! (height, hash) pair here. A second, different hash at the same height
//! is refused: signing it would be equivocation, which costs the node
//! its reputation. The read-then-write is performed under one exclusive
//! lock so two racing sign attempts cannot both pass the check.
//!
//! Entries are persisted under `signed/<height>` so the guard survives a
//! restart within the unfinalized tail, and may be truncated below the
//! last finalized checkpoint.

use parking_lot::Mutex;
use porchain_storage::{KvStore, StorageError};
use porchain_types::H256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Key prefix for persisted signed-block markers.
pub const SIGNED_KEY_PREFIX: &[u8] = b"signed/";

/// Errors from the signed-blocks ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A different block was already signed at this height. Fatal: an
    /// honest node must never produce the second signature.
    #[error("already signed {existing} at height {height}, refusing {attempted}")]
    Equivocation {
        /// The conflicting height
        height: u64,
        /// Hash recorded first
        existing: H256,
        /// Hash whose signing was refused
        attempted: H256,
    },

    /// The backing store failed
    #[error("store: {0}")]
    Store(#[from] StorageError),
}

/// Append-only map from height to the hash the local signer authorized.
pub struct SignedBlocksLedger {
    store: Arc<dyn KvStore>,
    entries: Mutex<HashMap<u64, H256>>,
}

impl SignedBlocksLedger {
    /// Creates a ledger over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records that the local signer is about to sign `hash` at
    /// `height`.
    ///
    /// Idempotent for the same hash; a different hash at a recorded
    /// height is refused with [`LedgerError::Equivocation`].
    pub fn record(&self, height: u64, hash: H256) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();

        let existing = match entries.get(&height) {
            Some(existing) => Some(*existing),
            None => self.load(height)?,
        };

        if let Some(existing) = existing {
            if existing != hash {
                error!(height, %existing, attempted = %hash,
                    "equivocation guard triggered, refusing to sign");
                return Err(LedgerError::Equivocation {
                    height,
                    existing,
                    attempted: hash,
                });
            }
            entries.insert(height, existing);
            return Ok(());
        }

        self.store.put(&signed_key(height), hash.as_bytes())?;
        entries.insert(height, hash);
        Ok(())
    }

    /// The hash signed at `height`, if any.
    pub fn signed_at(&self, height: u64) -> Option<H256> {
        if let Some(hash) = self.entries.lock().get(&height) {
            return Some(*hash);
        }
        self.load(height).ok().flatten()
    }

    /// Whether anything was signed at `height`.
    pub fn if_signed(&self, height: u64) -> bool {
        self.signed_at(height).is_some()
    }

    /// Drops in-memory entries below `height`; the persisted markers for
    /// finalized history are removed as well.
    pub fn prune_below(&self, height: u64) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();
        let stale: Vec<u64> = entries.keys().copied().filter(|h| *h < height).collect();
        for h in stale {
            entries.remove(&h);
            self.store.delete(&signed_key(h))?;
        }
        Ok(())
    }

    fn load(&self, height: u64) -> Result<Option<H256>, LedgerError> {
        let Some(raw) = self.store.get(&signed_key(height))? else {
            return Ok(None);
        };
        Ok(H256::from_slice(&raw).ok())
    }
}

fn signed_key(height: u64) -> Vec<u8> {
    let mut key = SIGNED_KEY_PREFIX.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use porchain_storage::MemoryStore;

    fn ledger() -> SignedBlocksLedger {
        SignedBlocksLedger::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn record_is_idempotent_for_same_hash() {
        let ledger = ledger();
        let hash = H256::keccak256(b"block");

        ledger.record(7, hash).unwrap();
        ledger.record(7, hash).unwrap();
        assert_eq!(ledger.signed_at(7), Some(hash));
    }

    #[test]
    fn conflicting_hash_is_refused() {
        let ledger = ledger();
        ledger.record(7, H256::keccak256(b"a")).unwrap();

        let err = ledger.record(7, H256::keccak256(b"b")).unwrap_err();
        assert!(matches!(err, LedgerError::Equivocation { height: 7, .. }));

        // The original entry survives.
        assert_eq!(ledger.signed_at(7), Some(H256::keccak256(b"a")));
    }

    #[test]
    fn at_most_one_entry_per_height() {
        let ledger = ledger();
        for height in 1..=5 {
            ledger.record(height, H256::keccak256(&height.to_be_bytes())).unwrap();
        }
        for height in 1..=5 {
            let _ = ledger.record(height, H256::keccak256(b"other"));
            assert_eq!(
                ledger.signed_at(height),
                Some(H256::keccak256(&height.to_be_bytes()))
            );
        }
    }

    #[test]
    fn guard_survives_restart_via_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let ledger = SignedBlocksLedger::new(Arc::clone(&store) as Arc<dyn KvStore>);
            ledger.record(3, H256::keccak256(b"a")).unwrap();
        }
        let ledger = SignedBlocksLedger::new(store);
        assert!(ledger.if_signed(3));
        assert!(ledger.record(3, H256::keccak256(b"b")).is_err());
    }

    #[test]
    fn prune_truncates_history() {
        let ledger = ledger();
        for height in 1..=5 {
            ledger.record(height, H256::keccak256(&height.to_be_bytes())).unwrap();
        }
        ledger.prune_below(4).unwrap();
        assert!(!ledger.if_signed(3));
        assert!(ledger.if_signed(4));
    }
}
