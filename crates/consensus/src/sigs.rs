//! Signature collection for quorum tracking.
//!
//! Two caches exist side by side: one for prepare signatures and one for
//! commit signatures, each keyed by block hash and mapping validator
//! address to signature. Sets are maps, not multisets: a duplicate
//! signature from the same validator is discarded without error.

use lru::LruCache;
use parking_lot::Mutex;
use porchain_crypto::Signature;
use porchain_types::{Address, H256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Number of recent blocks whose signatures are kept in memory.
pub const INMEMORY_SIGNATURES: usize = 100;

/// The signatures collected for one block hash, ordered by validator
/// address ascending.
#[derive(Debug, Clone, Default)]
pub struct SignatureSet {
    sigs: BTreeMap<Address, Signature>,
}

impl SignatureSet {
    /// Inserts a signature; returns `false` if the validator had already
    /// signed (the first signature is kept).
    pub fn insert(&mut self, signer: Address, sig: Signature) -> bool {
        if self.sigs.contains_key(&signer) {
            return false;
        }
        self.sigs.insert(signer, sig);
        true
    }

    /// Number of distinct signers.
    pub fn count(&self) -> usize {
        self.sigs.len()
    }

    /// The signature from `signer`, if present.
    pub fn get(&self, signer: &Address) -> Option<&Signature> {
        self.sigs.get(signer)
    }

    /// Whether `signer` has signed.
    pub fn contains(&self, signer: &Address) -> bool {
        self.sigs.contains_key(signer)
    }

    /// Iterates signatures in ascending signer-address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Signature)> {
        self.sigs.iter()
    }
}

/// A bounded cache of per-hash signature sets.
///
/// Reads are frequent (every message checks quorum), writes happen once
/// per signature, so the whole cache sits behind one short-held lock.
pub struct SignatureCache {
    inner: Mutex<LruCache<H256, SignatureSet>>,
}

impl SignatureCache {
    /// Creates a cache bounded at [`INMEMORY_SIGNATURES`] block hashes.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(INMEMORY_SIGNATURES).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Adds a signature for `hash`, returning the distinct-signer count
    /// afterwards. Duplicates leave the set unchanged.
    pub fn add(&self, hash: H256, signer: Address, sig: Signature) -> usize {
        let mut cache = self.inner.lock();
        let set = cache.get_or_insert_mut(hash, SignatureSet::default);
        set.insert(signer, sig);
        set.count()
    }

    /// Distinct-signer count for `hash`.
    pub fn count(&self, hash: &H256) -> usize {
        self.inner
            .lock()
            .get(hash)
            .map(SignatureSet::count)
            .unwrap_or(0)
    }

    /// Whether `signer` already signed `hash`.
    pub fn contains(&self, hash: &H256, signer: &Address) -> bool {
        self.inner
            .lock()
            .get(hash)
            .map(|set| set.contains(signer))
            .unwrap_or(false)
    }

    /// A copy of the signature set for `hash`.
    pub fn set_of(&self, hash: &H256) -> Option<SignatureSet> {
        self.inner.lock().get(hash).cloned()
    }

    /// Drops the signatures for `hash` once it is finalized or
    /// superseded.
    pub fn remove(&self, hash: &H256) -> Option<SignatureSet> {
        self.inner.lock().pop(hash)
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porchain_crypto::PrivateKey;

    fn sig(seed: u8) -> Signature {
        let key = PrivateKey::random();
        key.sign_prehash(&[seed; 32]).unwrap()
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn duplicate_signatures_are_discarded() {
        let cache = SignatureCache::new();
        let hash = H256::keccak256(b"block");

        assert_eq!(cache.add(hash, addr(1), sig(1)), 1);
        assert_eq!(cache.add(hash, addr(1), sig(2)), 1);
        assert_eq!(cache.add(hash, addr(2), sig(3)), 2);
        assert_eq!(cache.count(&hash), 2);
    }

    #[test]
    fn sets_are_per_hash() {
        let cache = SignatureCache::new();
        let a = H256::keccak256(b"a");
        let b = H256::keccak256(b"b");

        cache.add(a, addr(1), sig(1));
        assert_eq!(cache.count(&a), 1);
        assert_eq!(cache.count(&b), 0);
    }

    #[test]
    fn iteration_is_ordered_by_address() {
        let mut set = SignatureSet::default();
        set.insert(addr(3), sig(3));
        set.insert(addr(1), sig(1));
        set.insert(addr(2), sig(2));

        let order: Vec<Address> = set.iter().map(|(a, _)| *a).collect();
        assert_eq!(order, vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn remove_destroys_the_set() {
        let cache = SignatureCache::new();
        let hash = H256::keccak256(b"block");
        cache.add(hash, addr(1), sig(1));

        assert!(cache.remove(&hash).is_some());
        assert_eq!(cache.count(&hash), 0);
    }
}
