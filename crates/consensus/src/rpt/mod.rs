//! Reputation (RPT) scoring of committee candidates.
//!
//! The reputation service computes a deterministic score for each
//! candidate at a block height. Three collector generations coexist and
//! the effective one is chosen by height, monotonically:
//!
//! - below `rpt_calc_method2_block`: the legacy collector, a windowed
//!   scan of the aggregate score stored on the reputation contract
//! - below `rpt_calc_method3_block`: collector v2, a weighted sum of the
//!   five sub-metrics (rank, transactions, maintenance, upload, proxy)
//! - at and above `rpt_calc_method3_block`: collector v3, the same
//!   formulas with per-block memoization of contract reads
//!
//! Scores are clamped to a floor of [`MIN_RPT_SCORE`]; a candidate whose
//! contract reads keep failing after retries degrades to that floor
//! rather than poisoning the cache or aborting the election.

mod collector;

pub use collector::RptCollector;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use porchain_types::{Address, H256};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::traits::{BackendError, RptBackend};

/// The minimum reputation score any candidate can hold.
pub const MIN_RPT_SCORE: i64 = 16;

/// Retries per contract read (on top of the initial attempt) before a
/// candidate degrades to the floor.
pub const MAX_RETRY_GET_RPT: usize = 3;

/// Bound on the memoized per-block contract reads.
const RPT_CACHE_SIZE: usize = 1024;

/// A candidate's name/reputation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rpt {
    /// Candidate address
    pub address: Address,
    /// Reputation score, clamped at [`MIN_RPT_SCORE`]
    pub rpt: i64,
}

impl PartialOrd for Rpt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rpt {
    /// Ascending by score; ties break on ascending address value.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rpt
            .cmp(&other.rpt)
            .then_with(|| self.address.cmp(&other.address))
    }
}

/// A list of candidate scores with a total, deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RptList(pub Vec<Rpt>);

impl RptList {
    /// Sorts ascending by score, ties ascending by address.
    pub fn sort(&mut self) {
        self.0.sort();
    }

    /// The `n` highest-scored candidates; among equal scores the smaller
    /// address wins a seat first.
    pub fn top(&self, n: usize) -> Vec<Address> {
        let mut ranked = self.0.clone();
        ranked.sort_by(|a, b| {
            b.rpt
                .cmp(&a.rpt)
                .then_with(|| a.address.cmp(&b.address))
        });
        ranked.into_iter().take(n).map(|r| r.address).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RptList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .0
            .iter()
            .map(|r| format!("[{:#x}, {}]", r.address, r.rpt))
            .collect();
        write!(f, "{}", items.join(","))
    }
}

impl FromIterator<Rpt> for RptList {
    fn from_iter<I: IntoIterator<Item = Rpt>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The (address, block number) pair keying memoized contract reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RptItem {
    /// Candidate address
    pub address: Address,
    /// Block number of the read
    pub number: u64,
}

impl RptItem {
    /// The cache key: Keccak256 of the canonical length-prefixed
    /// encoding of `[address, number]`.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.address);
        stream.append(&self.number);
        H256::keccak256(&stream.out())
    }
}

/// The sliding window `[max(0, n − window + 1), n]` as an inclusive range.
pub(crate) fn window_range(number: u64, window: u64) -> std::ops::RangeInclusive<u64> {
    let start = number.saturating_sub(window.saturating_sub(1));
    start..=number
}

/// Reads through a retriable backend call: one initial attempt plus
/// [`MAX_RETRY_GET_RPT`] retries before giving up.
pub(crate) fn read_with_retry<T>(
    what: &str,
    mut read: impl FnMut() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let mut last = None;
    for attempt in 0..=MAX_RETRY_GET_RPT {
        match read() {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(what, attempt, error = %err, "reputation read failed");
                last = Some(err);
            }
        }
    }
    Err(last.unwrap_or_else(|| BackendError::new("reputation read failed")))
}

/// The reputation service: versioned collectors plus the legacy windowed
/// scan, sharing one bounded read cache.
pub struct RptService {
    backend: Arc<dyn RptBackend>,
    cache: Mutex<LruCache<H256, i64>>,
    window: RwLock<Option<u64>>,
    collector_v2: RptCollector,
    collector_v3: RptCollector,
    method2_block: u64,
    method3_block: u64,
}

impl RptService {
    /// Creates a service over a reputation backend with the given fork
    /// heights for the v2 and v3 collectors.
    pub fn new(backend: Arc<dyn RptBackend>, method2_block: u64, method3_block: u64) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(RPT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
            window: RwLock::new(None),
            collector_v2: RptCollector::v2(Arc::clone(&backend)),
            collector_v3: RptCollector::v3(Arc::clone(&backend)),
            method2_block,
            method3_block,
            backend,
        }
    }

    /// The contract-configured window size, cached for the lifetime of
    /// this service instance until [`refresh_window`](Self::refresh_window)
    /// is called.
    pub fn window_size(&self) -> Result<u64, BackendError> {
        if let Some(window) = *self.window.read() {
            return Ok(window);
        }
        let window = self.backend.window()?;
        *self.window.write() = Some(window);
        Ok(window)
    }

    /// Drops the cached window size so the next read hits the contract.
    pub fn refresh_window(&self) {
        *self.window.write() = None;
    }

    /// Scores every address, preserving input order.
    pub fn rpt_list(&self, addrs: &[Address], number: u64) -> RptList {
        addrs
            .iter()
            .map(|addr| self.rpt_of(*addr, addrs, number))
            .collect()
    }

    /// Scores one candidate, dispatching to the collector generation in
    /// effect at `number`.
    pub fn rpt_of(&self, addr: Address, addrs: &[Address], number: u64) -> Rpt {
        if number < self.method2_block {
            return self.legacy_rpt_of(addr, number);
        }
        if number < self.method3_block {
            return self.collector_v2.rpt_of(addr, addrs, number);
        }
        self.collector_v3.rpt_of(addr, addrs, number)
    }

    /// The legacy collector: per-block aggregate reads over the window,
    /// memoized under `keccak256(rlp([addr, number]))`.
    fn legacy_rpt_of(&self, addr: Address, number: u64) -> Rpt {
        let window = match self.window_size() {
            Ok(window) => window,
            Err(err) => {
                error!(%addr, number, error = %err, "window size unavailable, degrading candidate");
                return Rpt {
                    address: addr,
                    rpt: MIN_RPT_SCORE,
                };
            }
        };

        let mut total = 0i64;
        for block in window_range(number, window) {
            let key = RptItem {
                address: addr,
                number: block,
            }
            .hash();

            if let Some(cached) = self.cache.lock().get(&key).copied() {
                total += cached;
                continue;
            }

            match read_with_retry("get_rpt", || self.backend.get_rpt(addr, block)) {
                Ok(value) => {
                    self.cache.lock().put(key, value);
                    total += value;
                }
                Err(err) => {
                    error!(%addr, number, block, error = %err,
                        "reputation reads exhausted, degrading candidate");
                    return Rpt {
                        address: addr,
                        rpt: MIN_RPT_SCORE,
                    };
                }
            }
        }

        debug!(%addr, number, score = total.max(MIN_RPT_SCORE), "legacy reputation computed");
        Rpt {
            address: addr,
            rpt: total.max(MIN_RPT_SCORE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticBackend {
        window: u64,
        score: i64,
        reads: AtomicUsize,
    }

    impl StaticBackend {
        fn new(window: u64, score: i64) -> Self {
            Self {
                window,
                score,
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl RptBackend for StaticBackend {
        fn get_rpt(&self, _addr: Address, _number: u64) -> Result<i64, BackendError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
        fn window(&self) -> Result<u64, BackendError> {
            Ok(self.window)
        }
        fn balance_of(&self, _addr: Address, _number: u64) -> Result<u128, BackendError> {
            Ok(100)
        }
        fn tx_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Ok(1)
        }
        fn uptime_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Ok(100)
        }
        fn upload_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Ok(0)
        }
        fn proxy_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Ok(0)
        }
    }

    struct FailingBackend;

    impl RptBackend for FailingBackend {
        fn get_rpt(&self, _addr: Address, _number: u64) -> Result<i64, BackendError> {
            Err(BackendError::new("unreachable"))
        }
        fn window(&self) -> Result<u64, BackendError> {
            Ok(4)
        }
        fn balance_of(&self, _addr: Address, _number: u64) -> Result<u128, BackendError> {
            Err(BackendError::new("unreachable"))
        }
        fn tx_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Err(BackendError::new("unreachable"))
        }
        fn uptime_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Err(BackendError::new("unreachable"))
        }
        fn upload_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Err(BackendError::new("unreachable"))
        }
        fn proxy_count_of(&self, _addr: Address, _number: u64) -> Result<u64, BackendError> {
            Err(BackendError::new("unreachable"))
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn legacy_score_sums_window() {
        let backend = Arc::new(StaticBackend::new(4, 10));
        let service = RptService::new(backend, 1_000, 2_000);

        // Window [7, 10]: four blocks at 10 points each.
        let rpt = service.rpt_of(addr(1), &[addr(1)], 10);
        assert_eq!(rpt.rpt, 40);
    }

    #[test]
    fn legacy_score_memoizes_reads() {
        let backend = Arc::new(StaticBackend::new(4, 10));
        let service = RptService::new(Arc::clone(&backend) as Arc<dyn RptBackend>, 1_000, 2_000);

        service.rpt_of(addr(1), &[addr(1)], 10);
        let first = backend.reads.load(Ordering::SeqCst);
        service.rpt_of(addr(1), &[addr(1)], 10);
        assert_eq!(backend.reads.load(Ordering::SeqCst), first);
    }

    #[test]
    fn window_clips_at_genesis() {
        assert_eq!(window_range(2, 10), 0..=2);
        assert_eq!(window_range(10, 4), 7..=10);
        assert_eq!(window_range(0, 4), 0..=0);
    }

    #[test]
    fn failing_backend_degrades_to_floor() {
        let service = RptService::new(Arc::new(FailingBackend), 1_000, 2_000);
        let candidates = [addr(3), addr(1), addr(2)];

        for candidate in candidates {
            let rpt = service.rpt_of(candidate, &candidates, 10);
            assert_eq!(rpt, Rpt { address: candidate, rpt: MIN_RPT_SCORE });
        }
    }

    #[test]
    fn score_is_deterministic() {
        let service = RptService::new(Arc::new(StaticBackend::new(4, 7)), 1_000, 2_000);
        let a = service.rpt_of(addr(5), &[addr(5)], 42);
        let b = service.rpt_of(addr(5), &[addr(5)], 42);
        assert_eq!(a, b);
    }

    #[test]
    fn sort_breaks_ties_on_ascending_address() {
        let mut list = RptList(vec![
            Rpt { address: addr(3), rpt: 20 },
            Rpt { address: addr(1), rpt: 20 },
            Rpt { address: addr(2), rpt: 50 },
        ]);
        list.sort();
        assert_eq!(
            list.0.iter().map(|r| r.address).collect::<Vec<_>>(),
            vec![addr(1), addr(3), addr(2)]
        );

        // Seats go to the highest scores, smaller address first on ties.
        assert_eq!(list.top(2), vec![addr(2), addr(1)]);
    }

    #[test]
    fn item_hash_distinguishes_blocks() {
        let a = RptItem { address: addr(1), number: 5 }.hash();
        let b = RptItem { address: addr(1), number: 6 }.hash();
        let c = RptItem { address: addr(2), number: 5 }.hash();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn window_is_cached_until_refreshed() {
        struct CountingWindow(AtomicUsize);
        impl RptBackend for CountingWindow {
            fn get_rpt(&self, _: Address, _: u64) -> Result<i64, BackendError> {
                Ok(0)
            }
            fn window(&self) -> Result<u64, BackendError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(8)
            }
            fn balance_of(&self, _: Address, _: u64) -> Result<u128, BackendError> {
                Ok(0)
            }
            fn tx_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
                Ok(0)
            }
            fn uptime_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
                Ok(0)
            }
            fn upload_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
                Ok(0)
            }
            fn proxy_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
                Ok(0)
            }
        }

        let backend = Arc::new(CountingWindow(AtomicUsize::new(0)));
        let service = RptService::new(Arc::clone(&backend) as Arc<dyn RptBackend>, 1_000, 2_000);

        service.window_size().unwrap();
        service.window_size().unwrap();
        assert_eq!(backend.0.load(Ordering::SeqCst), 1);

        service.refresh_window();
        service.window_size().unwrap();
        assert_eq!(backend.0.load(Ordering::SeqCst), 2);
    }
}
