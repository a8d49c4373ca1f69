//! Versioned reputation collectors.
//!
//! A collector aggregates the five sub-metrics over the sliding window:
//!
//! | metric      | weight | source                         |
//! |-------------|--------|--------------------------------|
//! | rank        | 50     | balance position among candidates |
//! | txs         | 15     | transactions sent per block    |
//! | maintenance | 10     | uptime points                  |
//! | upload      | 15     | file uploads per block         |
//! | proxy       | 10     | proxy relays served per block  |
//!
//! v2 recomputes every read; v3 memoizes the per-block weighted
//! contribution and keeps a per-block sorted-balance table so the rank
//! metric does not re-read every candidate balance for every candidate.

use lru::LruCache;
use parking_lot::Mutex;
use porchain_types::Address;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, error};

use super::{read_with_retry, window_range, Rpt, RptItem, MIN_RPT_SCORE};
use crate::traits::{BackendError, RptBackend};

/// Per-metric weights, fixed at compile time, summing to 100.
pub mod weights {
    /// Weight of the balance-rank metric
    pub const RANK: i64 = 50;
    /// Weight of the transaction-activity metric
    pub const TXS: i64 = 15;
    /// Weight of the maintenance (uptime) metric
    pub const MAINTENANCE: i64 = 10;
    /// Weight of the upload metric
    pub const UPLOAD: i64 = 15;
    /// Weight of the proxy-relay metric
    pub const PROXY: i64 = 10;
}

/// Rank points granted when the candidate set is empty.
const DEFAULT_RANK_POINTS: i64 = 100;

/// Per-block cap applied to every metric.
const METRIC_CAP: i64 = 100;

/// Bound on the v3 memoization tables.
const MEMO_SIZE: usize = 1024;

type BalanceTable = Vec<(u128, Address)>;

/// A reputation collector for one fork generation.
pub struct RptCollector {
    backend: Arc<dyn RptBackend>,
    /// Per-(addr, block) weighted contribution, v3 only.
    memo: Option<Mutex<LruCache<porchain_types::H256, i64>>>,
    /// Per-block sorted balances, v3 only.
    balances: Option<Mutex<LruCache<u64, BalanceTable>>>,
}

impl RptCollector {
    /// The v2 collector: no memoization, every call re-reads.
    pub fn v2(backend: Arc<dyn RptBackend>) -> Self {
        Self {
            backend,
            memo: None,
            balances: None,
        }
    }

    /// The v3 collector: memoized contributions and balance tables.
    pub fn v3(backend: Arc<dyn RptBackend>) -> Self {
        let cap = NonZeroUsize::new(MEMO_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            memo: Some(Mutex::new(LruCache::new(cap))),
            balances: Some(Mutex::new(LruCache::new(cap))),
        }
    }

    /// The aggregate score of `addr` among `addrs` at block `number`.
    pub fn rpt_of(&self, addr: Address, addrs: &[Address], number: u64) -> Rpt {
        let window = match self.backend.window() {
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
            match self.contribution_at(addr, addrs, block) {
                Ok(points) => total += points,
                Err(err) => {
                    error!(%addr, number, block, error = %err,
                        "metric reads exhausted, degrading candidate");
                    return Rpt {
                        address: addr,
                        rpt: MIN_RPT_SCORE,
                    };
                }
            }
        }

        debug!(%addr, number, score = total.max(MIN_RPT_SCORE), "reputation computed");
        Rpt {
            address: addr,
            rpt: total.max(MIN_RPT_SCORE),
        }
    }

    /// Rank metric summed over the window.
    pub fn rank_value_of(
        &self,
        addr: Address,
        addrs: &[Address],
        number: u64,
        window: u64,
    ) -> Result<i64, BackendError> {
        let mut total = 0;
        for block in window_range(number, window) {
            total += self.rank_points(addr, addrs, block)?;
        }
        Ok(total)
    }

    /// Transaction-activity metric summed over the window.
    pub fn txs_value_of(&self, addr: Address, number: u64, window: u64) -> Result<i64, BackendError> {
        let mut total = 0;
        for block in window_range(number, window) {
            let count = read_with_retry("tx_count_of", || self.backend.tx_count_of(addr, block))?;
            total += (count as i64).min(METRIC_CAP);
        }
        Ok(total)
    }

    /// Maintenance (uptime) metric summed over the window.
    pub fn maintenance_value_of(
        &self,
        addr: Address,
        number: u64,
        window: u64,
    ) -> Result<i64, BackendError> {
        let mut total = 0;
        for block in window_range(number, window) {
            let uptime = read_with_retry("uptime_of", || self.backend.uptime_of(addr, block))?;
            total += (uptime as i64).min(METRIC_CAP);
        }
        Ok(total)
    }

    /// Upload metric summed over the window.
    pub fn upload_value_of(
        &self,
        addr: Address,
        number: u64,
        window: u64,
    ) -> Result<i64, BackendError> {
        let mut total = 0;
        for block in window_range(number, window) {
            let count =
                read_with_retry("upload_count_of", || self.backend.upload_count_of(addr, block))?;
            total += (count as i64).saturating_mul(20).min(METRIC_CAP);
        }
        Ok(total)
    }

    /// Proxy-relay metric summed over the window.
    pub fn proxy_value_of(
        &self,
        addr: Address,
        number: u64,
        window: u64,
    ) -> Result<i64, BackendError> {
        let mut total = 0;
        for block in window_range(number, window) {
            let count =
                read_with_retry("proxy_count_of", || self.backend.proxy_count_of(addr, block))?;
            total += (count as i64).saturating_mul(20).min(METRIC_CAP);
        }
        Ok(total)
    }

    /// The weighted score contribution of one block, memoized for v3.
    fn contribution_at(
        &self,
        addr: Address,
        addrs: &[Address],
        block: u64,
    ) -> Result<i64, BackendError> {
        let key = RptItem {
            address: addr,
            number: block,
        }
        .hash();

        if let Some(memo) = &self.memo {
            if let Some(points) = memo.lock().get(&key).copied() {
                return Ok(points);
            }
        }

        let rank = self.rank_points(addr, addrs, block)?;
        let txs = read_with_retry("tx_count_of", || self.backend.tx_count_of(addr, block))?;
        let uptime = read_with_retry("uptime_of", || self.backend.uptime_of(addr, block))?;
        let upload =
            read_with_retry("upload_count_of", || self.backend.upload_count_of(addr, block))?;
        let proxy =
            read_with_retry("proxy_count_of", || self.backend.proxy_count_of(addr, block))?;

        let points = (weights::RANK * rank
            + weights::TXS * (txs as i64).min(METRIC_CAP)
            + weights::MAINTENANCE * (uptime as i64).min(METRIC_CAP)
            + weights::UPLOAD * (upload as i64).saturating_mul(20).min(METRIC_CAP)
            + weights::PROXY * (proxy as i64).saturating_mul(20).min(METRIC_CAP))
            / 100;

        if let Some(memo) = &self.memo {
            memo.lock().put(key, points);
        }
        Ok(points)
    }

    /// Balance-rank points of `addr` at one block: the share of
    /// candidates it outranks, scaled to 0..=100.
    fn rank_points(
        &self,
        addr: Address,
        addrs: &[Address],
        block: u64,
    ) -> Result<i64, BackendError> {
        if addrs.is_empty() {
            return Ok(DEFAULT_RANK_POINTS);
        }

        let table = self.balance_table(addrs, block)?;
        let position = table
            .iter()
            .position(|(_, candidate)| *candidate == addr)
            .unwrap_or(table.len().saturating_sub(1));

        let len = table.len() as i64;
        Ok(((len - position as i64) * 100) / len)
    }

    /// Balances of all candidates at one block, sorted richest-first
    /// with address as the deterministic tie-break.
    fn balance_table(&self, addrs: &[Address], block: u64) -> Result<BalanceTable, BackendError> {
        if let Some(balances) = &self.balances {
            if let Some(table) = balances.lock().get(&block).cloned() {
                return Ok(table);
            }
        }

        let mut table = Vec::with_capacity(addrs.len());
        for candidate in addrs {
            let balance =
                read_with_retry("balance_of", || self.backend.balance_of(*candidate, block))?;
            table.push((balance, *candidate));
        }
        table.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        if let Some(balances) = &self.balances {
            balances.lock().put(block, table.clone());
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RichGetRicher {
        window: u64,
        balance_reads: AtomicUsize,
    }

    impl RptBackend for RichGetRicher {
        fn get_rpt(&self, _: Address, _: u64) -> Result<i64, BackendError> {
            Ok(0)
        }
        fn window(&self) -> Result<u64, BackendError> {
            Ok(self.window)
        }
        fn balance_of(&self, addr: Address, _: u64) -> Result<u128, BackendError> {
            self.balance_reads.fetch_add(1, Ordering::SeqCst);
            // Balance grows with the low address byte.
            Ok(addr.as_bytes()[19] as u128 * 1_000)
        }
        fn tx_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
            Ok(2)
        }
        fn uptime_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
            Ok(100)
        }
        fn upload_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
            Ok(1)
        }
        fn proxy_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
            Ok(0)
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn richer_candidate_outranks() {
        let backend = Arc::new(RichGetRicher {
            window: 1,
            balance_reads: AtomicUsize::new(0),
        });
        let collector = RptCollector::v2(backend);
        let addrs = [addr(1), addr(2), addr(3)];

        let low = collector.rank_value_of(addr(1), &addrs, 10, 1).unwrap();
        let high = collector.rank_value_of(addr(3), &addrs, 10, 1).unwrap();
        assert!(high > low);
    }

    #[test]
    fn v2_and_v3_agree() {
        let backend = Arc::new(RichGetRicher {
            window: 3,
            balance_reads: AtomicUsize::new(0),
        });
        let v2 = RptCollector::v2(Arc::clone(&backend) as Arc<dyn RptBackend>);
        let v3 = RptCollector::v3(Arc::clone(&backend) as Arc<dyn RptBackend>);
        let addrs = [addr(1), addr(2), addr(3)];

        assert_eq!(v2.rpt_of(addr(2), &addrs, 10), v3.rpt_of(addr(2), &addrs, 10));
    }

    #[test]
    fn v3_memoizes_balance_reads() {
        let backend = Arc::new(RichGetRicher {
            window: 2,
            balance_reads: AtomicUsize::new(0),
        });
        let v3 = RptCollector::v3(Arc::clone(&backend) as Arc<dyn RptBackend>);
        let addrs = [addr(1), addr(2)];

        v3.rpt_of(addr(1), &addrs, 10);
        let after_first = backend.balance_reads.load(Ordering::SeqCst);
        v3.rpt_of(addr(2), &addrs, 10);
        // The second candidate reuses the cached balance tables.
        assert_eq!(backend.balance_reads.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn score_never_below_floor() {
        struct Broke;
        impl RptBackend for Broke {
            fn get_rpt(&self, _: Address, _: u64) -> Result<i64, BackendError> {
                Ok(0)
            }
            fn window(&self) -> Result<u64, BackendError> {
                Ok(1)
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

        let collector = RptCollector::v2(Arc::new(Broke));
        // Sole candidate still earns full rank points, but the floor
        // applies when everything else is zero and rank is diluted.
        let score = collector.rpt_of(addr(1), &[], 0);
        assert!(score.rpt >= MIN_RPT_SCORE);
    }
}
