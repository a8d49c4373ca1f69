//! Per-block committee snapshots.
//!
//! A snapshot captures, for one block, the proposers and validators in
//! effect, the recent-signers window and the election inputs (candidates
//! and their reputation list). Snapshots chain by hash and are immutable
//! once published: lookups go to a bounded in-memory cache, then to the
//! persisted checkpoints, and finally reconstruct by walking parent
//! headers forward.
//!
//! A new term begins at every height `n` with `(n - 1) mod (TermLen ×
//! ViewLen) == 0`: the proposers for the term are the top `TermLen`
//! candidates by reputation evaluated at `n - 1`, ties won by the smaller
//! address. Validators come from the configured committee and stay fixed
//! across terms. Every `TermLen × ViewLen` blocks the snapshot is written
//! through to the underlying store.

use lru::LruCache;
use parking_lot::Mutex;
use porchain_config::DporConfig;
use porchain_storage::{KvStore, StorageError};
use porchain_types::{Address, Header, H256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::rpt::{RptList, RptService};
use crate::traits::{BackendError, CandidateRegistry, ChainReader};

/// Number of recent snapshots kept in memory to speed up reorgs.
pub const INMEMORY_SNAPSHOTS: usize = 50;

/// Key prefix for snapshots persisted by hash.
pub const SNAP_KEY_PREFIX: &[u8] = b"snap/";

/// Key prefix for the term-indexed checkpoint pointers.
pub const CHECKPOINT_KEY_PREFIX: &[u8] = b"chkpt/";

/// Errors raised while deriving or loading snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A parent header required for reconstruction is missing
    #[error("unknown ancestor {hash} at height {number}")]
    UnknownAncestor {
        /// Height of the missing header
        number: u64,
        /// Hash of the missing header
        hash: H256,
    },

    /// A header does not directly extend the snapshot it was applied to
    #[error("header #{got} does not extend snapshot #{parent}")]
    NonContiguous {
        /// Snapshot height
        parent: u64,
        /// Header height
        got: u64,
    },

    /// A header's parent hash does not match the snapshot chain
    #[error("parent hash mismatch at height {number}")]
    HashMismatch {
        /// Height at which the chains diverge
        number: u64,
    },

    /// Not enough candidates registered to fill the proposer seats
    #[error("insufficient candidates for term {term}: need {need}, got {got}")]
    InsufficientCandidates {
        /// Term being elected
        term: u64,
        /// Required proposer count
        need: usize,
        /// Available candidate count
        got: usize,
    },

    /// The candidate registry failed
    #[error("candidate registry: {0}")]
    Registry(#[from] BackendError),

    /// The underlying store failed
    #[error("store: {0}")]
    Store(#[from] StorageError),

    /// A persisted snapshot could not be decoded
    #[error("snapshot codec: {0}")]
    Codec(String),

    /// The engine operates only at the chain tip
    #[error("height {height} is beyond the chain tip {tip}")]
    BeyondTip {
        /// Requested height
        height: u64,
        /// Current tip height
        tip: u64,
    },
}

/// The committee governing one block height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    /// Term index
    pub term: u64,
    /// Proposer schedule for the term
    pub proposers: Vec<Address>,
    /// Validator set, sorted ascending by address
    pub validators: Vec<Address>,
}

impl Committee {
    /// The proposer scheduled for block `number`.
    pub fn proposer_of(&self, number: u64, config: &DporConfig) -> Option<Address> {
        self.proposers.get(config.proposer_index(number)).copied()
    }

    /// Whether `addr` validates in this committee.
    pub fn is_validator(&self, addr: &Address) -> bool {
        self.validators.binary_search(addr).is_ok()
    }

    /// Index of a validator in the canonical (ascending) ordering.
    pub fn validator_index(&self, addr: &Address) -> Option<usize> {
        self.validators.binary_search(addr).ok()
    }

    /// Quorum threshold `⌊2N/3⌋ + 1` over this validator set.
    pub fn quorum(&self) -> usize {
        2 * self.validators.len() / 3 + 1
    }
}

/// One block's committee and recent-signers record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DporSnapshot {
    /// Block height this snapshot captures
    pub number: u64,
    /// Hash of the block this snapshot captures
    pub hash: H256,
    /// Term index of the block
    pub term: u64,
    /// View (proposer slot) index of the block within its term
    pub view: u64,
    /// Proposer schedule for the term
    pub proposers: Vec<Address>,
    /// Validator set, sorted ascending by address
    pub validators: Vec<Address>,
    /// Height → proposer for the trailing `TermLen × ViewLen` blocks
    pub recent_signers: BTreeMap<u64, Address>,
    /// Candidates that stood in the last election
    pub candidates: Vec<Address>,
    /// Reputation list the last election ranked
    pub rpt_list: RptList,
}

impl DporSnapshot {
    /// The snapshot for the genesis block.
    pub fn genesis(config: &DporConfig, hash: H256) -> Self {
        let mut validators = config.validators.clone();
        validators.sort();
        Self {
            number: 0,
            hash,
            term: 0,
            view: 0,
            proposers: config.proposers.clone(),
            validators,
            recent_signers: BTreeMap::new(),
            candidates: config.candidates.clone(),
            rpt_list: RptList::default(),
        }
    }

    /// The committee view of this snapshot.
    pub fn committee(&self) -> Committee {
        Committee {
            term: self.term,
            proposers: self.proposers.clone(),
            validators: self.validators.clone(),
        }
    }

    /// The proposer scheduled for block `number` under this snapshot's
    /// term membership.
    pub fn proposer_of(&self, number: u64, config: &DporConfig) -> Option<Address> {
        self.proposers.get(config.proposer_index(number)).copied()
    }

    /// How many blocks `addr` has sealed within the recent-signer window.
    pub fn signed_count_of(&self, addr: &Address) -> usize {
        self.recent_signers.values().filter(|a| *a == addr).count()
    }
}

/// Derives, caches and persists [`DporSnapshot`]s.
pub struct SnapshotEngine {
    config: DporConfig,
    store: Arc<dyn KvStore>,
    recents: Mutex<LruCache<H256, Arc<DporSnapshot>>>,
    rpt: Arc<RptService>,
    registry: Arc<dyn CandidateRegistry>,
}

impl SnapshotEngine {
    /// Creates a snapshot engine.
    pub fn new(
        config: DporConfig,
        store: Arc<dyn KvStore>,
        rpt: Arc<RptService>,
        registry: Arc<dyn CandidateRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            recents: Mutex::new(LruCache::new(
                NonZeroUsize::new(INMEMORY_SNAPSHOTS).unwrap_or(NonZeroUsize::MIN),
            )),
            rpt,
            registry,
        }
    }

    /// The snapshot at `(number, hash)`.
    ///
    /// Resolution order: in-memory cache, persisted checkpoint, then
    /// reconstruction by walking parents back to a known snapshot and
    /// replaying headers forward.
    pub fn snapshot(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: H256,
    ) -> Result<Arc<DporSnapshot>, SnapshotError> {
        let mut pending: Vec<Header> = Vec::new();
        let mut cursor_number = number;
        let mut cursor_hash = hash;

        let mut snap = loop {
            if let Some(snap) = self.recents.lock().get(&cursor_hash).cloned() {
                break snap;
            }
            if let Some(snap) = self.load(cursor_hash)? {
                debug!(number = snap.number, hash = %snap.hash, "loaded checkpoint snapshot");
                break Arc::new(snap);
            }
            if cursor_number == 0 {
                let genesis = DporSnapshot::genesis(&self.config, cursor_hash);
                self.persist(&genesis)?;
                break Arc::new(genesis);
            }

            let header =
                chain
                    .header_by_hash(cursor_hash)
                    .ok_or(SnapshotError::UnknownAncestor {
                        number: cursor_number,
                        hash: cursor_hash,
                    })?;
            cursor_hash = header.parent_hash;
            cursor_number -= 1;
            pending.push(header);
        };

        for header in pending.iter().rev() {
            let next = Arc::new(self.apply(&snap, header)?);
            self.recents.lock().put(next.hash, Arc::clone(&next));
            if self.config.is_checkpoint(next.number) {
                self.persist(&next)?;
            }
            snap = next;
        }

        Ok(snap)
    }

    /// The snapshot at `number` on the canonical chain.
    pub fn snapshot_by_number(
        &self,
        chain: &dyn ChainReader,
        number: u64,
    ) -> Result<Arc<DporSnapshot>, SnapshotError> {
        let header = chain
            .header_by_number(number)
            .ok_or(SnapshotError::UnknownAncestor {
                number,
                hash: H256::NIL,
            })?;
        self.snapshot(chain, number, header.hash())
    }

    /// The committee governing block `height`, which must lie at or one
    /// block above the chain tip.
    pub fn committee_at(
        &self,
        chain: &dyn ChainReader,
        height: u64,
    ) -> Result<Committee, SnapshotError> {
        let head = chain.current_header();
        if height > head.height + 1 {
            return Err(SnapshotError::BeyondTip {
                height,
                tip: head.height,
            });
        }

        let parent = if height == head.height + 1 {
            head
        } else {
            let number = height.saturating_sub(1);
            chain
                .header_by_number(number)
                .ok_or(SnapshotError::UnknownAncestor {
                    number,
                    hash: H256::NIL,
                })?
        };

        let parent_hash = parent.hash();
        let snap = self.snapshot(chain, parent.height, parent_hash)?;

        if !self.config.is_term_start(height) {
            return Ok(snap.committee());
        }

        let term = self.config.term_of(height);
        let validators = snap.validators.clone();
        let proposers = if height <= self.config.max_init_block_number {
            self.config.proposers.clone()
        } else {
            let (proposers, _, _) = self.elect(term, parent.height)?;
            proposers
        };

        Ok(Committee {
            term,
            proposers,
            validators,
        })
    }

    /// Derives the successor snapshot from a parent snapshot and the new
    /// header.
    pub fn apply(
        &self,
        parent: &DporSnapshot,
        header: &Header,
    ) -> Result<DporSnapshot, SnapshotError> {
        let number = parent.number + 1;
        if header.height != number {
            return Err(SnapshotError::NonContiguous {
                parent: parent.number,
                got: header.height,
            });
        }
        if header.parent_hash != parent.hash {
            return Err(SnapshotError::HashMismatch { number });
        }

        let mut snap = parent.clone();
        snap.number = number;
        snap.hash = header.hash();
        snap.term = self.config.term_of(number);
        snap.view = self.config.view_of(number);

        snap.recent_signers.insert(number, header.proposer);
        let span = self.config.term_span();
        snap.recent_signers.retain(|height, _| *height + span > number);

        if self.config.is_term_start(number) && number > self.config.max_init_block_number {
            let (proposers, candidates, rpt_list) = self.elect(snap.term, parent.number)?;
            info!(term = snap.term, number, proposers = ?proposers, "term boundary election");
            snap.proposers = proposers;
            snap.candidates = candidates;
            snap.rpt_list = rpt_list;
        }

        Ok(snap)
    }

    /// Ranks the term's candidates by reputation at `at_number` and
    /// seats the top `TermLen` of them.
    fn elect(
        &self,
        term: u64,
        at_number: u64,
    ) -> Result<(Vec<Address>, Vec<Address>, RptList), SnapshotError> {
        let mut validators = self.config.validators.clone();
        validators.sort();

        let candidates: Vec<Address> = self
            .registry
            .candidates_of(term)?
            .into_iter()
            .filter(|c| validators.binary_search(c).is_err())
            .collect();

        let need = self.config.term_len as usize;
        if candidates.len() < need {
            return Err(SnapshotError::InsufficientCandidates {
                term,
                need,
                got: candidates.len(),
            });
        }

        let rpt_list = self.rpt.rpt_list(&candidates, at_number);
        let proposers = rpt_list.top(need);
        Ok((proposers, candidates, rpt_list))
    }

    /// Loads the most recent persisted checkpoint at or below
    /// `head_number`, if any.
    pub fn latest_checkpoint(
        &self,
        head_number: u64,
    ) -> Result<Option<Arc<DporSnapshot>>, SnapshotError> {
        let span = self.config.term_span();
        let mut term = head_number / span;
        loop {
            if let Some(raw) = self.store.get(&checkpoint_key(term))? {
                let hash =
                    H256::from_slice(&raw).map_err(|e| SnapshotError::Codec(e.to_string()))?;
                if let Some(snap) = self.load(hash)? {
                    return Ok(Some(Arc::new(snap)));
                }
            }
            if term == 0 {
                return Ok(None);
            }
            term -= 1;
        }
    }

    fn load(&self, hash: H256) -> Result<Option<DporSnapshot>, SnapshotError> {
        let Some(raw) = self.store.get(&snap_key(hash))? else {
            return Ok(None);
        };
        let snap: DporSnapshot =
            serde_json::from_slice(&raw).map_err(|e| SnapshotError::Codec(e.to_string()))?;
        Ok(Some(snap))
    }

    fn persist(&self, snap: &DporSnapshot) -> Result<(), SnapshotError> {
        let encoded =
            serde_json::to_vec(snap).map_err(|e| SnapshotError::Codec(e.to_string()))?;
        self.store.put(&snap_key(snap.hash), &encoded)?;
        let term = snap.number / self.config.term_span();
        self.store
            .put(&checkpoint_key(term), snap.hash.as_bytes())?;
        debug!(number = snap.number, term, "checkpointed snapshot");
        Ok(())
    }
}

fn snap_key(hash: H256) -> Vec<u8> {
    let mut key = SNAP_KEY_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

fn checkpoint_key(term: u64) -> Vec<u8> {
    let mut key = CHECKPOINT_KEY_PREFIX.to_vec();
    key.extend_from_slice(&term.to_be_bytes());
    key
}
