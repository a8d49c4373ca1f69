//! Interfaces the engine consumes from external collaborators.
//!
//! The engine operates only at the chain tip and never owns transaction
//! execution, block storage or transport. Everything it needs from the
//! surrounding node is expressed here as a narrow trait, so the engine can
//! be driven by a real node or by test doubles interchangeably.

use async_trait::async_trait;
use porchain_config::DporConfig;
use porchain_crypto::{PrivateKey, Signature};
use porchain_types::{Address, Block, Header, Transaction, H256};
use std::time::SystemTime;

use crate::snapshot::{Committee, SnapshotError};

/// A failure inside an external collaborator.
///
/// These are retriable from the engine's point of view: callers retry up
/// to a per-call bound and then degrade.
#[derive(Debug, Clone, thiserror::Error)]
#[error("backend error: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    /// Creates a backend error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Read access to the canonical chain.
pub trait ChainReader: Send + Sync {
    /// The current chain head.
    fn current_header(&self) -> Header;

    /// Looks up a header by block hash.
    fn header_by_hash(&self, hash: H256) -> Option<Header>;

    /// Looks up a header by height.
    fn header_by_number(&self, number: u64) -> Option<Header>;
}

/// Write access to the canonical chain, used by the finalize callback.
pub trait ChainWriter: Send + Sync {
    /// Appends a finalized block at the chain tip.
    fn insert_block(&self, block: Block) -> Result<(), BackendError>;
}

/// The external block builder that assembles candidate blocks.
#[async_trait]
pub trait BlockBuilder: Send + Sync {
    /// Transactions currently eligible for inclusion.
    async fn pending_transactions(&self) -> Vec<Transaction>;

    /// Assembles a sealed candidate block on top of `parent` carrying
    /// `txs`. The proposer seal is applied by the engine afterwards.
    async fn seal(&self, parent: &Header, txs: Vec<Transaction>) -> Result<Block, BackendError>;
}

/// Signing capability of the local node.
pub trait Signer: Send + Sync {
    /// The signer's account address.
    fn address(&self) -> Address;

    /// Signs a 32-byte digest.
    fn sign(&self, digest: H256) -> Result<Signature, BackendError>;
}

/// A [`Signer`] backed by an in-process private key.
pub struct LocalSigner {
    key: PrivateKey,
    address: Address,
}

impl LocalSigner {
    /// Wraps a private key.
    pub fn new(key: PrivateKey) -> Self {
        let address = Address::new(key.public_key().to_address());
        Self { key, address }
    }

    /// Generates a throwaway signer with a random key.
    pub fn random() -> Self {
        Self::new(PrivateKey::random())
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: H256) -> Result<Signature, BackendError> {
        self.key
            .sign_prehash(digest.as_fixed_bytes())
            .map_err(BackendError::new)
    }
}

/// The reputation source contracts, consumed through an abstract
/// interface.
///
/// `get_rpt` serves the legacy aggregate score; the per-metric reads
/// back the versioned collectors.
pub trait RptBackend: Send + Sync {
    /// Legacy aggregate reputation of `addr` at block `number`.
    fn get_rpt(&self, addr: Address, number: u64) -> Result<i64, BackendError>;

    /// The sliding-window size configured on the reputation contract.
    fn window(&self) -> Result<u64, BackendError>;

    /// Account balance at block `number`, backing the rank metric.
    fn balance_of(&self, addr: Address, number: u64) -> Result<u128, BackendError>;

    /// Transactions sent by `addr` in block `number`.
    fn tx_count_of(&self, addr: Address, number: u64) -> Result<u64, BackendError>;

    /// Uptime points of `addr` at block `number` (0..=100).
    fn uptime_of(&self, addr: Address, number: u64) -> Result<u64, BackendError>;

    /// File uploads contributed by `addr` in block `number`.
    fn upload_count_of(&self, addr: Address, number: u64) -> Result<u64, BackendError>;

    /// Proxy relays served by `addr` in block `number`.
    fn proxy_count_of(&self, addr: Address, number: u64) -> Result<u64, BackendError>;
}

/// The campaign registry listing candidates per term.
pub trait CandidateRegistry: Send + Sync {
    /// Candidates registered for `term`. Failures propagate to the
    /// caller; there is no degraded default for an unknown candidate set.
    fn candidates_of(&self, term: u64) -> Result<Vec<Address>, BackendError>;
}

/// Outbound half of a peer connection handed out by the transport.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Sends an encoded message to the peer.
    async fn send(&self, payload: Vec<u8>) -> Result<(), BackendError>;
}

/// The P2P transport the dialer establishes committee connections over.
#[async_trait]
pub trait P2pServer: Send + Sync {
    /// Dials a committee member, returning the send half on success.
    async fn dial(&self, addr: Address) -> Result<Box<dyn PeerChannel>, BackendError>;
}

/// Broadcast of finalized blocks to ordinary (non-committee) peers.
pub trait BlockBroadcaster: Send + Sync {
    /// Announces a block; `propagate` requests full-body relay.
    fn broadcast_block(&self, block: &Block, propagate: bool);
}

/// A network time source for the boot-time clock sanity check.
pub trait ClockProbe: Send + Sync {
    /// Current network time.
    fn network_time(&self) -> Result<SystemTime, BackendError>;
}

/// The narrow capability surface the handler and state machine hold on
/// the engine.
///
/// The engine owns the handler; the handler only sees the engine through
/// this interface, which keeps the dependency one-directional.
pub trait DporService: Send + Sync {
    /// Engine configuration.
    fn config(&self) -> &DporConfig;

    /// The current chain head.
    fn head(&self) -> Header;

    /// The local signer address.
    fn signer_address(&self) -> Address;

    /// Signs a digest with the local signer key.
    fn sign_digest(&self, digest: H256) -> Result<Signature, BackendError>;

    /// The proposers and validators governing block `height`, which must
    /// be at or directly above the chain tip.
    fn committee_at(&self, height: u64) -> Result<Committee, SnapshotError>;

    /// Inserts a finalized block into the chain and announces it.
    fn finalize(&self, block: Block) -> Result<(), BackendError>;
}
