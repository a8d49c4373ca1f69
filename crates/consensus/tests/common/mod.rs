//! Shared test fixtures: a four-validator committee with one proposer,
//! and a service double recording finalized blocks.

use parking_lot::{Mutex, RwLock};
use porchain_config::DporConfig;
use porchain_consensus::backend::message::{ConsensusMsg, MsgKind};
use porchain_consensus::ledger::SignedBlocksLedger;
use porchain_consensus::sigs::SignatureCache;
use porchain_consensus::snapshot::{Committee, SnapshotError};
use porchain_consensus::state::{DporStateMachine, StateAction, StateError, StateInput};
use porchain_consensus::traits::{BackendError, DporService, LocalSigner, Signer};
use porchain_consensus::verify::RealVerifier;
use porchain_crypto::PrivateKey;
use porchain_storage::MemoryStore;
use porchain_types::{Address, Block, Header, Seal, H256};
use std::sync::Arc;

/// A test committee: one proposer key and four validator keys, the
/// validator list sorted ascending by address as the protocol requires.
pub struct Net {
    pub config: DporConfig,
    pub proposer: PrivateKey,
    pub validators: Vec<PrivateKey>,
}

impl Net {
    pub fn new() -> Self {
        let config = DporConfig::dev();
        let proposer = PrivateKey::random();
        let mut validators: Vec<PrivateKey> = (0..4).map(|_| PrivateKey::random()).collect();
        validators.sort_by_key(|k| Address::new(k.public_key().to_address()));
        Self {
            config,
            proposer,
            validators,
        }
    }

    pub fn proposer_addr(&self) -> Address {
        Address::new(self.proposer.public_key().to_address())
    }

    pub fn validator_addr(&self, i: usize) -> Address {
        Address::new(self.validators[i].public_key().to_address())
    }

    pub fn committee(&self) -> Committee {
        Committee {
            term: self.config.term_of(10),
            proposers: vec![self.proposer_addr(); self.config.term_len as usize],
            validators: (0..self.validators.len())
                .map(|i| self.validator_addr(i))
                .collect(),
        }
    }

    /// A block at `height` sealed by the committee proposer.
    pub fn sealed_block(&self, height: u64, parent: &Header, salt: u8) -> Block {
        let mut header = Header::new(
            height,
            parent.hash(),
            self.proposer_addr(),
            parent.timestamp + self.config.period_ms,
            self.validators.len(),
        );
        header.extra.vanity[0] = salt;
        let seal = self
            .proposer
            .sign_prehash(header.hash().as_fixed_bytes())
            .unwrap();
        header.extra.seal = Seal::new(seal.to_bytes());
        Block::empty(header)
    }

    /// A vote signed by validator `i`.
    pub fn vote(&self, i: usize, kind: MsgKind, height: u64, hash: H256) -> ConsensusMsg {
        let view = self.config.view_of(height);
        let digest = ConsensusMsg::digest(kind, height, view, hash);
        let sig = self.validators[i]
            .sign_prehash(digest.as_fixed_bytes())
            .unwrap();
        ConsensusMsg {
            kind,
            height,
            view,
            hash,
            signer: self.validator_addr(i),
            sig: Seal::new(sig.to_bytes()),
        }
    }

    /// The preprepare message the proposer attaches to a block.
    pub fn preprepare(&self, block: &Block) -> ConsensusMsg {
        let height = block.height();
        let view = self.config.view_of(height);
        let digest = ConsensusMsg::digest(MsgKind::Preprepare, height, view, block.hash());
        let sig = self
            .proposer
            .sign_prehash(digest.as_fixed_bytes())
            .unwrap();
        ConsensusMsg {
            kind: MsgKind::Preprepare,
            height,
            view,
            hash: block.hash(),
            signer: self.proposer_addr(),
            sig: Seal::new(sig.to_bytes()),
        }
    }

    /// The deterministic impeach block every honest validator derives
    /// when the proposer at `height` stays silent.
    pub fn impeach_block(&self, height: u64, parent: &Header) -> Block {
        let header = Header::new(
            height,
            parent.hash(),
            self.proposer_addr(),
            parent.timestamp + self.config.period_ms + self.config.impeach_timeout_ms,
            self.validators.len(),
        );
        Block::empty(header)
    }
}

/// Service double: fixed committee, recorded finalizations, head
/// advancing as blocks finalize.
pub struct TestService {
    pub config: DporConfig,
    pub signer: LocalSigner,
    pub committee: Committee,
    pub head: RwLock<Header>,
    pub finalized: Mutex<Vec<Block>>,
}

impl TestService {
    pub fn new(net: &Net, local_validator: usize, head: Header) -> Arc<Self> {
        Arc::new(Self {
            config: net.config.clone(),
            signer: LocalSigner::new(net.validators[local_validator].clone()),
            committee: net.committee(),
            head: RwLock::new(head),
            finalized: Mutex::new(Vec::new()),
        })
    }
}

impl DporService for TestService {
    fn config(&self) -> &DporConfig {
        &self.config
    }

    fn head(&self) -> Header {
        self.head.read().clone()
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn sign_digest(&self, digest: H256) -> Result<porchain_crypto::Signature, BackendError> {
        self.signer.sign(digest)
    }

    fn committee_at(&self, _height: u64) -> Result<Committee, SnapshotError> {
        Ok(self.committee.clone())
    }

    fn finalize(&self, block: Block) -> Result<(), BackendError> {
        *self.head.write() = block.header.clone();
        self.finalized.lock().push(block);
        Ok(())
    }
}

/// A machine over the test service, positioned above `head`.
pub fn machine(service: &Arc<TestService>) -> DporStateMachine {
    DporStateMachine::new(
        Arc::clone(service) as Arc<dyn DporService>,
        Arc::new(RealVerifier),
        Arc::new(SignatureCache::new()),
        Arc::new(SignatureCache::new()),
        Arc::new(SignedBlocksLedger::new(Arc::new(MemoryStore::new()))),
    )
}

/// Applies one input, executing any finalize actions against the
/// service the way the runner task does.
pub fn drive(
    machine: &mut DporStateMachine,
    service: &Arc<TestService>,
    input: StateInput,
) -> Result<Vec<StateAction>, StateError> {
    let actions = machine.apply(input)?;
    for action in &actions {
        if let StateAction::Finalize(block) = action {
            service.finalize(block.clone()).unwrap();
        }
    }
    Ok(actions)
}

/// The head header the scenarios start from (height 9).
pub fn genesis_head(net: &Net) -> Header {
    Header::new(
        9,
        H256::keccak256(b"ancestor"),
        net.proposer_addr(),
        9 * net.config.period_ms,
        net.validators.len(),
    )
}

/// Counts the broadcasts of a given kind among actions.
pub fn broadcasts_of(actions: &[StateAction], kind: MsgKind) -> usize {
    actions
        .iter()
        .filter(|a| match a {
            StateAction::Broadcast(msg) => msg.msg().kind == kind,
            _ => false,
        })
        .count()
}
