//! The consensus state machine.
//!
//! One finite automaton drives each block height through the PBFT phases,
//! with an impeachment path that replaces a silent proposer's block by a
//! deterministic empty block:
//!
//! ```text
//! ┌──────┐ local proposer sealed, or first valid preprepare
//! │ Idle │────────────────────────────────────────────────┐
//! └──┬───┘                                                ▼
//!    │ view timer expires                         ┌─────────────┐
//!    ▼                                            │ Preprepared │ broadcast prepare
//! ┌────────────────────┐                          └──────┬──────┘
//! │ ImpeachPreprepared │ broadcast impeach-prepare       │ 2f+1 prepares
//! └──────┬─────────────┘                                 ▼
//!        │ 2f+1 impeach-prepares                  ┌──────────┐
//!        ▼                                        │ Prepared │ broadcast commit
//! ┌─────────────────┐                             └──────┬───┘
//! │ ImpeachPrepared │ broadcast impeach-commit           │ 2f+1 commits
//! └──────┬──────────┘                                    ▼
//!        │ 2f+1 impeach-commits                   ┌───────────┐
//!        ▼                                        │ Committed │ finalize, relay
//! ┌──────────────────┐                            └───────────┘
//! │ ImpeachCommitted │ finalize empty block
//! └──────────────────┘
//! ```
//!
//! The machine is logically single-threaded: it owns its (height, state)
//! and the pending block, consumes a serialized input queue and returns
//! the outbound actions for the caller to execute. It is robust to
//! out-of-order delivery: commit signatures arriving before the prepare
//! quorum are buffered in the commit cache and re-checked at promotion.

use porchain_storage::StorageError;
use porchain_types::{Address, Block, Header, Seal, H256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::message::{ConsensusMsg, MsgKind, PeerMessage};
use crate::ledger::{LedgerError, SignedBlocksLedger};
use crate::sigs::SignatureCache;
use crate::snapshot::{Committee, SnapshotError};
use crate::traits::{BackendError, DporService};
use crate::verify::{verify_finalized, VerifierPolicy, VerifyError};

/// The quorum ratio numerator: accept when `votes × 3 > N × 2`.
pub const PCT_A: usize = 2;
/// The quorum ratio denominator.
pub const PCT_B: usize = 3;

/// Whether `votes` distinct validators out of `n` form a quorum.
pub fn quorum_reached(votes: usize, n: usize) -> bool {
    votes * PCT_B > n * PCT_A
}

/// The states of the per-height automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DporState {
    /// Waiting for a block at the current height
    Idle,
    /// A sealed block is pinned; collecting prepares
    Preprepared,
    /// Prepare quorum reached; collecting commits
    Prepared,
    /// Commit quorum reached; block finalized
    Committed,
    /// View timer expired; collecting impeach-prepares
    ImpeachPreprepared,
    /// Impeach-prepare quorum reached; collecting impeach-commits
    ImpeachPrepared,
    /// Impeach-commit quorum reached; empty block finalized
    ImpeachCommitted,
}

impl fmt::Display for DporState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preprepared => "preprepared",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::ImpeachPreprepared => "impeach-preprepared",
            Self::ImpeachPrepared => "impeach-prepared",
            Self::ImpeachCommitted => "impeach-committed",
        };
        write!(f, "{}", name)
    }
}

/// Inputs consumed from the serialized queue.
#[derive(Debug, Clone)]
pub enum StateInput {
    /// A locally mined pending block from the mining loop
    MinedBlock(Block),
    /// A preprepare message with its block body
    Preprepare(ConsensusMsg, Block),
    /// A prepare vote
    Prepare(ConsensusMsg),
    /// A commit vote
    Commit(ConsensusMsg),
    /// An impeach-prepare vote
    ImpeachPrepare(ConsensusMsg),
    /// An impeach-commit vote
    ImpeachCommit(ConsensusMsg),
    /// A finalized block relayed by a peer
    BlockRelay(Block),
    /// The view timer elapsed
    ViewTimeout {
        /// Height the timer was armed for
        height: u64,
    },
}

/// Outbound effects produced by a transition.
#[derive(Debug, Clone)]
pub enum StateAction {
    /// Send to all committee peers
    Broadcast(PeerMessage),
    /// Hand a finalized block to the engine for chain insertion
    Finalize(Block),
    /// Re-arm the view timer
    ResetTimer,
}

/// Errors from processing one input.
///
/// Non-fatal variants mean the offending input is dropped; fatal ones
/// halt the engine.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The equivocation guard refused to sign a second block
    #[error("{0}")]
    Equivocation(LedgerError),

    /// The ledger's backing store failed
    #[error("store: {0}")]
    Store(StorageError),

    /// Message height does not address the current height
    #[error("message height {got} does not match current height {current}")]
    WrongHeight {
        /// Height in the message
        got: u64,
        /// Height the machine is at
        current: u64,
    },

    /// Embedded view does not match the schedule
    #[error("message view {got} does not match view {expected} at height {height}")]
    WrongView {
        /// View in the message
        got: u64,
        /// Scheduled view
        expected: u64,
        /// Height in the message
        height: u64,
    },

    /// The signer is not a committee validator
    #[error("signer {signer} is not a validator at height {height}")]
    NotValidator {
        /// Claimed signer
        signer: Address,
        /// Addressed height
        height: u64,
    },

    /// The signer is not the scheduled proposer
    #[error("signer {signer} is not the proposer at height {height}")]
    NotProposer {
        /// Claimed signer
        signer: Address,
        /// Addressed height
        height: u64,
    },

    /// The signature does not recover to the claimed signer
    #[error("bad {kind} signature at height {height}")]
    BadSignature {
        /// Message kind
        kind: MsgKind,
        /// Addressed height
        height: u64,
    },

    /// The carried block does not match the message hash
    #[error("block hash {block} does not match message hash {msg}")]
    BlockHashMismatch {
        /// Hash of the carried block
        block: H256,
        /// Hash in the message
        msg: H256,
    },

    /// Header verification rejected the block
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Snapshot derivation failed
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// An external collaborator failed
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<LedgerError> for StateError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Equivocation { .. } => Self::Equivocation(err),
            LedgerError::Store(store) => Self::Store(store),
        }
    }
}

impl StateError {
    /// Fatal errors halt the engine; everything else drops the input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Equivocation(_) | Self::Store(_))
    }
}

/// The per-height consensus automaton.
pub struct DporStateMachine {
    service: Arc<dyn DporService>,
    verifier: Arc<dyn VerifierPolicy>,
    prepare_sigs: Arc<SignatureCache>,
    commit_sigs: Arc<SignatureCache>,
    ledger: Arc<SignedBlocksLedger>,

    state: DporState,
    height: u64,
    pending: Option<Block>,
    impeach_pending: Option<Block>,
}

impl DporStateMachine {
    /// Creates a machine positioned one block above the chain head.
    pub fn new(
        service: Arc<dyn DporService>,
        verifier: Arc<dyn VerifierPolicy>,
        prepare_sigs: Arc<SignatureCache>,
        commit_sigs: Arc<SignatureCache>,
        ledger: Arc<SignedBlocksLedger>,
    ) -> Self {
        let height = service.head().height + 1;
        Self {
            service,
            verifier,
            prepare_sigs,
            commit_sigs,
            ledger,
            state: DporState::Idle,
            height,
            pending: None,
            impeach_pending: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DporState {
        self.state
    }

    /// Height the machine is working on.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// View (proposer slot) of the current height.
    pub fn view(&self) -> u64 {
        self.service.config().view_of(self.height)
    }

    /// The pinned pending block, if any.
    pub fn pending(&self) -> Option<&Block> {
        self.pending.as_ref()
    }

    /// Moves to a new height, dropping per-height state.
    pub fn begin_height(&mut self, height: u64) {
        debug!(height, "state machine beginning new height");
        self.height = height;
        self.state = DporState::Idle;
        self.pending = None;
        self.impeach_pending = None;
    }

    /// Processes one input, returning the outbound actions.
    pub fn apply(&mut self, input: StateInput) -> Result<Vec<StateAction>, StateError> {
        match input {
            StateInput::MinedBlock(block) => self.on_mined_block(block),
            StateInput::Preprepare(msg, block) => self.on_preprepare(msg, block),
            StateInput::Prepare(msg) => self.on_prepare(msg),
            StateInput::Commit(msg) => self.on_commit(msg),
            StateInput::ImpeachPrepare(msg) => self.on_impeach_prepare(msg),
            StateInput::ImpeachCommit(msg) => self.on_impeach_commit(msg),
            StateInput::BlockRelay(block) => self.on_block_relay(block),
            StateInput::ViewTimeout { height } => self.on_timeout(height),
        }
    }

    fn on_mined_block(&mut self, mut block: Block) -> Result<Vec<StateAction>, StateError> {
        if block.height() != self.height || self.state != DporState::Idle {
            debug!(height = block.height(), state = %self.state, "ignoring mined block");
            return Ok(Vec::new());
        }

        let committee = self.service.committee_at(self.height)?;
        let me = self.service.signer_address();
        let scheduled = committee.proposer_of(self.height, self.service.config());
        if scheduled != Some(me) {
            return Err(StateError::NotProposer {
                signer: me,
                height: self.height,
            });
        }

        // Apply the proposer seal; the identity hash is unaffected.
        let n = committee.validators.len();
        block.header.extra.validator_sigs.resize(n, Seal::ZERO);
        let seal = self.service.sign_digest(block.hash())?;
        block.header.extra.seal = Seal::new(seal.to_bytes());

        let hash = block.hash();
        info!(height = self.height, %hash, "pinned locally sealed block");
        self.pending = Some(block.clone());
        self.state = DporState::Preprepared;

        let preprepare = ConsensusMsg::signed(
            self.service.as_ref(),
            MsgKind::Preprepare,
            self.height,
            self.view(),
            hash,
        )?;
        let mut actions = vec![
            StateAction::Broadcast(PeerMessage::ConsensusWithBlock(preprepare, block)),
            StateAction::ResetTimer,
        ];

        // A proposer that also validates contributes its own prepare.
        if committee.is_validator(&me) {
            actions.extend(self.sign_prepare(hash, &committee)?);
        }
        Ok(actions)
    }

    fn on_preprepare(
        &mut self,
        msg: ConsensusMsg,
        block: Block,
    ) -> Result<Vec<StateAction>, StateError> {
        self.check_height(&msg)?;
        self.check_view(&msg)?;

        if block.hash() != msg.hash || block.height() != msg.height {
            return Err(StateError::BlockHashMismatch {
                block: block.hash(),
                msg: msg.hash,
            });
        }

        let committee = self.service.committee_at(msg.height)?;
        let scheduled = committee.proposer_of(msg.height, self.service.config());
        if scheduled != Some(msg.signer) || block.header.proposer != msg.signer {
            return Err(StateError::NotProposer {
                signer: msg.signer,
                height: msg.height,
            });
        }
        if !msg.verify_signature() {
            return Err(StateError::BadSignature {
                kind: msg.kind,
                height: msg.height,
            });
        }

        self.verifier
            .verify_header(&block.header, &committee, self.service.config())?;

        match self.state {
            DporState::Idle => {
                let hash = msg.hash;
                info!(height = self.height, %hash, proposer = %msg.signer, "pinned proposed block");
                self.pending = Some(block);
                self.state = DporState::Preprepared;

                let me = self.service.signer_address();
                let mut actions = vec![StateAction::ResetTimer];
                if committee.is_validator(&me) {
                    actions.extend(self.sign_prepare(hash, &committee)?);
                }
                Ok(actions)
            }
            DporState::Preprepared | DporState::Prepared | DporState::Committed => {
                if self.pending.as_ref().map(Block::hash) == Some(msg.hash) {
                    return Ok(Vec::new());
                }
                // A second, distinct proposal at the same height. The
                // guard refuses the signature and flags the conflict.
                let me = self.service.signer_address();
                if committee.is_validator(&me) {
                    self.ledger.record(self.height, msg.hash)?;
                }
                warn!(height = self.height, hash = %msg.hash, "ignoring conflicting proposal");
                Ok(Vec::new())
            }
            _ => {
                debug!(state = %self.state, "ignoring preprepare during impeachment");
                Ok(Vec::new())
            }
        }
    }

    fn on_prepare(&mut self, msg: ConsensusMsg) -> Result<Vec<StateAction>, StateError> {
        let committee = self.admit_vote(&msg, MsgKind::Prepare)?;
        let count = self.prepare_sigs.add(msg.hash, msg.signer, vote_sig(&msg));
        debug!(height = msg.height, count, "prepare recorded");

        if self.state == DporState::Preprepared
            && self.pending.as_ref().map(Block::hash) == Some(msg.hash)
            && quorum_reached(count, committee.validators.len())
        {
            return self.promote_prepared(msg.hash, &committee);
        }
        Ok(Vec::new())
    }

    fn on_commit(&mut self, msg: ConsensusMsg) -> Result<Vec<StateAction>, StateError> {
        let committee = self.admit_vote(&msg, MsgKind::Commit)?;
        let count = self.commit_sigs.add(msg.hash, msg.signer, vote_sig(&msg));
        debug!(height = msg.height, count, "commit recorded");

        if self.state == DporState::Prepared
            && self.pending.as_ref().map(Block::hash) == Some(msg.hash)
            && quorum_reached(count, committee.validators.len())
        {
            return self.finalize_pending(&committee);
        }
        // Early commits are buffered in the cache and re-checked when the
        // prepare quorum promotes this machine.
        Ok(Vec::new())
    }

    fn on_impeach_prepare(&mut self, msg: ConsensusMsg) -> Result<Vec<StateAction>, StateError> {
        let committee = self.admit_vote(&msg, MsgKind::ImpeachPrepare)?;
        let expected = self.impeach_block()?;
        if msg.hash != expected.hash() {
            return Err(StateError::BlockHashMismatch {
                block: expected.hash(),
                msg: msg.hash,
            });
        }

        let count = self.prepare_sigs.add(msg.hash, msg.signer, vote_sig(&msg));
        debug!(height = msg.height, count, "impeach-prepare recorded");

        if self.state == DporState::ImpeachPreprepared
            && quorum_reached(count, committee.validators.len())
        {
            return self.promote_impeach_prepared(msg.hash, &committee);
        }
        Ok(Vec::new())
    }

    fn on_impeach_commit(&mut self, msg: ConsensusMsg) -> Result<Vec<StateAction>, StateError> {
        let committee = self.admit_vote(&msg, MsgKind::ImpeachCommit)?;
        let expected = self.impeach_block()?;
        if msg.hash != expected.hash() {
            return Err(StateError::BlockHashMismatch {
                block: expected.hash(),
                msg: msg.hash,
            });
        }

        let count = self.commit_sigs.add(msg.hash, msg.signer, vote_sig(&msg));
        debug!(height = msg.height, count, "impeach-commit recorded");

        if self.state == DporState::ImpeachPrepared
            && quorum_reached(count, committee.validators.len())
        {
            return self.finalize_impeachment(&committee);
        }
        Ok(Vec::new())
    }

    fn on_block_relay(&mut self, block: Block) -> Result<Vec<StateAction>, StateError> {
        if block.height() != self.height {
            debug!(height = block.height(), current = self.height, "ignoring stale relay");
            return Ok(Vec::new());
        }
        if matches!(self.state, DporState::Committed | DporState::ImpeachCommitted) {
            return Ok(Vec::new());
        }

        let committee = self.service.committee_at(block.height())?;
        verify_finalized(&block.header, &committee, self.service.config())?;

        info!(height = self.height, hash = %block.hash(), "adopting relayed finalized block");
        self.conclude(block, DporState::Committed, false)
    }

    fn on_timeout(&mut self, height: u64) -> Result<Vec<StateAction>, StateError> {
        if height != self.height {
            return Ok(Vec::new());
        }
        if !matches!(self.state, DporState::Idle | DporState::Preprepared) {
            debug!(state = %self.state, "view timer elapsed outside the impeachable states");
            return Ok(vec![StateAction::ResetTimer]);
        }

        let committee = self.service.committee_at(self.height)?;
        let block = self.impeach_block()?;
        let hash = block.hash();
        warn!(height = self.height, %hash, "view timer expired, entering impeachment");

        self.state = DporState::ImpeachPreprepared;
        let mut actions = vec![StateAction::ResetTimer];

        let me = self.service.signer_address();
        if committee.is_validator(&me) {
            let msg = ConsensusMsg::signed(
                self.service.as_ref(),
                MsgKind::ImpeachPrepare,
                self.height,
                self.view(),
                hash,
            )?;
            let count = self.prepare_sigs.add(hash, me, vote_sig(&msg));
            actions.push(StateAction::Broadcast(PeerMessage::Consensus(msg)));

            if quorum_reached(count, committee.validators.len()) {
                actions.extend(self.promote_impeach_prepared(hash, &committee)?);
            }
        }
        Ok(actions)
    }

    /// Signs and broadcasts our prepare, then re-checks the quorum with
    /// whatever signatures were already buffered.
    fn sign_prepare(
        &mut self,
        hash: H256,
        committee: &Committee,
    ) -> Result<Vec<StateAction>, StateError> {
        // Equivocation guard: read-then-write under the ledger's lock.
        self.ledger.record(self.height, hash)?;

        let msg = ConsensusMsg::signed(
            self.service.as_ref(),
            MsgKind::Prepare,
            self.height,
            self.view(),
            hash,
        )?;
        let count = self.prepare_sigs.add(hash, msg.signer, vote_sig(&msg));
        let mut actions = vec![StateAction::Broadcast(PeerMessage::Consensus(msg))];

        if quorum_reached(count, committee.validators.len()) {
            actions.extend(self.promote_prepared(hash, committee)?);
        }
        Ok(actions)
    }

    /// Prepare quorum reached: move to `Prepared`, contribute our commit
    /// and re-check the commit quorum against buffered signatures.
    fn promote_prepared(
        &mut self,
        hash: H256,
        committee: &Committee,
    ) -> Result<Vec<StateAction>, StateError> {
        info!(height = self.height, %hash, "prepare quorum reached");
        self.state = DporState::Prepared;
        let mut actions = vec![StateAction::ResetTimer];

        let me = self.service.signer_address();
        if committee.is_validator(&me) {
            self.ledger.record(self.height, hash)?;
            let msg = ConsensusMsg::signed(
                self.service.as_ref(),
                MsgKind::Commit,
                self.height,
                self.view(),
                hash,
            )?;
            self.commit_sigs.add(hash, me, vote_sig(&msg));
            actions.push(StateAction::Broadcast(PeerMessage::Consensus(msg)));
        }

        if quorum_reached(self.commit_sigs.count(&hash), committee.validators.len()) {
            actions.extend(self.finalize_pending(committee)?);
        }
        Ok(actions)
    }

    fn promote_impeach_prepared(
        &mut self,
        hash: H256,
        committee: &Committee,
    ) -> Result<Vec<StateAction>, StateError> {
        info!(height = self.height, %hash, "impeach-prepare quorum reached");
        self.state = DporState::ImpeachPrepared;
        let mut actions = vec![StateAction::ResetTimer];

        let me = self.service.signer_address();
        if committee.is_validator(&me) {
            let msg = ConsensusMsg::signed(
                self.service.as_ref(),
                MsgKind::ImpeachCommit,
                self.height,
                self.view(),
                hash,
            )?;
            self.commit_sigs.add(hash, me, vote_sig(&msg));
            actions.push(StateAction::Broadcast(PeerMessage::Consensus(msg)));
        }

        if quorum_reached(self.commit_sigs.count(&hash), committee.validators.len()) {
            actions.extend(self.finalize_impeachment(committee)?);
        }
        Ok(actions)
    }

    /// Commit quorum reached: pack the signatures into the extra field
    /// and finalize.
    fn finalize_pending(
        &mut self,
        committee: &Committee,
    ) -> Result<Vec<StateAction>, StateError> {
        let Some(block) = self.pending.take() else {
            return Ok(Vec::new());
        };
        let block = self.pack_signatures(block, committee);
        info!(height = self.height, hash = %block.hash(),
            signatures = block.header.extra.signature_count(), "commit quorum reached, finalizing");
        self.conclude(block, DporState::Committed, true)
    }

    fn finalize_impeachment(
        &mut self,
        committee: &Committee,
    ) -> Result<Vec<StateAction>, StateError> {
        let block = self.impeach_block()?;
        let block = self.pack_signatures(block, committee);
        info!(height = self.height, hash = %block.hash(), "impeachment quorum reached, finalizing empty block");
        self.conclude(block, DporState::ImpeachCommitted, true)
    }

    /// Common tail of both finalization paths: emit the actions, destroy
    /// the signature sets for the finalized hash and advance.
    fn conclude(
        &mut self,
        block: Block,
        terminal: DporState,
        relay: bool,
    ) -> Result<Vec<StateAction>, StateError> {
        let hash = block.hash();
        self.state = terminal;

        let mut actions = vec![StateAction::Finalize(block.clone())];
        if relay {
            let msg = ConsensusMsg::signed(
                self.service.as_ref(),
                MsgKind::BlockRelay,
                block.height(),
                self.service.config().view_of(block.height()),
                hash,
            )?;
            actions.push(StateAction::Broadcast(PeerMessage::ConsensusWithBlock(
                msg, block,
            )));
        }

        self.prepare_sigs.remove(&hash);
        self.commit_sigs.remove(&hash);

        self.begin_height(self.height + 1);
        actions.push(StateAction::ResetTimer);
        Ok(actions)
    }

    /// Fills the extra validator slots from the commit signatures, in
    /// ascending validator-address order; absent slots stay zero-filled.
    fn pack_signatures(&self, mut block: Block, committee: &Committee) -> Block {
        let n = committee.validators.len();
        block.header.extra.validator_sigs.resize(n, Seal::ZERO);
        if let Some(set) = self.commit_sigs.set_of(&block.hash()) {
            for (i, validator) in committee.validators.iter().enumerate() {
                if let Some(sig) = set.get(validator) {
                    block.header.extra.validator_sigs[i] = Seal::new(sig.to_bytes());
                }
            }
        }
        block
    }

    /// The deterministic empty block replacing an impeached proposer's
    /// slot. Every honest validator derives the identical block.
    fn impeach_block(&mut self) -> Result<Block, StateError> {
        if let Some(block) = &self.impeach_pending {
            if block.height() == self.height {
                return Ok(block.clone());
            }
        }

        let head = self.service.head();
        let config = self.service.config();
        let committee = self.service.committee_at(self.height)?;
        let proposer = committee
            .proposer_of(self.height, config)
            .unwrap_or(Address::ZERO);

        let header = Header::new(
            self.height,
            head.hash(),
            proposer,
            head.timestamp + config.period_ms + config.impeach_timeout_ms,
            committee.validators.len(),
        );
        let block = Block::empty(header);
        self.impeach_pending = Some(block.clone());
        Ok(block)
    }

    /// Shared admissibility checks for all four vote kinds: the signer
    /// must validate at the addressed height, the embedded view must
    /// match the schedule and the signature must verify for the kind.
    fn admit_vote(
        &mut self,
        msg: &ConsensusMsg,
        kind: MsgKind,
    ) -> Result<Committee, StateError> {
        debug_assert_eq!(msg.kind, kind);
        self.check_height(msg)?;
        self.check_view(msg)?;

        let committee = self.service.committee_at(msg.height)?;
        if !committee.is_validator(&msg.signer) {
            return Err(StateError::NotValidator {
                signer: msg.signer,
                height: msg.height,
            });
        }
        if !msg.verify_signature() {
            return Err(StateError::BadSignature {
                kind,
                height: msg.height,
            });
        }
        Ok(committee)
    }

    fn check_height(&self, msg: &ConsensusMsg) -> Result<(), StateError> {
        if msg.height != self.height {
            return Err(StateError::WrongHeight {
                got: msg.height,
                current: self.height,
            });
        }
        Ok(())
    }

    fn check_view(&self, msg: &ConsensusMsg) -> Result<(), StateError> {
        let expected = self.service.config().view_of(msg.height);
        if msg.view != expected {
            return Err(StateError::WrongView {
                got: msg.view,
                expected,
                height: msg.height,
            });
        }
        Ok(())
    }
}

/// Extracts the raw signature carried by a vote.
fn vote_sig(msg: &ConsensusMsg) -> porchain_crypto::Signature {
    porchain_crypto::Signature::from_bytes(msg.sig.as_fixed_bytes())
}

/// Logs a state-machine error at the severity its category demands and
/// reports whether the engine must halt.
pub fn report(err: &StateError, height: u64) -> bool {
    if err.is_fatal() {
        error!(height, error = %err, "fatal consensus error");
        true
    } else {
        warn!(height, error = %err, "dropping inadmissible input");
        false
    }
}
