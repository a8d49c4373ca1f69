//! The DPoR engine facade.
//!
//! [`Dpor`] owns three disjoint domains: the immutable configuration,
//! the read-mostly shared caches (snapshots, signature sets, the
//! signed-blocks ledger) and the wiring towards its collaborators. The
//! hot consensus state lives exclusively inside the state machine task
//! and is reached only through its inbound queue; the handler sees the
//! engine through the narrow [`DporService`] capability interface, so
//! no reference cycle forms.

use parking_lot::RwLock;
use porchain_config::DporConfig;
use porchain_crypto::Signature;
use porchain_storage::KvStore;
use porchain_types::{Address, Block, Header, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{run_state_machine, Handler};
use crate::clock::{check_system_clock, ClockDriftError};
use crate::ledger::SignedBlocksLedger;
use crate::miner::run_mining_loop;
use crate::rpt::RptService;
use crate::sigs::SignatureCache;
use crate::snapshot::{Committee, SnapshotEngine, SnapshotError};
use crate::state::{DporState, DporStateMachine};
use crate::traits::{
    BackendError, BlockBroadcaster, BlockBuilder, CandidateRegistry, ChainReader, ChainWriter,
    ClockProbe, DporService, P2pServer, RptBackend, Signer,
};
use crate::verify::{verify_proposal, VerifierPolicy, VerifyError};

/// Errors surfaced by the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The system clock failed the boot-time sanity check
    #[error(transparent)]
    Clock(#[from] ClockDriftError),

    /// Snapshot derivation failed
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Header verification rejected a block
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// An external collaborator failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An operation requires `start_mining` to have run
    #[error("mining has not been started")]
    NotStarted,
}

/// A snapshot of the engine's consensus position.
#[derive(Debug, Clone)]
pub struct PbftStatus {
    /// Height the state machine is working on
    pub height: u64,
    /// Current automaton state
    pub state: DporState,
    /// Current chain head
    pub head: Header,
}

/// Handles to the background tasks spawned by `start_mining`.
pub struct MiningHandles {
    /// The message handler, for the transport layer to feed
    pub handler: Arc<Handler>,
    tasks: Vec<JoinHandle<()>>,
}

impl MiningHandles {
    /// Waits for the tasks to observe shutdown, aborting any that
    /// out-live the deadline.
    pub async fn join_with_deadline(self, deadline: Duration) {
        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(deadline, task).await.is_err() {
                warn!("background task exceeded shutdown deadline, aborting");
                abort.abort();
            }
        }
    }
}

/// The proof-of-reputation consensus engine.
pub struct Dpor {
    config: DporConfig,
    signer: Arc<dyn Signer>,
    snapshots: Arc<SnapshotEngine>,
    rpt: Arc<RptService>,
    prepare_sigs: Arc<SignatureCache>,
    commit_sigs: Arc<SignatureCache>,
    ledger: Arc<SignedBlocksLedger>,
    verifier: Arc<dyn VerifierPolicy>,

    chain: RwLock<Option<Arc<dyn ChainReader>>>,
    chain_writer: RwLock<Option<Arc<dyn ChainWriter>>>,
    broadcaster: RwLock<Option<Arc<dyn BlockBroadcaster>>>,
    handler: RwLock<Option<Arc<Handler>>>,

    is_miner: RwLock<bool>,
    shutdown: watch::Sender<bool>,
    sm_state: watch::Sender<(u64, DporState)>,
}

impl Dpor {
    /// Creates an engine over a validated configuration and its
    /// collaborators.
    pub fn new(
        config: DporConfig,
        store: Arc<dyn KvStore>,
        signer: Arc<dyn Signer>,
        rpt_backend: Arc<dyn RptBackend>,
        registry: Arc<dyn CandidateRegistry>,
        verifier: Arc<dyn VerifierPolicy>,
    ) -> Self {
        let rpt = Arc::new(RptService::new(
            rpt_backend,
            config.rpt_calc_method2_block,
            config.rpt_calc_method3_block,
        ));
        let snapshots = Arc::new(SnapshotEngine::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&rpt),
            registry,
        ));
        let (shutdown, _) = watch::channel(false);
        let (sm_state, _) = watch::channel((0u64, DporState::Idle));

        Self {
            config,
            signer,
            snapshots,
            rpt,
            prepare_sigs: Arc::new(SignatureCache::new()),
            commit_sigs: Arc::new(SignatureCache::new()),
            ledger: Arc::new(SignedBlocksLedger::new(store)),
            verifier,
            chain: RwLock::new(None),
            chain_writer: RwLock::new(None),
            broadcaster: RwLock::new(None),
            handler: RwLock::new(None),
            is_miner: RwLock::new(false),
            shutdown,
            sm_state,
        }
    }

    /// Whether the node currently mines. Guarded by its own lock so it
    /// can be toggled without touching consensus state.
    pub fn is_miner(&self) -> bool {
        *self.is_miner.read()
    }

    /// Toggles mining.
    pub fn set_as_miner(&self, mining: bool) {
        *self.is_miner.write() = mining;
    }

    /// The local signer's address.
    pub fn coinbase(&self) -> Address {
        self.signer.address()
    }

    /// Whether the local signer already signed a block at this header's
    /// height.
    pub fn if_signed(&self, header: &Header) -> bool {
        self.ledger.if_signed(header.height)
    }

    /// The configured view timer duration.
    pub fn impeach_timeout(&self) -> Duration {
        self.config.impeach_timeout()
    }

    /// The reputation service, for callers ranking candidates.
    pub fn rpt_service(&self) -> &Arc<RptService> {
        &self.rpt
    }

    /// The engine's consensus position.
    pub fn pbft_status(&self) -> PbftStatus {
        let (height, state) = *self.sm_state.subscribe().borrow();
        PbftStatus {
            height,
            state,
            head: self.head(),
        }
    }

    /// Verifies a proposed header against its committee, dispatching
    /// through the injected verifier policy, and enforces the
    /// recent-signer allowance from the parent snapshot.
    pub fn verify_header(&self, header: &Header) -> Result<(), EngineError> {
        let committee = self.committee_at(header.height)?;
        self.verifier
            .verify_header(header, &committee, &self.config)?;

        if header.height > 0 {
            if let Some(chain) = self.chain.read().clone() {
                let parent = self
                    .snapshots
                    .snapshot_by_number(chain.as_ref(), header.height - 1)?;
                crate::verify::check_recent_signers(
                    header,
                    parent.signed_count_of(&header.proposer),
                    &self.config,
                )?;
            }
        }
        Ok(())
    }

    /// Verifies a batch of headers, returning one result per header.
    pub fn verify_headers(&self, headers: &[Header]) -> Vec<Result<(), EngineError>> {
        headers.iter().map(|h| self.verify_header(h)).collect()
    }

    /// Forwards a locally mined block into the pending channel.
    pub fn handle_mined_block(&self, block: Block) -> Result<(), EngineError> {
        let handler = self.handler.read().clone().ok_or(EngineError::NotStarted)?;
        handler
            .receive_mined_pending_block(block)
            .map_err(|e| EngineError::Backend(BackendError::new(e)))
    }

    /// Wires the collaborators, warms the snapshot cache and spawns the
    /// state machine, mining and warm-up tasks.
    pub fn start_mining(
        self: &Arc<Self>,
        chain: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        server: Arc<dyn P2pServer>,
        builder: Arc<dyn BlockBuilder>,
        broadcaster: Arc<dyn BlockBroadcaster>,
        probe: &dyn ClockProbe,
    ) -> Result<MiningHandles, EngineError> {
        check_system_clock(probe)?;

        *self.chain.write() = Some(Arc::clone(&chain));
        *self.chain_writer.write() = Some(writer);
        *self.broadcaster.write() = Some(broadcaster);

        let head = chain.current_header();
        self.snapshots.snapshot(chain.as_ref(), head.height, head.hash())?;
        info!(height = head.height, "consensus engine starting at chain head");

        let service: Arc<dyn DporService> = Arc::clone(self) as Arc<dyn DporService>;
        let (handler, channels) =
            Handler::new(Arc::clone(&service), server, self.shutdown.subscribe());
        *self.handler.write() = Some(Arc::clone(&handler));

        let machine = DporStateMachine::new(
            service,
            Arc::clone(&self.verifier),
            Arc::clone(&self.prepare_sigs),
            Arc::clone(&self.commit_sigs),
            Arc::clone(&self.ledger),
        );

        let sm_task = tokio::spawn(run_state_machine(
            machine,
            channels,
            Arc::clone(&handler),
            self.shutdown.subscribe(),
            self.sm_state.clone(),
        ));
        let miner_task = tokio::spawn(run_mining_loop(
            Arc::clone(self),
            Arc::clone(&chain),
            builder,
            Arc::clone(&handler),
            self.shutdown.subscribe(),
        ));
        let warmup_task = tokio::spawn(run_committee_warmup(
            Arc::clone(self),
            chain,
            Arc::clone(&handler),
            self.shutdown.subscribe(),
        ));

        Ok(MiningHandles {
            handler,
            tasks: vec![sm_task, miner_task, warmup_task],
        })
    }

    /// Signals every background task to stop. In-flight verification
    /// completes but its result is discarded by the exiting tasks.
    pub fn stop_mining(&self) {
        info!("stopping consensus engine");
        let _ = self.shutdown.send(true);
    }
}

impl DporService for Dpor {
    fn config(&self) -> &DporConfig {
        &self.config
    }

    fn head(&self) -> Header {
        match self.chain.read().as_ref() {
            Some(chain) => chain.current_header(),
            None => Header::new(0, H256::NIL, Address::ZERO, 0, self.config.validators.len()),
        }
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn sign_digest(&self, digest: H256) -> Result<Signature, BackendError> {
        self.signer.sign(digest)
    }

    fn committee_at(&self, height: u64) -> Result<Committee, SnapshotError> {
        let chain = self.chain.read().clone();
        let chain = chain.ok_or(SnapshotError::UnknownAncestor {
            number: height,
            hash: H256::NIL,
        })?;
        self.snapshots.committee_at(chain.as_ref(), height)
    }

    fn finalize(&self, block: Block) -> Result<(), BackendError> {
        let writer = self
            .chain_writer
            .read()
            .clone()
            .ok_or_else(|| BackendError::new("chain writer not wired"))?;
        writer.insert_block(block.clone())?;

        if let Some(broadcaster) = self.broadcaster.read().clone() {
            broadcaster.broadcast_block(&block, true);
        }

        // Signed markers below a finalized checkpoint can never be
        // needed again.
        if self.config.is_checkpoint(block.height()) {
            if let Err(err) = self.ledger.prune_below(block.height()) {
                warn!(error = %err, "signed-blocks ledger prune failed");
            }
        }

        debug!(height = block.height(), hash = %block.hash(), "block finalized");
        Ok(())
    }
}

/// Keeps committee connectivity warm around term boundaries.
///
/// Once the chain head reaches the last block of term `T`, the committee
/// of `T + 1` is known; if the local node proposes or validates in it,
/// its validators are registered and dialed before the transition
/// height.
async fn run_committee_warmup(
    engine: Arc<Dpor>,
    chain: Arc<dyn ChainReader>,
    handler: Arc<Handler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = engine.config.period();
    let mut last_dialed_term: Option<u64> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(period) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let head = chain.current_header();
        let upcoming = head.height + 1;
        let committee = match engine.committee_at(upcoming) {
            Ok(committee) => committee,
            Err(err) => {
                debug!(error = %err, "committee warm-up skipped");
                continue;
            }
        };
        if last_dialed_term == Some(committee.term) {
            continue;
        }

        let me = engine.coinbase();
        let member =
            committee.is_validator(&me) || committee.proposers.contains(&me);
        if !member {
            last_dialed_term = Some(committee.term);
            continue;
        }

        info!(term = committee.term, "warming up committee connections");
        handler.update_remote_validators(committee.term, committee.validators.clone());
        handler.dial_all_remote_validators(committee.term).await;

        let mut keep = committee.validators.clone();
        keep.extend_from_slice(&committee.proposers);
        handler.retire_stale_peers(keep);

        last_dialed_term = Some(committee.term);
    }
}

/// Standalone proposal verification for callers that hold a committee
/// already.
pub fn verify_sealed_header(
    header: &Header,
    committee: &Committee,
    config: &DporConfig,
) -> Result<(), VerifyError> {
    verify_proposal(header, committee, config)
}
