//! Transport-independent message routing between committee members and
//! the state machine.
//!
//! The handler owns the peer set and the two queues feeding the state
//! machine: the single-producer single-consumer pending-block channel
//! written by the mining loop, and the inbound message queue written by
//! per-peer read paths. The state machine task is the only consumer of
//! both, so its hot state never needs a lock.

use lru::LruCache;
use parking_lot::Mutex;
use porchain_types::{Block, H256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::dialer::Dialer;
use super::message::{MsgKind, PeerMessage};
use super::peer::PeerSet;
use crate::state::{report, DporState, DporStateMachine, StateAction, StateInput};
use crate::traits::{DporService, P2pServer};

/// Capacity of the miner → state machine pending-block channel.
pub const PENDING_BLOCK_QUEUE: usize = 8;

/// Capacity of the serialized inbound message queue.
pub const INBOX_QUEUE: usize = 256;

/// Bound on the known-blocks de-duplication set.
pub const KNOWN_BLOCKS: usize = 256;

/// Grace period before a stale peer is disconnected.
pub const STALE_GRACE: Duration = Duration::from_secs(30);

/// Errors surfaced by the handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The pending-block channel is full or closed
    #[error("pending block queue unavailable")]
    PendingQueue,

    /// The inbound queue is closed
    #[error("inbound queue closed")]
    InboxClosed,

    /// A wire payload failed to decode
    #[error("malformed message from {peer}: {reason}")]
    Malformed {
        /// Sending peer
        peer: porchain_types::Address,
        /// Decoder failure
        reason: String,
    },
}

/// Receiver halves of the handler's queues, consumed by the state
/// machine task.
pub struct HandlerChannels {
    /// Locally mined pending blocks
    pub pending_rx: mpsc::Receiver<Block>,
    /// Serialized inbound consensus inputs
    pub inbox_rx: mpsc::Receiver<StateInput>,
}

/// Routes messages between remote committee members and the state
/// machine, and keeps committee connectivity warm.
pub struct Handler {
    service: Arc<dyn DporService>,
    peers: Arc<PeerSet>,
    dialer: Dialer,
    known_blocks: Mutex<LruCache<H256, ()>>,
    pending_tx: mpsc::Sender<Block>,
    inbox_tx: mpsc::Sender<StateInput>,
}

impl Handler {
    /// Creates a handler and the channel halves for its state machine.
    pub fn new(
        service: Arc<dyn DporService>,
        server: Arc<dyn P2pServer>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, HandlerChannels) {
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_BLOCK_QUEUE);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_QUEUE);
        let peers = Arc::new(PeerSet::new());
        let dialer = Dialer::new(server, Arc::clone(&peers), shutdown);

        let handler = Arc::new(Self {
            service,
            peers,
            dialer,
            known_blocks: Mutex::new(LruCache::new(
                NonZeroUsize::new(KNOWN_BLOCKS).unwrap_or(NonZeroUsize::MIN),
            )),
            pending_tx,
            inbox_tx,
        });
        (
            handler,
            HandlerChannels {
                pending_rx,
                inbox_rx,
            },
        )
    }

    /// Accepts a locally proposed block from the miner, recording it in
    /// the known-blocks set and queueing it for the state machine.
    pub fn receive_mined_pending_block(&self, block: Block) -> Result<(), HandlerError> {
        let hash = block.hash();
        self.pending_tx
            .try_send(block)
            .map_err(|_| HandlerError::PendingQueue)?;
        self.known_blocks.lock().put(hash, ());
        debug!(%hash, "queued locally mined pending block");
        Ok(())
    }

    /// Whether a block hash has passed through this node already.
    pub fn knows_block(&self, hash: &H256) -> bool {
        self.known_blocks.lock().contains(hash)
    }

    /// Sets the target address set for future-term dialing.
    pub fn update_remote_validators(&self, term: u64, validators: Vec<porchain_types::Address>) {
        self.dialer.update_remote_validators(term, validators);
    }

    /// Dials the registered members of `term`; returns the live
    /// connection count.
    pub async fn dial_all_remote_validators(&self, term: u64) -> usize {
        self.dialer.dial_all_remote_validators(term).await
    }

    /// Whether enough (`2f + 1`) members of term `term` are connected
    /// for the local node to advance into it.
    pub fn ready_next_term(&self, term: u64) -> bool {
        let needed = 2 * self.service.config().faulty_number as usize + 1;
        self.dialer.ready(term, needed)
    }

    /// Demultiplexes one wire payload from `peer` into the state
    /// machine's queue.
    pub async fn handle(
        &self,
        peer: porchain_types::Address,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let envelope = PeerMessage::decode(payload).map_err(|e| HandlerError::Malformed {
            peer,
            reason: e.to_string(),
        })?;

        let input = match envelope {
            PeerMessage::Consensus(msg) => match msg.kind {
                MsgKind::Prepare => StateInput::Prepare(msg),
                MsgKind::Commit => StateInput::Commit(msg),
                MsgKind::ImpeachPrepare => StateInput::ImpeachPrepare(msg),
                MsgKind::ImpeachCommit => StateInput::ImpeachCommit(msg),
                other => {
                    return Err(HandlerError::Malformed {
                        peer,
                        reason: format!("{} without block body", other),
                    })
                }
            },
            PeerMessage::ConsensusWithBlock(msg, block) => {
                self.known_blocks.lock().put(block.hash(), ());
                match msg.kind {
                    MsgKind::Preprepare => StateInput::Preprepare(msg, block),
                    MsgKind::BlockRelay => StateInput::BlockRelay(block),
                    other => {
                        return Err(HandlerError::Malformed {
                            peer,
                            reason: format!("unexpected block body on {}", other),
                        })
                    }
                }
            }
        };

        self.inbox_tx
            .send(input)
            .await
            .map_err(|_| HandlerError::InboxClosed)
    }

    /// Queues a message to every active committee peer.
    pub fn broadcast(&self, msg: &PeerMessage) {
        for peer in self.peers.active_peers() {
            peer.enqueue(msg.clone());
        }
    }

    /// Marks peers outside the current and next committee as stale and
    /// schedules their disconnect after the grace period.
    pub fn retire_stale_peers(self: &Arc<Self>, keep: Vec<porchain_types::Address>) {
        let stale = self.peers.mark_stale_outside(&keep);
        if stale.is_empty() {
            return;
        }
        info!(count = stale.len(), "scheduling stale peer disconnects");
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(STALE_GRACE).await;
            for addr in stale {
                handler.peers.disconnect_if_stale(&addr);
            }
        });
    }

    /// The shared peer set.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }
}

/// Runs the state machine task: the single consumer of the pending and
/// inbound queues and the owner of the view timer.
///
/// All blocking points are explicit awaits; nothing inside a dispatch
/// blocks on I/O. The task exits on shutdown, on a closed input, or on
/// a fatal consensus error.
pub async fn run_state_machine(
    mut machine: DporStateMachine,
    mut channels: HandlerChannels,
    handler: Arc<Handler>,
    mut shutdown: watch::Receiver<bool>,
    state_tx: watch::Sender<(u64, DporState)>,
) {
    let view_timeout = handler.service.config().impeach_timeout();
    let timer = tokio::time::sleep(view_timeout);
    tokio::pin!(timer);

    info!(height = machine.height(), "state machine task started");
    loop {
        let input = tokio::select! {
            _ = shutdown.changed() => break,
            maybe = channels.pending_rx.recv() => match maybe {
                Some(block) => StateInput::MinedBlock(block),
                None => break,
            },
            maybe = channels.inbox_rx.recv() => match maybe {
                Some(input) => input,
                None => break,
            },
            _ = &mut timer => {
                // Re-arm immediately; a transition will re-arm again.
                timer
                    .as_mut()
                    .reset(tokio::time::Instant::now() + view_timeout);
                StateInput::ViewTimeout { height: machine.height() }
            }
        };

        match machine.apply(input) {
            Ok(actions) => {
                for action in actions {
                    match action {
                        StateAction::Broadcast(msg) => handler.broadcast(&msg),
                        StateAction::Finalize(block) => {
                            if let Err(err) = handler.service.finalize(block) {
                                error!(error = %err, "block finalization failed, halting");
                                return;
                            }
                        }
                        StateAction::ResetTimer => {
                            timer
                                .as_mut()
                                .reset(tokio::time::Instant::now() + view_timeout);
                        }
                    }
                }
            }
            Err(err) => {
                if report(&err, machine.height()) {
                    return;
                }
            }
        }

        let _ = state_tx.send((machine.height(), machine.state()));
    }
    warn!("state machine task stopped");
}
