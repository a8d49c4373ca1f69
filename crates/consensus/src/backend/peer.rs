//! Committee peer connections.
//!
//! Each peer owns a bounded outbound queue drained by a dedicated writer
//! task. When the queue is full the oldest message duplicating a newer
//! one is dropped first; the most recent message is never dropped.

use parking_lot::{Mutex, RwLock};
use porchain_types::Address;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use super::message::PeerMessage;
use crate::traits::PeerChannel;

/// Bound on each peer's outbound queue.
pub const OUTBOUND_QUEUE_CAP: usize = 64;

/// Lifecycle of a committee peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Dial in flight
    Connecting,
    /// Transport established, protocol handshake done
    Handshaked,
    /// Full member of the message flow
    Active,
    /// No longer in the current or next committee; disconnect pending
    Stale,
    /// Connection torn down
    Disconnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaked => "handshaked",
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Bounded outbound queue with duplicate-aware eviction.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<PeerMessage>,
    cap: usize,
}

impl OutboundQueue {
    /// Creates a queue bounded at `cap` messages.
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Enqueues a message. At capacity, an older message with the same
    /// identity is evicted first; failing that, the oldest message goes.
    /// The newly pushed message is always kept.
    pub fn push(&mut self, msg: PeerMessage) {
        if self.queue.len() >= self.cap {
            let id = msg.dedup_id();
            if let Some(pos) = self.queue.iter().position(|m| m.dedup_id() == id) {
                self.queue.remove(pos);
            } else {
                self.queue.pop_front();
            }
        }
        self.queue.push_back(msg);
    }

    /// Dequeues the oldest message.
    pub fn pop(&mut self) -> Option<PeerMessage> {
        self.queue.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// One committee peer.
pub struct Peer {
    /// The peer's committee address.
    pub address: Address,
    /// The term this connection was established for.
    pub term: u64,
    state: Mutex<PeerState>,
    queue: Mutex<OutboundQueue>,
    wakeup: Notify,
    channel: Box<dyn PeerChannel>,
}

impl Peer {
    /// Wraps an established connection.
    pub fn new(address: Address, term: u64, channel: Box<dyn PeerChannel>) -> Arc<Self> {
        Arc::new(Self {
            address,
            term,
            state: Mutex::new(PeerState::Handshaked),
            queue: Mutex::new(OutboundQueue::new(OUTBOUND_QUEUE_CAP)),
            wakeup: Notify::new(),
            channel,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Moves the peer to a new lifecycle state.
    pub fn set_state(&self, state: PeerState) {
        let mut current = self.state.lock();
        debug!(peer = %self.address, from = %current, to = %state, "peer state change");
        *current = state;
    }

    /// Whether the peer participates in the message flow.
    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    /// Queues a message for delivery and wakes the writer.
    pub fn enqueue(&self, msg: PeerMessage) {
        self.queue.lock().push(msg);
        self.wakeup.notify_one();
    }

    /// The writer task: drains the queue in order, one peer at a time,
    /// until shutdown or a transport failure.
    pub async fn run_writer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = self.queue.lock().pop();
            match next {
                Some(msg) => {
                    if let Err(err) = self.channel.send(msg.encode()).await {
                        warn!(peer = %self.address, error = %err, "peer write failed, disconnecting");
                        self.set_state(PeerState::Disconnected);
                        return;
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
        }
    }
}

/// The shared set of live committee peers.
#[derive(Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<Address, Arc<Peer>>>,
}

impl PeerSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer, replacing any prior connection to the same
    /// address.
    pub fn insert(&self, peer: Arc<Peer>) {
        self.peers.write().insert(peer.address, peer);
    }

    /// The peer at `addr`, if connected.
    pub fn get(&self, addr: &Address) -> Option<Arc<Peer>> {
        self.peers.read().get(addr).cloned()
    }

    /// Removes and returns the peer at `addr`.
    pub fn remove(&self, addr: &Address) -> Option<Arc<Peer>> {
        self.peers.write().remove(addr)
    }

    /// Whether an active connection to `addr` exists.
    pub fn is_connected(&self, addr: &Address) -> bool {
        self.get(addr).map(|p| p.is_active()).unwrap_or(false)
    }

    /// Number of active peers among `committee`.
    pub fn active_count_in(&self, committee: &[Address]) -> usize {
        let peers = self.peers.read();
        committee
            .iter()
            .filter(|addr| peers.get(addr).map(|p| p.is_active()).unwrap_or(false))
            .count()
    }

    /// All currently active peers.
    pub fn active_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect()
    }

    /// Marks every peer outside `keep` as stale; returns the stale
    /// addresses so the caller can schedule their disconnect.
    pub fn mark_stale_outside(&self, keep: &[Address]) -> Vec<Address> {
        let peers = self.peers.read();
        let mut stale = Vec::new();
        for (addr, peer) in peers.iter() {
            if !keep.contains(addr) && peer.is_active() {
                peer.set_state(PeerState::Stale);
                stale.push(*addr);
            }
        }
        stale
    }

    /// Disconnects a peer if it is still stale (the grace period may
    /// have been cut short by a committee change re-activating it).
    pub fn disconnect_if_stale(&self, addr: &Address) {
        if let Some(peer) = self.get(addr) {
            if peer.state() == PeerState::Stale {
                peer.set_state(PeerState::Disconnected);
                self.remove(addr);
            }
        }
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
