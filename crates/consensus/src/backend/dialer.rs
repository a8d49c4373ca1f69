//! Outbound dialing of current and future committee members.
//!
//! When the local node will be a proposer or validator in the next term
//! it warms up connections ahead of the transition height. Dialing
//! round-robins across the committee, one attempt per member per pass,
//! with capped exponential backoff between passes: 500 ms doubling to a
//! cap of 8 s, five passes, ±20% jitter. Success is idempotent; an
//! already-connected member is skipped.

use parking_lot::RwLock;
use porchain_types::Address;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::peer::{Peer, PeerSet, PeerState};
use crate::traits::P2pServer;

/// First inter-pass backoff.
pub const DIAL_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Backoff cap.
pub const DIAL_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Number of round-robin passes before giving up.
pub const DIAL_MAX_PASSES: usize = 5;

/// Jitter applied to each backoff, as a fraction.
const DIAL_JITTER: f64 = 0.2;

/// Establishes and tracks outbound committee connections.
pub struct Dialer {
    server: Arc<dyn P2pServer>,
    peers: Arc<PeerSet>,
    remote_validators: RwLock<HashMap<u64, Vec<Address>>>,
    shutdown: watch::Receiver<bool>,
}

impl Dialer {
    /// Creates a dialer over the transport and the shared peer set.
    pub fn new(
        server: Arc<dyn P2pServer>,
        peers: Arc<PeerSet>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            server,
            peers,
            remote_validators: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Sets the target address set for a term's dialing.
    pub fn update_remote_validators(&self, term: u64, validators: Vec<Address>) {
        debug!(term, count = validators.len(), "updating remote validator set");
        self.remote_validators.write().insert(term, validators);
    }

    /// The target address set registered for `term`.
    pub fn remote_validators_of(&self, term: u64) -> Vec<Address> {
        self.remote_validators
            .read()
            .get(&term)
            .cloned()
            .unwrap_or_default()
    }

    /// Dials every registered validator of `term` that is not already
    /// connected. Returns the number of live connections to the term's
    /// set afterwards.
    pub async fn dial_all_remote_validators(&self, term: u64) -> usize {
        let targets = self.remote_validators_of(term);
        if targets.is_empty() {
            return 0;
        }

        let mut backoff = DIAL_BASE_BACKOFF;
        let mut shutdown = self.shutdown.clone();

        for pass in 0..DIAL_MAX_PASSES {
            let pending: Vec<Address> = targets
                .iter()
                .copied()
                .filter(|addr| !self.peers.is_connected(addr))
                .collect();
            if pending.is_empty() {
                break;
            }

            debug!(term, pass, pending = pending.len(), "dialing committee members");
            for addr in pending {
                if *shutdown.borrow() {
                    return self.peers.active_count_in(&targets);
                }
                match self.server.dial(addr).await {
                    Ok(channel) => {
                        let peer = Peer::new(addr, term, channel);
                        peer.set_state(PeerState::Active);
                        tokio::spawn(
                            Arc::clone(&peer).run_writer(self.shutdown.clone()),
                        );
                        self.peers.insert(peer);
                        info!(term, peer = %addr, "connected to committee member");
                    }
                    Err(err) => {
                        warn!(term, peer = %addr, error = %err, "dial failed, will retry");
                    }
                }
            }

            let remaining = targets
                .iter()
                .any(|addr| !self.peers.is_connected(addr));
            if !remaining || pass + 1 == DIAL_MAX_PASSES {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(jittered(backoff)) => {}
                _ = shutdown.changed() => return self.peers.active_count_in(&targets),
            }
            backoff = (backoff * 2).min(DIAL_MAX_BACKOFF);
        }

        self.peers.active_count_in(&targets)
    }

    /// Whether at least `needed` members of `term`'s set are connected.
    pub fn ready(&self, term: u64, needed: usize) -> bool {
        let targets = self.remote_validators_of(term);
        self.peers.active_count_in(&targets) >= needed
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-DIAL_JITTER..DIAL_JITTER);
    base.mul_f64(factor)
}
