//! The committee backend: typed messages, peer connections, dialing and
//! the handler routing everything into the state machine.

pub mod dialer;
pub mod handler;
pub mod message;
pub mod peer;

pub use dialer::{Dialer, DIAL_BASE_BACKOFF, DIAL_MAX_BACKOFF, DIAL_MAX_PASSES};
pub use handler::{run_state_machine, Handler, HandlerChannels, HandlerError, STALE_GRACE};
pub use message::{ConsensusMsg, MsgKind, PeerMessage};
pub use peer::{OutboundQueue, Peer, PeerSet, PeerState, OUTBOUND_QUEUE_CAP};
