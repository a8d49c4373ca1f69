//! # Porchain Consensus
//!
//! The DPoR (proof-of-reputation) Byzantine-fault-tolerant consensus
//! engine. A permissioned committee of `N = 3f + 1` validators agrees on
//! blocks proposed by reputation-elected proposers, producing a
//! canonical, totally ordered chain despite up to `f` faulty members.
//!
//! ## Architecture
//!
//! ```text
//!              ┌────────────┐   candidates    ┌───────────────┐
//!              │ RptService │◄────────────────│ CandidateReg. │
//!              └─────┬──────┘                 └───────────────┘
//!          rpt list  │
//!                    ▼
//! ┌──────────────────────────┐ committee  ┌──────────────────┐
//! │      SnapshotEngine      │───────────►│ DporStateMachine │
//! │ (cache + checkpoints)    │            │  (per height)    │
//! └──────────────────────────┘            └───────┬──────────┘
//!                                 actions         │  inputs
//!                                                 ▼
//!                            ┌─────────────────────────────────┐
//!                            │   Handler / Dialer / PeerSet    │
//!                            └─────────────────────────────────┘
//! ```
//!
//! - [`rpt`] scores candidates from on-chain observables over a sliding
//!   window; the top scorers become a term's proposers.
//! - [`snapshot`] tracks per-block committees, persists checkpoints
//!   every `TermLen × ViewLen` blocks and reconstructs on demand.
//! - [`state`] drives each height through the PBFT phases, with an
//!   impeachment path that finalizes a deterministic empty block when a
//!   proposer stays silent past the view timer.
//! - [`backend`] routes typed messages between the state machine and
//!   the committee, including future-term warm-up dialing.
//! - [`engine`] is the facade wiring it all to the node's collaborators.
//!
//! ## Safety
//!
//! - **Agreement**: finalization requires `⌊2N/3⌋ + 1` distinct commit
//!   signatures packed into the header extra field.
//! - **Equivocation prevention**: the signed-blocks ledger refuses to
//!   authorize two different hashes at one height.
//! - **Membership stability**: committees change only at term
//!   boundaries; within a term the proposer schedule is fixed.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod backend;
pub mod clock;
pub mod engine;
pub mod ledger;
pub mod miner;
pub mod rpt;
pub mod sigs;
pub mod snapshot;
pub mod state;
pub mod traits;
pub mod verify;

pub use backend::{ConsensusMsg, Handler, HandlerChannels, MsgKind, PeerMessage, PeerState};
pub use clock::{check_system_clock, ClockDriftError, IGNORE_NTP_CHECK_ENV, MAX_CLOCK_GAP};
pub use engine::{Dpor, EngineError, MiningHandles, PbftStatus};
pub use ledger::{LedgerError, SignedBlocksLedger};
pub use rpt::{Rpt, RptCollector, RptItem, RptList, RptService, MAX_RETRY_GET_RPT, MIN_RPT_SCORE};
pub use sigs::{SignatureCache, SignatureSet, INMEMORY_SIGNATURES};
pub use snapshot::{Committee, DporSnapshot, SnapshotEngine, SnapshotError, INMEMORY_SNAPSHOTS};
pub use state::{
    quorum_reached, DporState, DporStateMachine, StateAction, StateError, StateInput, PCT_A, PCT_B,
};
pub use traits::{
    BackendError, BlockBroadcaster, BlockBuilder, CandidateRegistry, ChainReader, ChainWriter,
    ClockProbe, DporService, LocalSigner, P2pServer, PeerChannel, RptBackend, Signer,
};
pub use verify::{
    verify_finalized, verify_proposal, AlwaysOkVerifier, DelayVerifier, FailAtHeightVerifier,
    RealVerifier, VerifierPolicy, VerifyError,
};
