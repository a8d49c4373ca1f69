//! The mining loop.
//!
//! When the local node is the scheduled proposer of the upcoming height,
//! the loop requests a sealed candidate block from the external block
//! builder and feeds it into the state machine's pending channel; the
//! state machine then drives it to finalization, a view timeout or
//! impeachment. At term boundaries the loop waits for the handler's
//! next-term readiness predicate before proposing into a committee it
//! is not yet connected to.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::Handler;
use crate::engine::Dpor;
use crate::traits::{BlockBuilder, ChainReader, DporService};

/// Polls the clock once per block period and proposes when scheduled.
pub async fn run_mining_loop(
    engine: Arc<Dpor>,
    chain: Arc<dyn ChainReader>,
    builder: Arc<dyn BlockBuilder>,
    handler: Arc<Handler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(engine.config().period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_proposed: Option<u64> = None;

    info!("mining loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        if !engine.is_miner() {
            continue;
        }

        let head = chain.current_header();
        let next = head.height + 1;
        if last_proposed == Some(next) {
            continue;
        }

        let committee = match engine.committee_at(next) {
            Ok(committee) => committee,
            Err(err) => {
                warn!(height = next, error = %err, "cannot resolve committee, skipping view");
                continue;
            }
        };
        if committee.proposer_of(next, engine.config()) != Some(engine.coinbase()) {
            continue;
        }

        if engine.config().is_term_start(next) && !handler.ready_next_term(committee.term) {
            debug!(term = committee.term, "waiting for next-term connectivity before proposing");
            continue;
        }

        let txs = builder.pending_transactions().await;
        match builder.seal(&head, txs).await {
            Ok(block) => {
                if block.height() != next {
                    warn!(got = block.height(), expected = next, "builder sealed a stale block");
                    continue;
                }
                info!(height = next, txs = block.transactions.len(), "proposing sealed block");
                match handler.receive_mined_pending_block(block) {
                    Ok(()) => last_proposed = Some(next),
                    Err(err) => warn!(height = next, error = %err, "pending channel rejected block"),
                }
            }
            Err(err) => warn!(height = next, error = %err, "block builder failed"),
        }
    }
    info!("mining loop stopped");
}
