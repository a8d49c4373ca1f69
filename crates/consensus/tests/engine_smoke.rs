//! End-to-end engine smoke test: a single-node committee (f = 0) mines,
//! finalizes and extends its chain through the full task wiring.

use async_trait::async_trait;
use parking_lot::RwLock;
use porchain_config::DporConfig;
use porchain_consensus::engine::Dpor;
use porchain_consensus::traits::{
    BackendError, BlockBroadcaster, BlockBuilder, CandidateRegistry, ChainReader, ChainWriter,
    ClockProbe, LocalSigner, P2pServer, PeerChannel, RptBackend, Signer,
};
use porchain_consensus::verify::RealVerifier;
use porchain_storage::MemoryStore;
use porchain_types::{Address, Block, Header, Transaction, H256};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

struct MemChain {
    headers: RwLock<Vec<Header>>,
}

impl MemChain {
    fn new(n_validators: usize) -> Self {
        Self {
            headers: RwLock::new(vec![Header::new(0, H256::NIL, Address::ZERO, 0, n_validators)]),
        }
    }
}

impl ChainReader for MemChain {
    fn current_header(&self) -> Header {
        self.headers.read().last().cloned().expect("genesis present")
    }
    fn header_by_hash(&self, hash: H256) -> Option<Header> {
        self.headers.read().iter().find(|h| h.hash() == hash).cloned()
    }
    fn header_by_number(&self, number: u64) -> Option<Header> {
        self.headers.read().get(number as usize).cloned()
    }
}

impl ChainWriter for MemChain {
    fn insert_block(&self, block: Block) -> Result<(), BackendError> {
        let mut headers = self.headers.write();
        if block.height() != headers.len() as u64 {
            return Err(BackendError::new(format!(
                "non-contiguous insert at {}",
                block.height()
            )));
        }
        headers.push(block.header);
        Ok(())
    }
}

struct SimpleBuilder {
    chain: Arc<MemChain>,
    coinbase: Address,
    n_validators: usize,
}

#[async_trait]
impl BlockBuilder for SimpleBuilder {
    async fn pending_transactions(&self) -> Vec<Transaction> {
        Vec::new()
    }

    async fn seal(&self, parent: &Header, txs: Vec<Transaction>) -> Result<Block, BackendError> {
        let head = self.chain.current_header();
        if head.hash() != parent.hash() {
            return Err(BackendError::new("parent is no longer the chain head"));
        }
        let header = Header::new(
            parent.height + 1,
            parent.hash(),
            self.coinbase,
            parent.timestamp + 1,
            self.n_validators,
        );
        Ok(Block::new(header, txs))
    }
}

struct LoopbackChannel;

#[async_trait]
impl PeerChannel for LoopbackChannel {
    async fn send(&self, _payload: Vec<u8>) -> Result<(), BackendError> {
        Ok(())
    }
}

struct LoopbackServer;

#[async_trait]
impl P2pServer for LoopbackServer {
    async fn dial(&self, _addr: Address) -> Result<Box<dyn PeerChannel>, BackendError> {
        Ok(Box::new(LoopbackChannel))
    }
}

struct SilentBroadcaster;

impl BlockBroadcaster for SilentBroadcaster {
    fn broadcast_block(&self, _block: &Block, _propagate: bool) {}
}

struct FlatBackend;

impl RptBackend for FlatBackend {
    fn get_rpt(&self, _: Address, _: u64) -> Result<i64, BackendError> {
        Ok(50)
    }
    fn window(&self) -> Result<u64, BackendError> {
        Ok(2)
    }
    fn balance_of(&self, _: Address, _: u64) -> Result<u128, BackendError> {
        Ok(1)
    }
    fn tx_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
        Ok(0)
    }
    fn uptime_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
        Ok(100)
    }
    fn upload_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
        Ok(0)
    }
    fn proxy_count_of(&self, _: Address, _: u64) -> Result<u64, BackendError> {
        Ok(0)
    }
}

struct SoloRegistry {
    coinbase: Address,
}

impl CandidateRegistry for SoloRegistry {
    fn candidates_of(&self, _term: u64) -> Result<Vec<Address>, BackendError> {
        Ok(vec![self.coinbase])
    }
}

struct NowProbe;

impl ClockProbe for NowProbe {
    fn network_time(&self) -> Result<SystemTime, BackendError> {
        Ok(SystemTime::now())
    }
}

fn solo_config(coinbase: Address) -> DporConfig {
    let mut config = DporConfig::dev();
    config.period_ms = 25;
    config.impeach_timeout_ms = 2_000;
    config.term_len = 1;
    config.view_len = 3;
    config.faulty_number = 0;
    config.candidates = vec![coinbase];
    config.proposers = vec![coinbase];
    config.validators = vec![coinbase];
    config.max_init_block_number = u64::MAX;
    config.validated().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn solo_committee_extends_the_chain() {
    let signer = Arc::new(LocalSigner::random());
    let coinbase = signer.address();
    let config = solo_config(coinbase);

    let chain = Arc::new(MemChain::new(1));
    let builder = Arc::new(SimpleBuilder {
        chain: Arc::clone(&chain),
        coinbase,
        n_validators: 1,
    });

    let engine = Arc::new(Dpor::new(
        config,
        Arc::new(MemoryStore::new()),
        signer,
        Arc::new(FlatBackend),
        Arc::new(SoloRegistry { coinbase }),
        Arc::new(RealVerifier),
    ));

    let handles = engine
        .start_mining(
            Arc::clone(&chain) as Arc<dyn ChainReader>,
            Arc::clone(&chain) as Arc<dyn ChainWriter>,
            Arc::new(LoopbackServer),
            builder,
            Arc::new(SilentBroadcaster),
            &NowProbe,
        )
        .unwrap();
    engine.set_as_miner(true);

    // Wait for the chain to grow by a few finalized blocks.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if chain.current_header().height >= 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "chain failed to grow: stuck at height {}",
            chain.current_header().height
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Every finalized block is quorum-signed by the solo validator.
    for number in 1..=3 {
        let header = chain.header_by_number(number).unwrap();
        assert_eq!(header.proposer, coinbase);
        assert_eq!(header.extra.validator_sigs.len(), 1);
        assert_eq!(header.extra.signature_count(), 1);
        assert!(!header.extra.seal.is_zero());
        assert_eq!(
            header.parent_hash,
            chain.header_by_number(number - 1).unwrap().hash()
        );
    }

    engine.stop_mining();
    handles.join_with_deadline(Duration::from_secs(2)).await;

    // The engine reports its resting position above the finalized tip.
    let status = engine.pbft_status();
    assert!(status.head.height >= 3);
}
