//! Controller behavior over a scripted chain: head advance, reorg
//! convergence, idleness

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_common::{
    Address, BlockHash, CycleBundle, CycleIndex, HeaderInfo, Level, ProtocolConstants,
    ProtocolHash, UnpackedBlock, UnpackedContent, UnpackedGroup, ValidationPass, VoterListing,
    OpHash,
};
use tessera_module_chain_rpc::{ChainSource, DisabledQuoteFeed, RpcError};
use tessera_module_protocol_engine::ProtocolEngine;
use tessera_module_state_store::Store;
use tessera_module_sync::{ChainEvent, SyncConfig, SyncController, Tick};
use tokio::sync::watch;

const CARTHAGE: &str = "PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb";
const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BLOCK_BASE: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45";
const OP_BASE: &str = "ooPMQcQYa6HykEGJRVJPrG7iG5nnWBoobGsGYYUvMeGv8UhGPRT2";

fn bhash(level: Level, fork: usize) -> BlockHash {
    let n = level as usize + fork * 100;
    let a = ALPHABET[(n / ALPHABET.len()) % ALPHABET.len()] as char;
    let b = ALPHABET[n % ALPHABET.len()] as char;
    BlockHash::new(format!("{BLOCK_BASE}{a}{b}")).unwrap()
}

fn ophash(n: usize) -> OpHash {
    let a = ALPHABET[(n / ALPHABET.len()) % ALPHABET.len()] as char;
    let b = ALPHABET[n % ALPHABET.len()] as char;
    OpHash::new(format!("{OP_BASE}{a}{b}")).unwrap()
}

fn addr(i: usize) -> Address {
    let a = ALPHABET[33 + (i / 25) % 25] as char;
    let b = ALPHABET[33 + i % 25] as char;
    Address::new(format!("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZ{a}{b}")).unwrap()
}

fn activation_group(n: usize, account: usize, balance: i64) -> UnpackedGroup {
    UnpackedGroup {
        hash: ophash(n),
        pass: ValidationPass::Anonymous,
        contents: vec![UnpackedContent::Activation {
            account: addr(account),
            balance,
        }],
    }
}

/// Builds a coherent chain: each block's predecessor is the previous hash
fn chain(specs: Vec<(usize, Vec<UnpackedGroup>)>) -> Vec<UnpackedBlock> {
    let proto = ProtocolHash::new(CARTHAGE).unwrap();
    let constants = ProtocolConstants::default();
    let mut blocks = Vec::new();
    let mut predecessor = bhash(0, 0);
    for (i, (fork, groups)) in specs.into_iter().enumerate() {
        let level = i as Level + 1;
        let hash = bhash(level, fork);
        blocks.push(UnpackedBlock {
            hash: hash.clone(),
            level,
            predecessor: predecessor.clone(),
            timestamp: 1_600_000_000 + level * 60,
            protocol: proto.clone(),
            next_protocol: proto.clone(),
            baker: addr(99),
            priority: 0,
            cycle: ((level - 1) / constants.blocks_per_cycle as Level) as i32,
            cycle_position: ((level - 1) % constants.blocks_per_cycle as Level) as i32,
            voting_period_index: ((level - 1) / constants.blocks_per_voting_period as Level)
                as i32,
            voting_period_position: ((level - 1) % constants.blocks_per_voting_period as Level)
                as i32,
            seed_nonce_hash: None,
            lb_escape_vote: None,
            groups,
        });
        predecessor = hash;
    }
    blocks
}

/// A remote chain the test can swap out from under the controller
#[derive(Clone)]
struct ScriptedChain {
    blocks: Arc<Mutex<Vec<UnpackedBlock>>>,
}

impl ScriptedChain {
    fn new(blocks: Vec<UnpackedBlock>) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(blocks)),
        }
    }

    fn set(&self, blocks: Vec<UnpackedBlock>) {
        *self.blocks.lock().unwrap() = blocks;
    }

    fn get(&self, level: Level) -> Option<UnpackedBlock> {
        self.blocks.lock().unwrap().get(level as usize - 1).cloned()
    }
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn head(&self) -> Result<HeaderInfo, RpcError> {
        let blocks = self.blocks.lock().unwrap();
        let last = blocks.last().expect("scripted chain is never empty");
        Ok(header_of(last))
    }

    async fn header_at(&self, level: Level) -> Result<Option<HeaderInfo>, RpcError> {
        Ok(self.get(level).map(|b| header_of(&b)))
    }

    async fn block_at(&self, level: Level) -> Result<UnpackedBlock, RpcError> {
        self.get(level).ok_or(RpcError::Status {
            url: format!("blocks/{level}"),
            status: 404,
        })
    }

    async fn constants_at(&self, _level: Level) -> Result<ProtocolConstants, RpcError> {
        Ok(ProtocolConstants::default())
    }

    async fn cycle_bundle(
        &self,
        _at_level: Level,
        cycle: CycleIndex,
    ) -> Result<CycleBundle, RpcError> {
        Ok(CycleBundle {
            cycle,
            snapshot_index: 0,
            snapshot_level: 0,
            seed: String::new(),
            baking_rights: Vec::new(),
            endorsing_rights: Vec::new(),
        })
    }

    async fn voter_listings(&self, _level: Level) -> Result<Vec<VoterListing>, RpcError> {
        Ok(Vec::new())
    }
}

fn header_of(block: &UnpackedBlock) -> HeaderInfo {
    HeaderInfo {
        level: block.level,
        hash: block.hash.clone(),
        predecessor: block.predecessor.clone(),
        protocol: block.protocol.clone(),
        timestamp: block.timestamp,
    }
}

fn controller(
    source: ScriptedChain,
) -> (
    SyncController<ScriptedChain>,
    tokio::sync::broadcast::Receiver<ChainEvent>,
    watch::Sender<bool>,
) {
    let engine = ProtocolEngine::new(Store::in_memory().unwrap(), 1).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, events) = SyncController::new(
        source,
        engine,
        Box::new(DisabledQuoteFeed),
        SyncConfig {
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        shutdown_rx,
    );
    (controller, events, shutdown_tx)
}

#[tokio::test]
async fn advances_head_then_idles() {
    let source = ScriptedChain::new(chain(vec![
        (0, vec![activation_group(1, 1, 1_000_000)]),
        (0, vec![]),
        (0, vec![activation_group(2, 2, 100)]),
    ]));
    let (mut sync, _events, _shutdown) = controller(source);

    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(1));
    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(2));
    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(3));
    assert_eq!(sync.tick().await.unwrap(), Tick::Idle);

    let account = sync.engine().store().account_by_address(addr(1).as_str()).unwrap().unwrap();
    assert_eq!(account.balance, 1_000_000);
}

#[tokio::test]
async fn reorg_converges_to_the_remote_chain() {
    let shared_prefix = vec![
        (0, vec![activation_group(1, 1, 1_000_000)]),
        (0, vec![]),
    ];

    let mut chain_a = shared_prefix.clone();
    chain_a.push((0, vec![activation_group(2, 2, 100)]));

    let mut chain_b = shared_prefix;
    chain_b.push((1, vec![activation_group(3, 2, 200)]));
    chain_b.push((1, vec![]));

    let source = ScriptedChain::new(chain(chain_a));
    let (mut sync, mut events, _shutdown) = controller(source.clone());
    for _ in 0..3 {
        sync.tick().await.unwrap();
    }
    assert_eq!(sync.engine().app_state().level, 3);

    // The remote switches to a fork agreeing up to level 2
    source.set(chain(chain_b.clone()));
    assert_eq!(sync.tick().await.unwrap(), Tick::Reverted(2));
    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(3));
    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(4));
    assert_eq!(sync.tick().await.unwrap(), Tick::Idle);

    // The reorg was observable downstream
    let mut saw_reorg = false;
    while let Ok(event) = events.try_recv() {
        if event == (ChainEvent::Reorg { level: 2 }) {
            saw_reorg = true;
        }
    }
    assert!(saw_reorg);

    // Converged state equals applying the canonical chain directly
    let direct_source = ScriptedChain::new(chain(chain_b));
    let (mut direct, _events, _shutdown) = controller(direct_source);
    for _ in 0..4 {
        direct.tick().await.unwrap();
    }
    assert_eq!(
        sync.engine().store().accounts().unwrap(),
        direct.engine().store().accounts().unwrap()
    );
    assert_eq!(
        sync.engine().app_state().hash,
        direct.engine().app_state().hash
    );
}

#[tokio::test]
async fn shutdown_stops_the_loop_cleanly() {
    let source = ScriptedChain::new(chain(vec![(0, vec![])]));
    let (sync, _events, shutdown) = controller(source);
    shutdown.send(true).unwrap();
    sync.run().await.unwrap();
}

#[tokio::test]
async fn remote_gap_is_idleness_not_failure() {
    // Local at level 1, remote still at level 1: nothing to do
    let source = ScriptedChain::new(chain(vec![(0, vec![])]));
    let (mut sync, _events, _shutdown) = controller(source);
    assert_eq!(sync.tick().await.unwrap(), Tick::Applied(1));
    assert_eq!(sync.tick().await.unwrap(), Tick::Idle);
    assert_eq!(sync.tick().await.unwrap(), Tick::Idle);
}
