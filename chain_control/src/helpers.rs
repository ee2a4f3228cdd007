use core::cell::RefCell;
use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use block_store::Genesis;
use consensus_engine::{ConsensusEngine, EngineConfig, KeccakPow, MockConsensusEngine};
use database::Database;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use state_processor::{BlockBuilder, LedgerProcessor, MockStateProcessor, MockValidator};
use types::{
    block::{Block, Header},
    clock::ManualClock,
    primitives::{Address, H256, U256},
    state::State,
    transaction::Transaction,
};

use crate::{blockchain::Blockchain, config::ChainConfig, error::InsertError, events::ChainEvent};

pub const NOW: u64 = 1_000_000;
pub const DIFFICULTY: u64 = 10;
pub const ALICE: Address = Address::repeat_byte(0xa1);
pub const BOB: Address = Address::repeat_byte(0xb0);

pub type TestBlockchain<E> =
    Blockchain<E, MockStateProcessor, MockValidator, UnboundedSender<ChainEvent>>;

pub struct Context<E = MockConsensusEngine> {
    blockchain: Arc<TestBlockchain<E>>,
    engine: E,
    processor: MockStateProcessor,
    validator: MockValidator,
    clock: Arc<ManualClock>,
    event_rx: UnboundedReceiver<ChainEvent>,
    seal: fn(Header) -> Header,
    // Post-states of every block built by the context, including blocks that were never inserted.
    states: RefCell<HashMap<H256, State>>,
}

impl Context {
    pub fn new() -> Result<Self> {
        Self::with_config(ChainConfig::default())
    }

    pub fn with_config(config: ChainConfig) -> Result<Self> {
        Self::with_database(config, Database::in_memory())
    }

    pub fn with_database(config: ChainConfig, database: Database) -> Result<Self> {
        Self::with_engine(
            config,
            database,
            MockConsensusEngine::new(),
            Arc::new(ManualClock::new(NOW)),
            core::convert::identity,
        )
    }
}

impl Context<KeccakPow> {
    pub fn keccak_pow(config: ChainConfig, engine_config: EngineConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(NOW));
        let engine = KeccakPow::new(engine_config, Arc::<ManualClock>::clone(&clock));

        Self::with_engine(config, Database::in_memory(), engine, clock, KeccakPow::seal)
    }
}

impl<E: ConsensusEngine + Clone> Context<E> {
    fn with_engine(
        config: ChainConfig,
        database: Database,
        engine: E,
        clock: Arc<ManualClock>,
        seal: fn(Header) -> Header,
    ) -> Result<Self> {
        let genesis = genesis();
        let processor = MockStateProcessor::new(LedgerProcessor::default());
        let validator = MockValidator::new();
        let (event_tx, event_rx) = futures::channel::mpsc::unbounded();

        let blockchain = Blockchain::new(
            config,
            database,
            &genesis,
            engine.clone(),
            processor.clone(),
            validator.clone(),
            event_tx,
            Arc::<ManualClock>::clone(&clock),
        )?;

        let genesis_hash = genesis.block().hash();

        Ok(Self {
            blockchain: Arc::new(blockchain),
            engine,
            processor,
            validator,
            clock,
            event_rx,
            seal,
            states: RefCell::new(HashMap::from([(genesis_hash, genesis.state())])),
        })
    }

    pub const fn blockchain(&self) -> &Arc<TestBlockchain<E>> {
        &self.blockchain
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub const fn processor(&self) -> &MockStateProcessor {
        &self.processor
    }

    pub const fn validator(&self) -> &MockValidator {
        &self.validator
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn genesis(&self) -> Arc<Block> {
        self.blockchain
            .block_by_number(0)
            .expect("reading from storage should succeed")
            .expect("genesis block is committed when the chain is opened")
    }

    pub fn head(&self) -> Arc<Block> {
        self.blockchain.current_block()
    }

    pub fn insert(&self, blocks: &[Arc<Block>]) -> Result<usize, InsertError> {
        self.blockchain.insert_chain(blocks)
    }

    /// Builds a child of `parent` with [`DIFFICULTY`], letting `customize` adjust it first.
    pub fn child(
        &self,
        parent: &Block,
        customize: impl FnOnce(BlockBuilder) -> BlockBuilder,
    ) -> Result<Arc<Block>> {
        let parent_state = self
            .states
            .borrow()
            .get(&parent.hash())
            .cloned()
            .expect("parent should be built by this context");

        let builder = BlockBuilder::new(LedgerProcessor::default(), parent.header(), parent_state)
            .difficulty(U256::from(DIFFICULTY));

        let (block, state, _) = customize(builder).build(self.seal)?;

        self.states.borrow_mut().insert(block.hash(), state);

        Ok(Arc::new(block))
    }

    /// Builds `length` empty blocks on top of `parent`.
    ///
    /// Chains built with different values of `fork` never share blocks.
    pub fn chain(&self, parent: &Block, length: usize, fork: u8) -> Result<Vec<Arc<Block>>> {
        self.chain_with(parent, length, |builder, _| builder.extra_data([fork]))
    }

    /// Builds `length` blocks on top of `parent`, each with one transfer from [`ALICE`] to [`BOB`].
    ///
    /// The first transfer uses `first_nonce`. Every transfer in the chain is worth `value`.
    pub fn chain_with_transfers(
        &self,
        parent: &Block,
        length: usize,
        first_nonce: u64,
        value: u64,
    ) -> Result<Vec<Arc<Block>>> {
        self.chain_with(parent, length, |builder, position| {
            builder.transaction(transfer(first_nonce + position, value))
        })
    }

    pub fn chain_with(
        &self,
        parent: &Block,
        length: usize,
        mut customize: impl FnMut(BlockBuilder, u64) -> BlockBuilder,
    ) -> Result<Vec<Arc<Block>>> {
        let mut blocks: Vec<Arc<Block>> = vec![];

        for position in 0..length {
            let parent = blocks.last().map_or(parent, AsRef::as_ref);
            let position = u64::try_from(position)?;
            let block = self.child(parent, |builder| customize(builder, position))?;
            blocks.push(block);
        }

        Ok(blocks)
    }

    pub fn events(&mut self) -> Vec<ChainEvent> {
        let mut events = vec![];

        while let Ok(Some(event)) = self.event_rx.try_next() {
            events.push(event);
        }

        events
    }

    pub fn event_kinds(&mut self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| event.as_ref().to_owned())
            .collect()
    }

    pub fn assert_canonical(&self, blocks: &[Arc<Block>]) {
        for block in blocks {
            assert_eq!(
                self.blockchain
                    .canonical_hash(block.number())
                    .expect("reading from storage should succeed"),
                Some(block.hash()),
                "block {} should be canonical",
                block.number(),
            );
        }
    }
}

pub fn genesis() -> Genesis {
    Genesis {
        allocation: vec![(ALICE, U256::from(1_000_000))],
        ..Genesis::default()
    }
}

pub fn transfer(nonce: u64, value: u64) -> Transaction {
    Transaction {
        nonce,
        from: ALICE,
        to: BOB,
        value: U256::from(value),
    }
}
