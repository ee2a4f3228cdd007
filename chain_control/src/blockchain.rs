use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    sync::Arc,
    thread::{Builder, JoinHandle},
};

use anyhow::{ensure, Error as AnyhowError, Result};
use arc_swap::ArcSwap;
use block_store::{Error as StoreError, Genesis, Storage};
use consensus_engine::ConsensusEngine;
use database::Database;
use itertools::Itertools as _;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use state_processor::{ProcessOutput, StateProcessor, Validator};
use tap::{Pipe as _, TapFallible as _, TryConv as _};
use types::{
    block::{Block, Header},
    clock::Clock,
    error::BlockError,
    primitives::{BlockNumber, Difficulty, H256},
    state::State,
    traits::ChainReader,
    transaction::{LogRecord, Receipt},
};

use crate::{
    bad_blocks::BadBlocks,
    config::ChainConfig,
    error::{Error, InsertError},
    events::ChainEvent,
    fork_choice::ForkChoice,
    future_blocks::FutureBlockQueue,
    insert_iterator::{InsertIterator, Outcome},
    reorg::ReorgPlan,
    stats::InsertStats,
    unbounded_sink::UnboundedSink,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteStatus {
    Canonical,
    Side,
}

/// The chain insertion pipeline and the canonical chain it maintains.
///
/// Insertions are serialized by a chain-wide lock. Queries do not take it and observe the chain
/// as of the last committed write.
pub struct Blockchain<E, P, V, S> {
    config: ChainConfig,
    storage: Arc<Storage>,
    engine: E,
    processor: P,
    validator: V,
    fork_choice: ForkChoice,
    future_blocks: FutureBlockQueue,
    bad_blocks: BadBlocks,
    current_block: ArcSwap<Block>,
    chain_lock: Mutex<()>,
    stopped: AtomicBool,
    stop_lock: Mutex<()>,
    stop_condvar: Condvar,
    drainer: Mutex<Option<JoinHandle<()>>>,
    event_tx: S,
}

impl<E, P, V, S> Blockchain<E, P, V, S>
where
    E: ConsensusEngine,
    P: StateProcessor,
    V: Validator,
    S: UnboundedSink<ChainEvent>,
{
    /// Opens the chain stored in `database`, initializing it with `genesis` if it is empty.
    ///
    /// If the state of the persisted head is missing the head is rewound to the newest
    /// canonical block that has its state.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: ChainConfig,
        database: Database,
        genesis: &Genesis,
        engine: E,
        processor: P,
        validator: V,
        event_tx: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = Storage::new(database, config.cache_config()).pipe(Arc::new);
        let genesis_block = genesis.commit(&storage)?;
        let head = recover_head(&storage)?;

        info!(
            "loaded chain (head number: {}, head hash: {:?}, genesis: {:?})",
            head.number(),
            head.hash(),
            genesis_block.hash(),
        );

        Ok(Self {
            fork_choice: ForkChoice::new(Arc::clone(&storage), config.terminal_total_difficulty),
            future_blocks: FutureBlockQueue::new(
                config.max_future_blocks,
                config.max_time_future_blocks,
                clock,
            ),
            bad_blocks: BadBlocks::new(config.bad_block_limit),
            current_block: ArcSwap::new(head),
            chain_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
            stop_lock: Mutex::new(()),
            stop_condvar: Condvar::new(),
            drainer: Mutex::new(None),
            config,
            storage,
            engine,
            processor,
            validator,
            event_tx,
        })
    }

    /// Makes fork choice keep the current head on exact ties when `preserve` selects it.
    #[must_use]
    pub fn with_preserve(
        mut self,
        preserve: impl Fn(&Header) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fork_choice.set_preserve(preserve);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub fn current_block(&self) -> Arc<Block> {
        self.current_block.load_full()
    }

    pub fn block_by_hash(&self, hash: H256) -> Result<Option<Arc<Block>>> {
        self.storage.block_by_hash(hash)
    }

    pub fn block_by_number(&self, number: BlockNumber) -> Result<Option<Arc<Block>>> {
        self.storage.block_by_number(number)
    }

    pub fn header_by_hash(&self, hash: H256) -> Result<Option<Arc<Header>>> {
        self.storage.header_by_hash(hash)
    }

    pub fn canonical_hash(&self, number: BlockNumber) -> Result<Option<H256>> {
        self.storage.canonical_hash(number)
    }

    pub fn total_difficulty(&self, hash: H256) -> Result<Option<Difficulty>> {
        match self.storage.block_number(hash)? {
            Some(number) => self.storage.total_difficulty(hash, number),
            None => Ok(None),
        }
    }

    pub fn receipts(&self, hash: H256) -> Result<Option<Vec<Receipt>>> {
        match self.storage.block_number(hash)? {
            Some(number) => self.storage.receipts(hash, number),
            None => Ok(None),
        }
    }

    pub fn has_state(&self, state_root: H256) -> Result<bool> {
        self.storage.has_state(state_root)
    }

    /// Locates a transaction in the canonical chain.
    ///
    /// Returns the hash and number of the containing block and the index of the transaction in it.
    pub fn transaction_location(
        &self,
        transaction_hash: H256,
    ) -> Result<Option<(H256, BlockNumber, usize)>> {
        let Some(number) = self.storage.transaction_block_number(transaction_hash)? else {
            return Ok(None);
        };

        let Some(block) = self.storage.block_by_number(number)? else {
            return Ok(None);
        };

        let location = block
            .transactions()
            .iter()
            .position(|transaction| transaction.hash() == transaction_hash)
            .map(|index| (block.hash(), number, index));

        Ok(location)
    }

    /// Returns recently rejected blocks, most recent first.
    #[must_use]
    pub fn bad_blocks(&self) -> Vec<Arc<Block>> {
        self.bad_blocks.blocks()
    }

    #[must_use]
    pub const fn future_blocks(&self) -> &FutureBlockQueue {
        &self.future_blocks
    }

    /// Inserts a hash-linked run of blocks.
    ///
    /// Returns the number of blocks consumed. This is less than the length of `chain` if the
    /// chain was stopped during the insertion or if blocks following a run with pruned parent
    /// state could not be linked and were ignored.
    ///
    /// A run with pruned parent state is stored before it is executed again. If the chain is
    /// stopped in between, the count ends before the run even though its blocks are stored.
    pub fn insert_chain(&self, chain: &[Arc<Block>]) -> Result<usize, InsertError> {
        if chain.is_empty() {
            return Ok(0);
        }

        check_contiguity(chain)?;

        let _guard = self.chain_lock.lock();

        self.insert_chain_locked(chain, true)
    }

    /// Takes the run of future blocks that can now be linked to the head and inserts them.
    ///
    /// Blocks that are still too early are queued again. Returns the number of blocks imported.
    pub fn process_future_blocks(&self) -> usize {
        let blocks = self
            .future_blocks
            .drain_ready(self.current_block().number());

        if blocks.is_empty() {
            return 0;
        }

        debug!("retrying {} future blocks", blocks.len());

        let mut imported = 0;

        for block in &blocks {
            match self.insert_chain(core::slice::from_ref(block)) {
                Ok(count) => imported += count,
                Err(error) if BlockError::classify(&error.error).is_some() => {
                    debug!(
                        "future block {} ({:?}) cannot be imported yet: {:#}",
                        block.number(),
                        block.hash(),
                        error.error,
                    );
                }
                Err(error) => {
                    warn!(
                        "dropping future block {} ({:?}) and its descendants: {:#}",
                        block.number(),
                        block.hash(),
                        error.error,
                    );

                    break;
                }
            }
        }

        imported
    }

    /// Spawns a thread that calls [`Blockchain::process_future_blocks`] periodically
    /// until [`Blockchain::stop`] is called.
    pub fn spawn_future_block_drainer(self: &Arc<Self>) -> Result<()>
    where
        E: 'static,
        P: 'static,
        V: 'static,
    {
        let mut drainer = self.drainer.lock();

        ensure!(drainer.is_none(), "future block drainer is already running");

        let blockchain = Arc::downgrade(self);
        let poll_interval = self.config.future_blocks_poll_interval;

        let handle = Builder::new()
            .name("future-blocks".to_owned())
            .spawn(move || {
                while let Some(blockchain) = blockchain.upgrade() {
                    if blockchain.wait_for_stop(poll_interval) {
                        break;
                    }

                    blockchain.process_future_blocks();
                }

                debug!("future block drainer exiting");
            })?;

        *drainer = Some(handle);

        Ok(())
    }

    /// Stops the future block drainer and waits for the insertion in progress to return.
    ///
    /// Insertions stop before the next block and report the blocks consumed so far.
    pub fn stop(&self) {
        {
            let _guard = self.stop_lock.lock();
            self.stopped.store(true, Ordering::SeqCst);
        }

        self.stop_condvar.notify_all();

        if let Some(handle) = self.drainer.lock().take() {
            if handle.join().is_err() {
                warn!("future block drainer panicked");
            }
        }

        drop(self.chain_lock.lock());

        info!("blockchain stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut guard = self.stop_lock.lock();

        if !self.is_stopped() {
            self.stop_condvar.wait_for(&mut guard, timeout);
        }

        self.is_stopped()
    }

    fn insert_chain_locked(
        &self,
        chain: &[Arc<Block>],
        verify_seals: bool,
    ) -> Result<usize, InsertError> {
        let mut last_canonical = None;
        let result = self.import_batch(chain, verify_seals, &mut last_canonical);

        if let Some(block) = last_canonical {
            if self.current_block().hash() == block.hash() {
                ChainEvent::ChainHead { block }.send(&self.event_tx);
            }
        }

        result
    }

    fn import_batch(
        &self,
        chain: &[Arc<Block>],
        verify_seals: bool,
        last_canonical: &mut Option<Arc<Block>>,
    ) -> Result<usize, InsertError> {
        let mut stats = InsertStats::default();

        let headers = chain.iter().map(|block| block.header().clone()).collect();
        let seals = vec![verify_seals; chain.len()];
        let storage = Arc::clone(&self.storage);
        let reader: Arc<dyn ChainReader> = storage;

        let verification = self
            .engine
            .verify_headers(reader, headers, seals)
            .map_err(|error| InsertError::new(0, error))?;

        let mut iterator = InsertIterator::new(
            chain,
            verification,
            &self.validator,
            self.storage.as_ref(),
            self.config.verification_timeout,
        );

        let mut outcome = iterator.next();

        if let Some(Outcome::Known(_)) = outcome {
            let current = self.current_block();

            while let Some(Outcome::Known(block)) = &outcome {
                if self
                    .known_block_needs_import(&current, block)
                    .map_err(|error| InsertError::new(iterator.index(), error))?
                {
                    break;
                }

                debug!(
                    "ignoring already known block (number: {}, hash: {:?})",
                    block.number(),
                    block.hash(),
                );

                stats.ignored += 1;
                outcome = iterator.next();
            }

            // Known blocks left at this point are ahead of the head or off the canonical chain.
            // They were executed before, so only the canonical index needs to be rewritten.
            while let Some(Outcome::Known(block)) = &outcome {
                debug!(
                    "writing previously known block (number: {}, hash: {:?})",
                    block.number(),
                    block.hash(),
                );

                self.write_known_block(block)
                    .map_err(|error| InsertError::new(iterator.index(), error))?;

                *last_canonical = Some(Arc::clone(block));
                outcome = iterator.next();
            }
        }

        let mut outcome = match outcome {
            Some(Outcome::PrunedAncestor(block)) => {
                debug!(
                    "parent state of block {} ({:?}) is pruned; inserting as side chain",
                    block.number(),
                    block.hash(),
                );

                return self.insert_side_chain(block, &mut iterator, &mut stats);
            }
            Some(Outcome::FutureBlock(block)) => {
                return Err(self.postpone(
                    block,
                    BlockError::FutureBlock,
                    &mut iterator,
                    &mut stats,
                ));
            }
            Some(Outcome::UnknownAncestor(block))
                if self.future_blocks.contains(block.parent_hash()) =>
            {
                return Err(self.postpone(
                    block,
                    BlockError::UnknownAncestor,
                    &mut iterator,
                    &mut stats,
                ));
            }
            Some(rejected @ (Outcome::UnknownAncestor(_) | Outcome::Failed(..))) => {
                return Err(self.reject(rejected, &iterator, &mut stats));
            }
            other => other,
        };

        loop {
            if self.is_stopped() {
                debug!("aborting block import because the chain is stopping");
                return Ok(iterator.index());
            }

            let block = match outcome {
                None => return Ok(iterator.index()),
                Some(Outcome::Verified(block)) => block,
                Some(Outcome::Known(block)) => {
                    debug!(
                        "writing previously known block (number: {}, hash: {:?})",
                        block.number(),
                        block.hash(),
                    );

                    self.write_known_block(&block)
                        .map_err(|error| InsertError::new(iterator.index(), error))?;

                    stats.processed += 1;
                    *last_canonical = Some(block);
                    outcome = iterator.next();
                    continue;
                }
                Some(Outcome::FutureBlock(block)) => {
                    return Err(self.postpone(
                        block,
                        BlockError::FutureBlock,
                        &mut iterator,
                        &mut stats,
                    ));
                }
                Some(rejected) => return Err(self.reject(rejected, &iterator, &mut stats)),
            };

            let index = iterator.index();

            let status = self
                .import_block(&block, iterator.previous(), &mut stats)
                .map_err(|error| InsertError::new(index, error))?;

            if status == WriteStatus::Canonical {
                *last_canonical = Some(block);
            }

            stats.report(chain, index);
            outcome = iterator.next();
        }
    }

    fn known_block_needs_import(&self, current: &Block, block: &Block) -> Result<bool> {
        if !self
            .fork_choice
            .reorg_needed(current.header(), block.header())?
        {
            return Ok(false);
        }

        if block.number() > current.number() {
            return Ok(true);
        }

        Ok(self.storage.canonical_hash(block.number())? != Some(block.hash()))
    }

    fn import_block(
        &self,
        block: &Arc<Block>,
        previous: Option<&Arc<Block>>,
        stats: &mut InsertStats,
    ) -> Result<WriteStatus> {
        let parent_state_root = match previous {
            Some(previous) => previous.state_root(),
            None => self.parent_header(block)?.state_root,
        };

        let mut state = self
            .storage
            .state(parent_state_root)?
            .ok_or(Error::ParentStateUnavailable {
                parent_hash: block.parent_hash(),
                state_root: parent_state_root,
            })?;

        let output = self
            .processor
            .process(block, &mut state)
            .tap_err(|error| self.bad_blocks.report(block, &[], error))?;

        self.validator
            .validate_state(block, &state, &output.receipts, output.gas_used)
            .tap_err(|error| self.bad_blocks.report(block, &output.receipts, error))?;

        let status = self.write_block_with_state(block, &output, &state)?;

        match status {
            WriteStatus::Canonical => debug!(
                "inserted new block (number: {}, hash: {:?}, transactions: {}, gas: {})",
                block.number(),
                block.hash(),
                block.transactions().len(),
                output.gas_used,
            ),
            WriteStatus::Side => debug!(
                "inserted forked block (number: {}, hash: {:?}, transactions: {}, gas: {})",
                block.number(),
                block.hash(),
                block.transactions().len(),
                output.gas_used,
            ),
        }

        stats.processed += 1;
        stats.gas_used += output.gas_used;

        Ok(status)
    }

    fn parent_header(&self, block: &Block) -> Result<Arc<Header>> {
        let parent = match block.number().checked_sub(1) {
            Some(parent_number) => self.storage.header(block.parent_hash(), parent_number)?,
            None => None,
        };

        parent.ok_or_else(|| BlockError::UnknownAncestor.into())
    }

    fn parent_total_difficulty(&self, block: &Block) -> Result<Difficulty> {
        let total_difficulty = match block.number().checked_sub(1) {
            Some(parent_number) => self
                .storage
                .total_difficulty(block.parent_hash(), parent_number)?,
            None => None,
        };

        total_difficulty.ok_or_else(|| BlockError::UnknownAncestor.into())
    }

    /// Persists `block` with its execution results and makes it the head if fork choice
    /// prefers it over the current head.
    fn write_block_with_state(
        &self,
        block: &Arc<Block>,
        output: &ProcessOutput,
        state: &State,
    ) -> Result<WriteStatus> {
        let hash = block.hash();
        let number = block.number();
        let total_difficulty = self
            .parent_total_difficulty(block)?
            .saturating_add(block.difficulty());

        let mut batch = self.storage.begin_write();
        batch.write_total_difficulty(hash, number, total_difficulty)?;
        batch.write_block(block)?;
        batch.write_receipts(hash, number, &output.receipts)?;
        batch.write_unpaid_rewards(hash, number, &output.unpaid_rewards)?;
        batch.write_state(state)?;
        batch.commit()?;

        let current = self.current_block();

        let status = if self
            .fork_choice
            .reorg_needed(current.header(), block.header())?
        {
            if block.parent_hash() != current.hash() {
                self.reorg(&current, block)?;
            }

            self.write_head_block(block)?;

            WriteStatus::Canonical
        } else {
            WriteStatus::Side
        };

        self.future_blocks.remove(hash);

        match status {
            WriteStatus::Canonical => {
                if !output.logs.is_empty() {
                    ChainEvent::NewLogs {
                        logs: output.logs.clone(),
                    }
                    .send(&self.event_tx);
                }
            }
            WriteStatus::Side => ChainEvent::ChainSide {
                block: Arc::clone(block),
            }
            .send(&self.event_tx),
        }

        Ok(status)
    }

    fn write_block_without_state(
        &self,
        block: &Arc<Block>,
        total_difficulty: Difficulty,
    ) -> Result<()> {
        let mut batch = self.storage.begin_write();
        batch.write_total_difficulty(block.hash(), block.number(), total_difficulty)?;
        batch.write_block(block)?;
        batch.commit()
    }

    fn write_known_block(&self, block: &Arc<Block>) -> Result<()> {
        let current = self.current_block();

        if block.parent_hash() != current.hash() {
            self.reorg(&current, block)?;
        }

        self.write_head_block(block)
    }

    /// Makes `block` the head, assuming its ancestors are already canonical.
    fn write_head_block(&self, block: &Arc<Block>) -> Result<()> {
        let hash = block.hash();

        let mut batch = self.storage.begin_write();
        batch.write_canonical_hash(block.number(), hash)?;
        batch.write_transaction_lookups(block)?;
        batch.write_head_block_hash(hash)?;

        if let Some(state_root) = self.prunable_state(block)? {
            debug!("pruning state {state_root:?} (head: {})", block.number());
            batch.delete_state(state_root);
        }

        batch.commit()?;

        self.current_block.store(Arc::clone(block));

        Ok(())
    }

    // Blocks without transactions share the state root of their parent.
    // A root is only pruned if neither the head nor the next canonical block uses it.
    fn prunable_state(&self, head: &Block) -> Result<Option<H256>> {
        let Some(history) = self.config.state_history else {
            return Ok(None);
        };

        let Some(number) = head
            .number()
            .checked_sub(history)
            .filter(|number| *number > 0)
        else {
            return Ok(None);
        };

        let Some(block) = self.storage.block_by_number(number)? else {
            return Ok(None);
        };

        let state_root = block.state_root();
        let mut retained = vec![head.state_root()];

        for retained_number in [0, number + 1] {
            if let Some(block) = self.storage.block_by_number(retained_number)? {
                retained.push(block.state_root());
            }
        }

        Ok((!retained.contains(&state_root)).then_some(state_root))
    }

    /// Makes the ancestors of `new_head` canonical in place of those of `old_head`.
    ///
    /// `new_head` itself is left for the caller to write.
    fn reorg(&self, old_head: &Arc<Block>, new_head: &Arc<Block>) -> Result<()> {
        let plan = ReorgPlan::new(&self.storage, old_head, new_head)?;

        let ReorgPlan {
            common_ancestor,
            old_chain,
            new_chain,
        } = &plan;

        if old_chain.is_empty() {
            debug!(
                "extending canonical chain (from: {}, to: {}, hash: {:?})",
                common_ancestor.number(),
                new_head.number(),
                new_head.hash(),
            );
        } else if plan.depth() > self.config.large_reorg_threshold {
            warn!(
                "large chain reorg detected (number: {}, hash: {:?}, dropped: {}, added: {})",
                common_ancestor.number(),
                common_ancestor.hash(),
                old_chain.len(),
                new_chain.len(),
            );
        } else {
            info!(
                "chain reorg detected (number: {}, hash: {:?}, dropped: {}, added: {})",
                common_ancestor.number(),
                common_ancestor.hash(),
                old_chain.len(),
                new_chain.len(),
            );
        }

        let mut reborn_logs = vec![];

        for block in new_chain.iter().skip(1).rev() {
            self.write_head_block(block)?;
            reborn_logs.extend(self.stored_logs(block, false)?);
        }

        let mut batch = self.storage.begin_write();

        for transaction_hash in plan.deleted_transactions() {
            batch.delete_transaction_lookup(transaction_hash);
        }

        batch.truncate_canonical_above(new_head.number())?;
        batch.commit()?;

        let mut removed_logs = vec![];

        for block in old_chain.iter().rev() {
            removed_logs.extend(self.stored_logs(block, true)?);
        }

        if !removed_logs.is_empty() {
            ChainEvent::RemovedLogs { logs: removed_logs }.send(&self.event_tx);
        }

        if !reborn_logs.is_empty() {
            ChainEvent::NewLogs { logs: reborn_logs }.send(&self.event_tx);
        }

        for block in old_chain.iter().rev() {
            ChainEvent::ChainSide {
                block: Arc::clone(block),
            }
            .send(&self.event_tx);
        }

        if !old_chain.is_empty() {
            ChainEvent::Reorg {
                common_ancestor: common_ancestor.hash(),
                dropped: old_chain.iter().rev().map(|block| block.hash()).collect(),
                added: new_chain.iter().rev().map(|block| block.hash()).collect(),
            }
            .send(&self.event_tx);
        }

        Ok(())
    }

    fn stored_logs(&self, block: &Block, removed: bool) -> Result<Vec<LogRecord>> {
        let receipts = self
            .storage
            .receipts(block.hash(), block.number())?
            .unwrap_or_default();

        Ok(LogRecord::from_receipts(
            block.hash(),
            block.number(),
            &receipts,
            removed,
        ))
    }

    /// Stores a run of blocks whose parent state is pruned without executing them.
    ///
    /// If the run outweighs the current head, the blocks are executed starting from the nearest
    /// ancestor that still has its state and the chain is reorganized onto them.
    fn insert_side_chain(
        &self,
        first: Arc<Block>,
        iterator: &mut InsertIterator,
        stats: &mut InsertStats,
    ) -> Result<usize, InsertError> {
        let start = iterator.index();
        let current = self.current_block();
        let mut external_td = None;
        let mut last_block = Arc::clone(&first);
        let mut outcome = Some(Outcome::PrunedAncestor(first));

        let trailing = loop {
            let block = match outcome {
                Some(Outcome::PrunedAncestor(block)) => block,
                other => break other,
            };

            let index = iterator.index();
            let at_index = |error: AnyhowError| InsertError::new(index, error);
            let hash = block.hash();
            let number = block.number();

            if current.number() >= number {
                if let Some(canonical) = self.storage.block_by_number(number).map_err(at_index)? {
                    if canonical.hash() == hash {
                        // The state of a canonical block was pruned. Its total difficulty is known.
                        external_td = self
                            .storage
                            .total_difficulty(hash, number)
                            .map_err(at_index)?;

                        outcome = iterator.next();
                        continue;
                    }

                    if canonical.state_root() == block.state_root() {
                        warn!(
                            "side chain ghost-state attack detected (number: {number}, \
                             side root: {:?}, canonical root: {:?})",
                            block.state_root(),
                            canonical.state_root(),
                        );

                        let error = AnyhowError::from(Error::SidechainGhostStateAttack {
                            number,
                            hash,
                            canonical_hash: canonical.hash(),
                        });

                        self.bad_blocks.report(&block, &[], &error);

                        return Err(InsertError::new(index, error));
                    }
                }
            }

            let parent_td = match external_td {
                Some(total_difficulty) => total_difficulty,
                None => self.parent_total_difficulty(&block).map_err(at_index)?,
            };

            let total_difficulty = parent_td.saturating_add(block.difficulty());
            external_td = Some(total_difficulty);

            if !self.storage.has_block(hash, number).map_err(at_index)? {
                self.write_block_without_state(&block, total_difficulty)
                    .map_err(at_index)?;

                debug!(
                    "injected side chain block (number: {number}, hash: {hash:?}, \
                     total difficulty: {total_difficulty})",
                );
            }

            last_block = block;
            outcome = iterator.next();
        };

        let reorg = self
            .fork_choice
            .reorg_needed(current.header(), last_block.header())
            .map_err(|error| InsertError::new(iterator.index(), error))?;

        if !reorg {
            info!(
                "side chain written to storage (start: {}, end: {}, side td: {}, head: {})",
                iterator.first().map(|block| block.number()).unwrap_or_default(),
                last_block.number(),
                external_td.unwrap_or_default(),
                current.number(),
            );

            return self.finish_side_chain(trailing, iterator, stats);
        }

        let pruned = self
            .pruned_ancestry(&last_block)
            .map_err(|error| InsertError::new(start, error))?;

        let memory_limit = self
            .config
            .side_chain_batch_memory
            .as_u64()
            .try_conv::<usize>()
            .unwrap_or(usize::MAX);

        let mut blocks = vec![];
        let mut memory = 0;

        for (hash, number) in pruned.into_iter().rev() {
            let block = self
                .storage
                .block(hash, number)
                .and_then(|block| block.ok_or_else(|| StoreError::UnknownBlockHash { hash }.into()))
                .map_err(|error| InsertError::new(start, error))?;

            memory += block.size();
            blocks.push(block);

            if blocks.len() >= self.config.side_chain_batch_blocks.get() || memory > memory_limit {
                info!(
                    "importing heavy side chain segment (blocks: {}, start: {}, end: {number})",
                    blocks.len(),
                    blocks[0].number(),
                );

                self.insert_chain_locked(&core::mem::take(&mut blocks), false)
                    .map_err(|error| reimport_error(start, error))?;

                memory = 0;

                if self.is_stopped() {
                    debug!("aborting side chain import because the chain is stopping");
                    return Ok(start);
                }
            }
        }

        if let (Some(first), Some(last)) = (blocks.first(), blocks.last()) {
            info!(
                "importing side chain segment (start: {}, end: {})",
                first.number(),
                last.number(),
            );

            self.insert_chain_locked(&blocks, false)
                .map_err(|error| reimport_error(start, error))?;
        }

        self.finish_side_chain(trailing, iterator, stats)
    }

    fn finish_side_chain(
        &self,
        trailing: Option<Outcome>,
        iterator: &mut InsertIterator,
        stats: &mut InsertStats,
    ) -> Result<usize, InsertError> {
        match trailing {
            None => Ok(iterator.index()),
            Some(Outcome::FutureBlock(block)) => {
                Err(self.postpone(block, BlockError::FutureBlock, iterator, stats))
            }
            Some(failed @ Outcome::Failed(..)) => Err(self.reject(failed, iterator, stats)),
            Some(_) => {
                stats.ignored += 1 + iterator.remaining();
                Ok(iterator.index())
            }
        }
    }

    /// Collects the ancestors of `block` back to the newest one with its state, newest first.
    fn pruned_ancestry(&self, block: &Block) -> Result<Vec<(H256, BlockNumber)>> {
        let mut pruned = vec![];
        let mut header = self.storage.header(block.hash(), block.number())?;

        loop {
            let Some(current) = header else {
                return Err(Error::MissingParentState { hash: block.hash() }.into());
            };

            if self.storage.has_state(current.state_root)? {
                return Ok(pruned);
            }

            pruned.push((current.hash(), current.number));

            header = match current.number.checked_sub(1) {
                Some(parent_number) => self.storage.header(current.parent_hash, parent_number)?,
                None => None,
            };
        }
    }

    fn postpone(
        &self,
        block: Arc<Block>,
        class: BlockError,
        iterator: &mut InsertIterator,
        stats: &mut InsertStats,
    ) -> InsertError {
        let index = iterator.index();
        let mut next = Some(block);

        while let Some(block) = next {
            let hash = block.hash();
            let number = block.number();

            match self.future_blocks.add(block) {
                Ok(true) => {
                    debug!("postponed future block (number: {number}, hash: {hash:?})");
                    stats.queued += 1;
                }
                Ok(false) => {
                    debug!("future block not queued (number: {number}, hash: {hash:?})");
                    stats.ignored += 1;
                }
                Err(error) => return InsertError::new(iterator.index(), error),
            }

            next = match iterator.next() {
                Some(Outcome::UnknownAncestor(block)) => Some(block),
                Some(_) => {
                    stats.ignored += 1;
                    None
                }
                None => None,
            };
        }

        stats.ignored += iterator.remaining();

        InsertError::new(index, class)
    }

    fn reject(
        &self,
        outcome: Outcome,
        iterator: &InsertIterator,
        stats: &mut InsertStats,
    ) -> InsertError {
        let index = iterator.index();
        let (block, error) = outcome.into_error();

        self.future_blocks.remove(block.hash());
        self.bad_blocks.report(&block, &[], &error);

        stats.ignored += iterator.remaining();

        InsertError::new(index, error)
    }
}

fn check_contiguity(chain: &[Arc<Block>]) -> Result<(), InsertError> {
    for (index, (previous, block)) in chain.iter().tuple_windows().enumerate() {
        if previous.number().checked_add(1) != Some(block.number())
            || block.parent_hash() != previous.hash()
        {
            let error = Error::NonContiguousChain {
                number: block.number(),
                hash: block.hash(),
                previous_number: previous.number(),
                previous_hash: previous.hash(),
            };

            warn!("rejecting non-contiguous chain: {error}");

            return Err(InsertError::new(index + 1, error));
        }
    }

    Ok(())
}

fn reimport_error(start: usize, error: InsertError) -> InsertError {
    let InsertError { index, error } = error;

    InsertError::new(
        start,
        error.context(format!("failed to re-import block {index} of pruned side chain segment")),
    )
}

/// Loads the persisted head, rewinding to the newest canonical block with its state if needed.
fn recover_head(storage: &Storage) -> Result<Arc<Block>> {
    let head = storage.head_block()?;

    if storage.has_state(head.state_root())? {
        return Ok(head);
    }

    for number in (0..head.number()).rev() {
        let Some(block) = storage.block_by_number(number)? else {
            continue;
        };

        if !storage.has_state(block.state_root())? {
            continue;
        }

        let mut batch = storage.begin_write();

        for dropped_number in storage.canonical_numbers_from(number + 1)? {
            if let Some(dropped) = storage.block_by_number(dropped_number)? {
                for transaction_hash in dropped.transaction_hashes() {
                    batch.delete_transaction_lookup(transaction_hash);
                }
            }
        }

        batch.truncate_canonical_above(number)?;
        batch.write_head_block_hash(block.hash())?;
        batch.commit()?;

        warn!(
            "state of head block {} ({:?}) is missing; rewound head to block {number} ({:?})",
            head.number(),
            head.hash(),
            block.hash(),
        );

        return Ok(block);
    }

    Err(Error::MissingParentState { hash: head.hash() }.into())
}
