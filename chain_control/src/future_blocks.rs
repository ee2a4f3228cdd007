use core::{num::NonZeroUsize, time::Duration};
use std::sync::Arc;

use anyhow::{ensure, Result};
use block_store::RecencyCache;
use itertools::Itertools as _;
use log::debug;
use parking_lot::Mutex;
use types::{
    block::Block,
    clock::Clock,
    primitives::{BlockNumber, H256},
};

use crate::error::Error;

/// Blocks that arrived before they could be linked to the chain.
///
/// The queue may be filled from any thread. Blocks are only taken out by
/// [`FutureBlockQueue::drain_ready`] and when the pipeline resolves them.
pub struct FutureBlockQueue {
    blocks: Mutex<RecencyCache<H256, Arc<Block>>>,
    max_time_ahead: Duration,
    clock: Arc<dyn Clock>,
}

impl FutureBlockQueue {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, max_time_ahead: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            blocks: Mutex::new(RecencyCache::new(capacity)),
            max_time_ahead,
            clock,
        }
    }

    /// Queues `block` unless it has zero difficulty.
    ///
    /// Returns whether the block was queued.
    pub fn add(&self, block: Arc<Block>) -> Result<bool> {
        let limit = self.clock.now().saturating_add(self.max_time_ahead.as_secs());

        ensure!(
            block.timestamp() <= limit,
            Error::TimestampTooFarFuture {
                timestamp: block.timestamp(),
                limit,
            },
        );

        if block.difficulty().is_zero() {
            return Ok(false);
        }

        let hash = block.hash();

        if let Some((evicted, _)) = self.blocks.lock().insert(hash, block) {
            debug!("future block queue full; evicted block {evicted:?} to make room for {hash:?}");
        }

        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, hash: H256) -> bool {
        self.blocks.lock().contains(&hash)
    }

    pub fn remove(&self, hash: H256) -> Option<Arc<Block>> {
        self.blocks.lock().remove(&hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Takes out the hash-linked run starting at the lowest queued block.
    ///
    /// Nothing is taken out unless the lowest queued block is at most one past `head_number`.
    /// Queued siblings of blocks in the run stay in the queue.
    pub fn drain_ready(&self, head_number: BlockNumber) -> Vec<Arc<Block>> {
        let mut blocks = self.blocks.lock();

        let queued = blocks
            .iter()
            .map(|(_, block)| block)
            .sorted_by_key(|block| (block.number(), block.hash()))
            .collect_vec();

        let Some(earliest) = queued.first() else {
            return vec![];
        };

        if earliest.number() > head_number.saturating_add(1) {
            return vec![];
        }

        let mut run: Vec<Arc<Block>> = vec![Arc::clone(earliest)];

        for block in queued.into_iter().skip(1) {
            let last = run.last().expect("run starts with the earliest block");

            if block.number() == last.number() {
                continue;
            }

            if block.number() != last.number() + 1 || block.parent_hash() != last.hash() {
                break;
            }

            run.push(Arc::clone(block));
        }

        for block in &run {
            blocks.remove(&block.hash());
        }

        run
    }
}
