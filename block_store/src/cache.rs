use core::num::NonZeroUsize;
use std::sync::Arc;

use derivative::Derivative;
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use types::{
    block::{Block, Header},
    primitives::{BlockNumber, Difficulty, H256},
};

use crate::recency_cache::RecencyCache;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct CacheConfig {
    #[derivative(Default(value = "nonzero!(256_usize)"))]
    pub blocks: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(512_usize)"))]
    pub headers: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(2048_usize)"))]
    pub numbers: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(1024_usize)"))]
    pub total_difficulties: NonZeroUsize,
}

/// Recency caches in front of [`Storage`](crate::Storage).
///
/// Every cached value is derived from content addressed by hash, so entries never go stale.
/// A miss only means the value has to be read from the database.
pub struct CacheLayer {
    blocks: Mutex<RecencyCache<H256, Arc<Block>>>,
    headers: Mutex<RecencyCache<H256, Arc<Header>>>,
    numbers: Mutex<RecencyCache<H256, BlockNumber>>,
    total_difficulties: Mutex<RecencyCache<H256, Difficulty>>,
}

impl CacheLayer {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let CacheConfig {
            blocks,
            headers,
            numbers,
            total_difficulties,
        } = config;

        Self {
            blocks: Mutex::new(RecencyCache::new(blocks)),
            headers: Mutex::new(RecencyCache::new(headers)),
            numbers: Mutex::new(RecencyCache::new(numbers)),
            total_difficulties: Mutex::new(RecencyCache::new(total_difficulties)),
        }
    }

    pub fn block(&self, hash: H256) -> Option<Arc<Block>> {
        self.blocks.lock().get(&hash).cloned()
    }

    pub fn header(&self, hash: H256) -> Option<Arc<Header>> {
        self.headers.lock().get(&hash).cloned()
    }

    pub fn number(&self, hash: H256) -> Option<BlockNumber> {
        self.numbers.lock().get(&hash).copied()
    }

    pub fn total_difficulty(&self, hash: H256) -> Option<Difficulty> {
        self.total_difficulties.lock().get(&hash).copied()
    }

    pub fn contains_block(&self, hash: H256) -> bool {
        self.blocks.lock().contains(&hash)
    }

    pub fn insert_block(&self, block: Arc<Block>) {
        let hash = block.hash();
        self.insert_number(hash, block.number());
        self.blocks.lock().insert(hash, block);
    }

    pub fn insert_header(&self, hash: H256, header: Arc<Header>) {
        self.insert_number(hash, header.number);
        self.headers.lock().insert(hash, header);
    }

    pub fn insert_number(&self, hash: H256, number: BlockNumber) {
        self.numbers.lock().insert(hash, number);
    }

    pub fn insert_total_difficulty(&self, hash: H256, total_difficulty: Difficulty) {
        self.total_difficulties
            .lock()
            .insert(hash, total_difficulty);
    }
}
