use core::{fmt::Write as _, num::NonZeroUsize};
use std::sync::Arc;

use anyhow::Error;
use log::error;
use lru::LruCache;
use parking_lot::Mutex;
use types::{block::Block, primitives::H256, transaction::Receipt};

/// The most recent blocks that failed processing.
pub struct BadBlocks {
    blocks: Mutex<LruCache<H256, Arc<Block>>>,
}

impl BadBlocks {
    #[must_use]
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            blocks: Mutex::new(LruCache::new(limit)),
        }
    }

    pub fn report(&self, block: &Arc<Block>, receipts: &[Receipt], error: &Error) {
        self.blocks.lock().put(block.hash(), Arc::clone(block));

        error!("{}", diagnostic(block, receipts, error));
    }

    /// Returns bad blocks from the most recently reported one.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks
            .lock()
            .iter()
            .map(|(_, block)| Arc::clone(block))
            .collect()
    }
}

fn diagnostic(block: &Block, receipts: &[Receipt], error: &Error) -> String {
    let mut message = format!(
        "\n########## BAD BLOCK #########\n\
         Number: {}\n\
         Hash: {:?}\n\
         Parent: {:?}\n",
        block.number(),
        block.hash(),
        block.parent_hash(),
    );

    for (index, receipt) in receipts.iter().enumerate() {
        // Writing to a `String` cannot fail.
        let _ = writeln!(
            message,
            " {index}: cumulative: {} gas: {} success: {} logs: {} transaction: {:?}",
            receipt.cumulative_gas_used,
            receipt.gas_used,
            receipt.success,
            receipt.logs.len(),
            receipt.transaction_hash,
        );
    }

    let _ = write!(message, "\nError: {error:#}\n##############################\n");

    message
}
