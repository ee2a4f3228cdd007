use core::time::Duration;
use std::{sync::Arc, time::Instant};

use log::info;
use types::{block::Block, primitives::Gas};

const REPORT_INTERVAL: Duration = Duration::from_secs(8);

/// Counters for a single call to [`Blockchain::insert_chain`].
///
/// [`Blockchain::insert_chain`]: crate::Blockchain::insert_chain
#[derive(Debug)]
pub struct InsertStats {
    pub queued: usize,
    pub processed: usize,
    pub ignored: usize,
    pub gas_used: Gas,
    last_index: usize,
    start: Instant,
}

impl Default for InsertStats {
    fn default() -> Self {
        Self {
            queued: 0,
            processed: 0,
            ignored: 0,
            gas_used: 0,
            last_index: 0,
            start: Instant::now(),
        }
    }
}

impl InsertStats {
    /// Logs a summary if the batch is done or enough time has passed since the last summary.
    ///
    /// Counters are reset after every summary.
    pub fn report(&mut self, chain: &[Arc<Block>], index: usize) {
        let elapsed = self.start.elapsed();
        let is_last = index + 1 == chain.len();

        if !is_last && elapsed < REPORT_INTERVAL {
            return;
        }

        let Some(last) = chain.get(index) else {
            return;
        };

        let transactions = chain[self.last_index..=index]
            .iter()
            .map(|block| block.transactions().len())
            .sum::<usize>();

        info!(
            "imported new chain segment (blocks: {}, transactions: {transactions}, \
             gas: {}, elapsed: {elapsed:?}, number: {}, hash: {:?}, \
             queued: {}, ignored: {})",
            self.processed,
            self.gas_used,
            last.number(),
            last.hash(),
            self.queued,
            self.ignored,
        );

        *self = Self {
            last_index: index + 1,
            ..Self::default()
        };
    }
}
