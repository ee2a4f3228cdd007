use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, Result};
use parking_lot::Mutex;
use types::{
    block::Block,
    primitives::{Gas, H256},
    state::{State, UnpaidRewards},
    transaction::{LogRecord, Receipt},
};

use crate::{error::Error, ledger_processor::LedgerProcessor};

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ProcessOutput {
    pub receipts: Vec<Receipt>,
    pub unpaid_rewards: UnpaidRewards,
    pub logs: Vec<LogRecord>,
    pub gas_used: Gas,
}

pub trait StateProcessor: Send + Sync {
    /// Applies every transaction in `block` to `state`.
    ///
    /// `state` is left in an unspecified condition if processing fails.
    fn process(&self, block: &Block, state: &mut State) -> Result<ProcessOutput>;
}

impl<P: StateProcessor + ?Sized> StateProcessor for Arc<P> {
    fn process(&self, block: &Block, state: &mut State) -> Result<ProcessOutput> {
        self.as_ref().process(block, state)
    }
}

/// Wraps [`LedgerProcessor`], recording which blocks were processed.
///
/// Blocks passed to [`MockStateProcessor::fail_on`] fail instead of being processed.
#[derive(Clone, Default)]
pub struct MockStateProcessor {
    processor: LedgerProcessor,
    failures: Arc<Mutex<HashSet<H256>>>,
    processed: Arc<Mutex<Vec<H256>>>,
}

impl MockStateProcessor {
    #[must_use]
    pub fn new(processor: LedgerProcessor) -> Self {
        Self {
            processor,
            ..Self::default()
        }
    }

    pub fn fail_on(&self, hash: H256) {
        self.failures.lock().insert(hash);
    }

    #[must_use]
    pub fn processed(&self) -> Vec<H256> {
        self.processed.lock().clone()
    }

    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed.lock().len()
    }
}

impl StateProcessor for MockStateProcessor {
    fn process(&self, block: &Block, state: &mut State) -> Result<ProcessOutput> {
        let hash = block.hash();

        self.processed.lock().push(hash);

        if self.failures.lock().contains(&hash) {
            bail!(Error::MockFailure { hash });
        }

        self.processor.process(block, state)
    }
}
