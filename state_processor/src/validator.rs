use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, ensure, Result};
use parking_lot::Mutex;
use types::{
    block::Block,
    error::BlockError,
    primitives::{Gas, H256},
    state::State,
    traits::ChainReader,
    transaction::{self, Receipt},
};

use crate::error::Error;

pub trait Validator: Send + Sync {
    /// Checks `block` against stored chain data before it is processed.
    ///
    /// Recoverable conditions are reported as [`BlockError`]s.
    fn validate_body(&self, chain: &dyn ChainReader, block: &Block) -> Result<()>;

    /// Checks the results of processing `block` against the values committed to in its header.
    fn validate_state(
        &self,
        block: &Block,
        state: &State,
        receipts: &[Receipt],
        gas_used: Gas,
    ) -> Result<()>;
}

impl<V: Validator + ?Sized> Validator for Arc<V> {
    fn validate_body(&self, chain: &dyn ChainReader, block: &Block) -> Result<()> {
        self.as_ref().validate_body(chain, block)
    }

    fn validate_state(
        &self,
        block: &Block,
        state: &State,
        receipts: &[Receipt],
        gas_used: Gas,
    ) -> Result<()> {
        self.as_ref().validate_state(block, state, receipts, gas_used)
    }
}

#[derive(Clone, Copy, Default)]
pub struct BlockValidator;

impl Validator for BlockValidator {
    fn validate_body(&self, chain: &dyn ChainReader, block: &Block) -> Result<()> {
        if chain.has_block_and_state(block.hash(), block.number())? {
            bail!(BlockError::KnownBlock);
        }

        let in_header = block.header().transactions_root;
        let computed = block.computed_transactions_root();

        ensure!(
            in_header == computed,
            Error::TransactionsRootMismatch {
                in_header,
                computed,
            },
        );

        let Some(parent_number) = block.number().checked_sub(1) else {
            bail!(BlockError::UnknownAncestor);
        };

        let Some(parent) = chain.header(block.parent_hash(), parent_number)? else {
            bail!(BlockError::UnknownAncestor);
        };

        if !chain.has_block(block.parent_hash(), parent_number)? {
            bail!(BlockError::UnknownAncestor);
        }

        if !chain.has_state(parent.state_root)? {
            bail!(BlockError::PrunedAncestor);
        }

        Ok(())
    }

    fn validate_state(
        &self,
        block: &Block,
        state: &State,
        receipts: &[Receipt],
        gas_used: Gas,
    ) -> Result<()> {
        let header = block.header();

        ensure!(
            header.gas_used == gas_used,
            Error::GasUsedMismatch {
                in_header: header.gas_used,
                computed: gas_used,
            },
        );

        let computed = transaction::receipts_root(receipts);

        ensure!(
            header.receipts_root == computed,
            Error::ReceiptsRootMismatch {
                in_header: header.receipts_root,
                computed,
            },
        );

        let computed = state.root();

        ensure!(
            header.state_root == computed,
            Error::StateRootMismatch {
                in_header: header.state_root,
                computed,
            },
        );

        Ok(())
    }
}

/// Wraps [`BlockValidator`], failing blocks marked with [`MockValidator::fail_body`] or
/// [`MockValidator::fail_state`].
#[derive(Clone, Default)]
pub struct MockValidator {
    body_failures: Arc<Mutex<HashSet<H256>>>,
    state_failures: Arc<Mutex<HashSet<H256>>>,
}

impl MockValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_body(&self, hash: H256) {
        self.body_failures.lock().insert(hash);
    }

    pub fn fail_state(&self, hash: H256) {
        self.state_failures.lock().insert(hash);
    }
}

impl Validator for MockValidator {
    fn validate_body(&self, chain: &dyn ChainReader, block: &Block) -> Result<()> {
        let hash = block.hash();

        if self.body_failures.lock().contains(&hash) {
            bail!(Error::MockFailure { hash });
        }

        BlockValidator.validate_body(chain, block)
    }

    fn validate_state(
        &self,
        block: &Block,
        state: &State,
        receipts: &[Receipt],
        gas_used: Gas,
    ) -> Result<()> {
        let hash = block.hash();

        if self.state_failures.lock().contains(&hash) {
            bail!(Error::MockFailure { hash });
        }

        BlockValidator.validate_state(block, state, receipts, gas_used)
    }
}
