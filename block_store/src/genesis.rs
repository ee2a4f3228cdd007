use std::sync::Arc;

use anyhow::{ensure, Result};
use derivative::Derivative;
use log::info;
use serde::Deserialize;
use types::{
    block::{Block, Body, Header},
    primitives::{Address, Difficulty, Gas, UnixSeconds, H256, U256},
    state::State,
    transaction,
};

use crate::{error::Error, storage::Storage};

#[derive(Clone, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct Genesis {
    pub timestamp: UnixSeconds,
    pub difficulty: Difficulty,
    #[derivative(Default(value = "8_000_000"))]
    pub gas_limit: Gas,
    pub extra_data: Vec<u8>,
    pub allocation: Vec<(Address, U256)>,
}

impl Genesis {
    #[must_use]
    pub fn state(&self) -> State {
        self.allocation.iter().copied().collect()
    }

    #[must_use]
    pub fn block(&self) -> Block {
        let header = Header {
            parent_hash: H256::zero(),
            number: 0,
            difficulty: self.difficulty,
            timestamp: self.timestamp,
            coinbase: Address::zero(),
            state_root: self.state().root(),
            transactions_root: transaction::transactions_root(&[]),
            receipts_root: transaction::receipts_root(&[]),
            gas_limit: self.gas_limit,
            gas_used: 0,
            extra_data: self.extra_data.clone(),
            nonce: 0,
        };

        Block::new(header, Body::default())
    }

    /// Writes the genesis block, its state and the chain pointers if `storage` is empty.
    ///
    /// Fails if `storage` already holds a different genesis block.
    pub fn commit(&self, storage: &Storage) -> Result<Arc<Block>> {
        let block = Arc::new(self.block());
        let hash = block.hash();

        if let Some(stored) = storage.canonical_hash(0)? {
            ensure!(
                stored == hash,
                Error::GenesisMismatch {
                    stored,
                    computed: hash,
                },
            );

            return Ok(block);
        }

        let mut batch = storage.begin_write();
        batch.write_block(&block)?;
        batch.write_total_difficulty(hash, 0, block.difficulty())?;
        batch.write_receipts(hash, 0, &[])?;
        batch.write_state(&self.state())?;
        batch.write_canonical_hash(0, hash)?;
        batch.write_head_block_hash(hash)?;
        batch.commit()?;

        info!(
            "wrote genesis block {hash:?} with {} allocated accounts",
            self.allocation.len(),
        );

        Ok(block)
    }
}
