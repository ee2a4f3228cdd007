use std::sync::Arc;

use anyhow::Result;

use crate::{
    block::Header,
    primitives::{BlockNumber, H256},
};

/// Read access to stored chain data needed by verification and validation.
pub trait ChainReader: Send + Sync {
    fn header(&self, hash: H256, number: BlockNumber) -> Result<Option<Arc<Header>>>;

    fn has_block(&self, hash: H256, number: BlockNumber) -> Result<bool>;

    fn has_state(&self, state_root: H256) -> Result<bool>;

    fn has_block_and_state(&self, hash: H256, number: BlockNumber) -> Result<bool> {
        match self.header(hash, number)? {
            Some(header) => Ok(self.has_block(hash, number)? && self.has_state(header.state_root)?),
            None => Ok(false),
        }
    }
}

impl<C: ChainReader + ?Sized> ChainReader for Arc<C> {
    fn header(&self, hash: H256, number: BlockNumber) -> Result<Option<Arc<Header>>> {
        self.as_ref().header(hash, number)
    }

    fn has_block(&self, hash: H256, number: BlockNumber) -> Result<bool> {
        self.as_ref().has_block(hash, number)
    }

    fn has_state(&self, state_root: H256) -> Result<bool> {
        self.as_ref().has_state(state_root)
    }
}
