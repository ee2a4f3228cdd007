use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use block_store::Storage;
use types::{block::Block, primitives::H256};

use crate::error::Error;

/// Blocks that leave and enter the canonical chain when the head moves from one block to another.
///
/// Both chains are ordered from the head down to the block right after the common ancestor.
pub struct ReorgPlan {
    pub common_ancestor: Arc<Block>,
    pub old_chain: Vec<Arc<Block>>,
    pub new_chain: Vec<Arc<Block>>,
}

impl ReorgPlan {
    /// Walks back from both heads to their nearest common ancestor.
    pub fn new(storage: &Storage, old_head: &Arc<Block>, new_head: &Arc<Block>) -> Result<Self> {
        let mut old_block = Arc::clone(old_head);
        let mut new_block = Arc::clone(new_head);
        let mut old_chain = vec![];
        let mut new_chain = vec![];

        while old_block.number() > new_block.number() {
            let parent = parent(storage, &old_block, "old")?;
            old_chain.push(core::mem::replace(&mut old_block, parent));
        }

        while new_block.number() > old_block.number() {
            let parent = parent(storage, &new_block, "new")?;
            new_chain.push(core::mem::replace(&mut new_block, parent));
        }

        while old_block.hash() != new_block.hash() {
            let old_parent = parent(storage, &old_block, "old")?;
            let new_parent = parent(storage, &new_block, "new")?;

            old_chain.push(core::mem::replace(&mut old_block, old_parent));
            new_chain.push(core::mem::replace(&mut new_block, new_parent));
        }

        Ok(Self {
            common_ancestor: old_block,
            old_chain,
            new_chain,
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.old_chain.len()
    }

    /// Hashes of transactions in the old chain that are not in the new one.
    #[must_use]
    pub fn deleted_transactions(&self) -> Vec<H256> {
        let added = self
            .new_chain
            .iter()
            .flat_map(|block| block.transaction_hashes())
            .collect::<HashSet<_>>();

        self.old_chain
            .iter()
            .flat_map(|block| block.transaction_hashes())
            .filter(|hash| !added.contains(hash))
            .collect()
    }
}

fn parent(storage: &Storage, block: &Block, side: &'static str) -> Result<Arc<Block>> {
    let parent_hash = block.parent_hash();

    let parent = match block.number().checked_sub(1) {
        Some(parent_number) => storage.block(parent_hash, parent_number)?,
        None => None,
    };

    parent.ok_or_else(|| {
        Error::InvalidChainSegment {
            side,
            hash: parent_hash,
        }
        .into()
    })
}
