use core::time::Duration;

use anyhow::Error as AnyhowError;
use thiserror::Error;
use types::primitives::{BlockNumber, UnixSeconds, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "non-contiguous insert: block {number} ({hash:?}) does not follow \
         block {previous_number} ({previous_hash:?})"
    )]
    NonContiguousChain {
        number: BlockNumber,
        hash: H256,
        previous_number: BlockNumber,
        previous_hash: H256,
    },
    #[error("no total difficulty stored for block {hash:?}")]
    MissingTotalDifficulty { hash: H256 },
    #[error("state {state_root:?} of parent {parent_hash:?} is not available")]
    ParentStateUnavailable { parent_hash: H256, state_root: H256 },
    #[error("missing parent state: no ancestor of {hash:?} has its state stored")]
    MissingParentState { hash: H256 },
    #[error("invalid chain segment: block {hash:?} is missing from the {side} chain")]
    InvalidChainSegment { side: &'static str, hash: H256 },
    #[error(
        "sidechain ghost-state attack: block {number} ({hash:?}) has the state root \
         of canonical block {canonical_hash:?}"
    )]
    SidechainGhostStateAttack {
        number: BlockNumber,
        hash: H256,
        canonical_hash: H256,
    },
    #[error("block timestamp {timestamp} is too far in the future (limit: {limit})")]
    TimestampTooFarFuture {
        timestamp: UnixSeconds,
        limit: UnixSeconds,
    },
    #[error("no header verification result received within {timeout:?}")]
    VerificationTimeout { timeout: Duration },
    #[error("header verification was aborted")]
    VerificationAborted,
}

/// Failure of [`Blockchain::insert_chain`] at the block with index `index` in the input.
///
/// `index` is also the number of blocks handled before the failure.
///
/// [`Blockchain::insert_chain`]: crate::Blockchain::insert_chain
#[derive(Debug, Error)]
#[error("failed to insert block at index {index}: {error:#}")]
pub struct InsertError {
    pub index: usize,
    pub error: AnyhowError,
}

impl InsertError {
    pub fn new(index: usize, error: impl Into<AnyhowError>) -> Self {
        Self {
            index,
            error: error.into(),
        }
    }
}
