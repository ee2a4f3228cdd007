use thiserror::Error;
use types::primitives::H256;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage key has incorrect prefix: {bytes:?}")]
    IncorrectPrefix { bytes: Vec<u8> },
    #[error("no block with hash {hash:?} in storage")]
    UnknownBlockHash { hash: H256 },
    #[error("head block hash is not stored")]
    HeadBlockHashNotFound,
    #[error("stored genesis {stored:?} does not match computed genesis {computed:?}")]
    GenesisMismatch { stored: H256, computed: H256 },
}
