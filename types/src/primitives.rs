pub use ethereum_types::{H160 as Address, H256, U256};

pub type BlockNumber = u64;
pub type Gas = u64;
pub type Nonce = u64;
pub type UnixSeconds = u64;

/// Total difficulty, the sum of difficulties from genesis up to and including a block.
pub type Difficulty = U256;
