use thiserror::Error;
use types::primitives::{BlockNumber, Gas, UnixSeconds, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error("header number {number} does not follow parent number {parent_number}")]
    InvalidNumber {
        number: BlockNumber,
        parent_number: BlockNumber,
    },
    #[error("header timestamp {timestamp} is not after parent timestamp {parent_timestamp}")]
    OlderBlockTime {
        timestamp: UnixSeconds,
        parent_timestamp: UnixSeconds,
    },
    #[error("extra data is {size} bytes long, which exceeds maximum of {maximum}")]
    ExtraDataTooLong { size: usize, maximum: usize },
    #[error("gas limit {gas_limit} is below minimum of {minimum}")]
    GasLimitTooLow { gas_limit: Gas, minimum: Gas },
    #[error(
        "gas limit {gas_limit} differs from parent gas limit {parent_gas_limit} \
         by more than {maximum_change}"
    )]
    GasLimitChangeTooLarge {
        gas_limit: Gas,
        parent_gas_limit: Gas,
        maximum_change: Gas,
    },
    #[error("gas used {gas_used} exceeds gas limit {gas_limit}")]
    GasUsedExceedsLimit { gas_used: Gas, gas_limit: Gas },
    #[error("header with zero difficulty has nonzero nonce {nonce}")]
    NonzeroNonce { nonce: u64 },
    #[error("proof-of-work of header {hash:?} does not meet its difficulty")]
    InvalidProofOfWork { hash: H256 },
    #[error("header {hash:?} was configured to fail verification")]
    MockFailure { hash: H256 },
}
