use thiserror::Error;
use types::primitives::{Address, Gas, Nonce, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "transaction {index} from {sender:?} has nonce {transaction_nonce} \
         but account nonce is {account_nonce}"
    )]
    InvalidNonce {
        index: usize,
        sender: Address,
        transaction_nonce: Nonce,
        account_nonce: Nonce,
    },
    #[error("transaction {index} exceeds block gas limit {gas_limit}")]
    GasLimitReached { index: usize, gas_limit: Gas },
    #[error("transactions root mismatch (header: {in_header:?}, computed: {computed:?})")]
    TransactionsRootMismatch { in_header: H256, computed: H256 },
    #[error("gas used mismatch (header: {in_header}, computed: {computed})")]
    GasUsedMismatch { in_header: Gas, computed: Gas },
    #[error("receipts root mismatch (header: {in_header:?}, computed: {computed:?})")]
    ReceiptsRootMismatch { in_header: H256, computed: H256 },
    #[error("state root mismatch (header: {in_header:?}, computed: {computed:?})")]
    StateRootMismatch { in_header: H256, computed: H256 },
    #[error("block {hash:?} was configured to fail")]
    MockFailure { hash: H256 },
}
