use serde::{Deserialize, Serialize};

use crate::{
    hashing,
    primitives::{Address, BlockNumber, Gas, Nonce, H256, U256},
};

/// A value transfer between two accounts.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: Nonce,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl Transaction {
    #[must_use]
    pub fn hash(&self) -> H256 {
        hashing::hash_serialized(self)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub success: bool,
    pub gas_used: Gas,
    pub cumulative_gas_used: Gas,
    pub logs: Vec<Log>,
}

/// A [`Log`] together with its position in the chain.
///
/// Records are derived from receipts and are never hashed into block headers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LogRecord {
    pub block_hash: H256,
    pub block_number: BlockNumber,
    pub transaction_hash: H256,
    pub transaction_index: usize,
    pub log_index: usize,
    pub removed: bool,
    pub log: Log,
}

impl LogRecord {
    /// Expands the logs in `receipts` into records in block order.
    #[must_use]
    pub fn from_receipts(
        block_hash: H256,
        block_number: BlockNumber,
        receipts: &[Receipt],
        removed: bool,
    ) -> Vec<Self> {
        receipts
            .iter()
            .enumerate()
            .flat_map(|(transaction_index, receipt)| {
                receipt.logs.iter().map(move |log| (transaction_index, receipt, log))
            })
            .enumerate()
            .map(|(log_index, (transaction_index, receipt, log))| Self {
                block_hash,
                block_number,
                transaction_hash: receipt.transaction_hash,
                transaction_index,
                log_index,
                removed,
                log: log.clone(),
            })
            .collect()
    }
}

#[must_use]
pub fn receipts_root(receipts: &[Receipt]) -> H256 {
    hashing::hash_serialized(&receipts)
}

#[must_use]
pub fn transactions_root(transactions: &[Transaction]) -> H256 {
    hashing::hash_serialized(&transactions)
}
