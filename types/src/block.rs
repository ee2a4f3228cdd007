use core::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::{
    hashing,
    primitives::{Address, BlockNumber, Difficulty, Gas, UnixSeconds, H256},
    transaction::{self, Transaction},
};

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: H256,
    pub number: BlockNumber,
    pub difficulty: Difficulty,
    pub timestamp: UnixSeconds,
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub gas_limit: Gas,
    pub gas_used: Gas,
    pub extra_data: Vec<u8>,
    pub nonce: u64,
}

impl Header {
    #[must_use]
    pub fn hash(&self) -> H256 {
        hashing::hash_serialized(self)
    }

    /// Hash of every field except `nonce`. Proof-of-work is computed over it.
    #[must_use]
    pub fn seal_hash(&self) -> H256 {
        let unsealed = Self {
            nonce: 0,
            extra_data: self.extra_data.clone(),
            ..*self
        };

        unsealed.hash()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Body {
    pub transactions: Vec<Transaction>,
}

/// An immutable block with its hash computed once at construction.
#[derive(PartialEq, Eq, Debug)]
pub struct Block {
    hash: H256,
    header: Header,
    body: Body,
}

impl Block {
    #[must_use]
    pub fn new(header: Header, body: Body) -> Self {
        Self {
            hash: header.hash(),
            header,
            body,
        }
    }

    #[must_use]
    pub const fn hash(&self) -> H256 {
        self.hash
    }

    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    #[must_use]
    pub const fn number(&self) -> BlockNumber {
        self.header.number
    }

    #[must_use]
    pub const fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    #[must_use]
    pub const fn difficulty(&self) -> Difficulty {
        self.header.difficulty
    }

    #[must_use]
    pub const fn timestamp(&self) -> UnixSeconds {
        self.header.timestamp
    }

    #[must_use]
    pub const fn state_root(&self) -> H256 {
        self.header.state_root
    }

    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.body.transactions
    }

    #[must_use]
    pub fn transaction_hashes(&self) -> Vec<H256> {
        self.transactions().iter().map(Transaction::hash).collect()
    }

    /// Approximate in-memory size. Used to bound batches of blocks held at once.
    #[must_use]
    pub fn size(&self) -> usize {
        size_of::<Self>()
            + self.header.extra_data.len()
            + self.body.transactions.len() * size_of::<Transaction>()
    }

    #[must_use]
    pub fn computed_transactions_root(&self) -> H256 {
        transaction::transactions_root(self.transactions())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn header() -> Header {
        Header {
            number: 3,
            timestamp: 1_000,
            extra_data: b"chain".to_vec(),
            nonce: 42,
            ..Header::default()
        }
    }

    #[test]
    fn block_caches_header_hash() {
        let header = header();
        let expected = header.hash();

        assert_eq!(Block::new(header, Body::default()).hash(), expected);
    }

    #[test_case(|header| header.nonce += 1, false; "nonce")]
    #[test_case(|header| header.number += 1, true; "number")]
    #[test_case(|header| header.extra_data.push(0), true; "extra data")]
    fn seal_hash_covers_everything_but_nonce(modify: fn(&mut Header), changes_seal_hash: bool) {
        let original = header();
        let mut modified = original.clone();

        modify(&mut modified);

        assert_ne!(original.hash(), modified.hash());
        assert_eq!(original.seal_hash() != modified.seal_hash(), changes_seal_hash);
    }
}
