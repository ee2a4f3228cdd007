use core::fmt::Display;
use std::sync::Arc;

use anyhow::Result;
use database::{Batch, Database, PrefixableKey as _};
use itertools::Itertools as _;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use types::{
    block::{Block, Body, Header},
    primitives::{BlockNumber, Difficulty, H256},
    state::{State, UnpaidRewards},
    traits::ChainReader,
    transaction::Receipt,
};

use crate::{
    cache::{CacheConfig, CacheLayer},
    error::Error,
    keys::{
        BodyByHash, CanonicalHashByNumber, HeadBlockHash, HeaderByHash, NumberByHash,
        ReceiptsByHash, StateByRoot, TotalDifficultyByHash, TransactionLookup,
        UnpaidRewardsByHash,
    },
};

/// Persistent store of blocks, receipts, total difficulties, states and chain indices.
///
/// Reads go through [`CacheLayer`] first. Writes are grouped in a [`WriteBatch`] and become
/// visible all at once when it is committed.
pub struct Storage {
    database: Database,
    cache: CacheLayer,
}

impl Storage {
    #[must_use]
    pub fn new(database: Database, cache_config: CacheConfig) -> Self {
        Self {
            database,
            cache: CacheLayer::new(cache_config),
        }
    }

    #[must_use]
    pub fn begin_write(&self) -> WriteBatch<'_> {
        WriteBatch {
            storage: self,
            batch: Batch::default(),
            blocks: vec![],
            total_difficulties: vec![],
        }
    }

    pub fn header(&self, hash: H256, number: BlockNumber) -> Result<Option<Arc<Header>>> {
        if let Some(header) = self.cache.header(hash) {
            return Ok(Some(header));
        }

        let Some(header) = get::<Header>(&self.database, HeaderByHash(number, hash))? else {
            return Ok(None);
        };

        let header = Arc::new(header);
        self.cache.insert_header(hash, Arc::clone(&header));

        Ok(Some(header))
    }

    pub fn header_by_hash(&self, hash: H256) -> Result<Option<Arc<Header>>> {
        match self.block_number(hash)? {
            Some(number) => self.header(hash, number),
            None => Ok(None),
        }
    }

    pub fn block(&self, hash: H256, number: BlockNumber) -> Result<Option<Arc<Block>>> {
        if let Some(block) = self.cache.block(hash) {
            return Ok(Some(block));
        }

        let Some(header) = self.header(hash, number)? else {
            return Ok(None);
        };

        let Some(body) = get::<Body>(&self.database, BodyByHash(number, hash))? else {
            return Ok(None);
        };

        let block = Arc::new(Block::new(Header::clone(&header), body));
        self.cache.insert_block(Arc::clone(&block));

        Ok(Some(block))
    }

    pub fn block_by_hash(&self, hash: H256) -> Result<Option<Arc<Block>>> {
        match self.block_number(hash)? {
            Some(number) => self.block(hash, number),
            None => Ok(None),
        }
    }

    /// Returns the canonical block at `number`.
    pub fn block_by_number(&self, number: BlockNumber) -> Result<Option<Arc<Block>>> {
        match self.canonical_hash(number)? {
            Some(hash) => self.block(hash, number),
            None => Ok(None),
        }
    }

    pub fn block_number(&self, hash: H256) -> Result<Option<BlockNumber>> {
        if let Some(number) = self.cache.number(hash) {
            return Ok(Some(number));
        }

        let number = get(&self.database, NumberByHash(hash))?;

        if let Some(number) = number {
            self.cache.insert_number(hash, number);
        }

        Ok(number)
    }

    pub fn has_block(&self, hash: H256, number: BlockNumber) -> Result<bool> {
        if self.cache.contains_block(hash) {
            return Ok(true);
        }

        self.database
            .contains_key(BodyByHash(number, hash).to_string())
    }

    pub fn receipts(&self, hash: H256, number: BlockNumber) -> Result<Option<Vec<Receipt>>> {
        get(&self.database, ReceiptsByHash(number, hash))
    }

    pub fn total_difficulty(&self, hash: H256, number: BlockNumber) -> Result<Option<Difficulty>> {
        if let Some(total_difficulty) = self.cache.total_difficulty(hash) {
            return Ok(Some(total_difficulty));
        }

        let total_difficulty = get(&self.database, TotalDifficultyByHash(number, hash))?;

        if let Some(total_difficulty) = total_difficulty {
            self.cache.insert_total_difficulty(hash, total_difficulty);
        }

        Ok(total_difficulty)
    }

    pub fn unpaid_rewards(
        &self,
        hash: H256,
        number: BlockNumber,
    ) -> Result<Option<UnpaidRewards>> {
        get(&self.database, UnpaidRewardsByHash(number, hash))
    }

    pub fn canonical_hash(&self, number: BlockNumber) -> Result<Option<H256>> {
        get(&self.database, CanonicalHashByNumber(number))
    }

    pub fn head_block_hash(&self) -> Result<Option<H256>> {
        get(&self.database, HeadBlockHash)
    }

    /// Loads the block the persisted head pointer refers to.
    pub fn head_block(&self) -> Result<Arc<Block>> {
        let hash = self
            .head_block_hash()?
            .ok_or(Error::HeadBlockHashNotFound)?;

        let block = self
            .block_by_hash(hash)?
            .ok_or(Error::UnknownBlockHash { hash })?;

        Ok(block)
    }

    pub fn state(&self, state_root: H256) -> Result<Option<State>> {
        get(&self.database, StateByRoot(state_root))
    }

    pub fn has_state(&self, state_root: H256) -> Result<bool> {
        self.database
            .contains_key(StateByRoot(state_root).to_string())
    }

    /// Returns the number of the canonical block containing the transaction.
    pub fn transaction_block_number(&self, transaction_hash: H256) -> Result<Option<BlockNumber>> {
        get(&self.database, TransactionLookup(transaction_hash))
    }

    /// Returns numbers that have a canonical hash assigned, starting from `number`.
    pub fn canonical_numbers_from(&self, number: BlockNumber) -> Result<Vec<BlockNumber>> {
        let results = self
            .database
            .iterator_ascending(CanonicalHashByNumber(number).to_string()..)?
            .take_while(|result| {
                result
                    .as_ref()
                    .map(|(key_bytes, _)| CanonicalHashByNumber::has_prefix(key_bytes))
                    .unwrap_or(true)
            })
            .map(|result| {
                let (key_bytes, _) = result?;
                let CanonicalHashByNumber(number) = key_bytes.try_into()?;
                Ok(number)
            });

        itertools::process_results(results, |numbers| numbers.collect_vec())
    }
}

impl ChainReader for Storage {
    fn header(&self, hash: H256, number: BlockNumber) -> Result<Option<Arc<Header>>> {
        Self::header(self, hash, number)
    }

    fn has_block(&self, hash: H256, number: BlockNumber) -> Result<bool> {
        Self::has_block(self, hash, number)
    }

    fn has_state(&self, state_root: H256) -> Result<bool> {
        Self::has_state(self, state_root)
    }
}

/// Writes that are applied together by [`WriteBatch::commit`].
///
/// Dropping a batch without committing it discards every write in it.
pub struct WriteBatch<'storage> {
    storage: &'storage Storage,
    batch: Batch,
    blocks: Vec<Arc<Block>>,
    total_difficulties: Vec<(H256, Difficulty)>,
}

impl WriteBatch<'_> {
    pub fn write_block(&mut self, block: &Arc<Block>) -> Result<()> {
        let hash = block.hash();
        let number = block.number();

        self.put(HeaderByHash(number, hash), block.header())?;
        self.put(BodyByHash(number, hash), block.body())?;
        self.put(NumberByHash(hash), &number)?;
        self.blocks.push(Arc::clone(block));

        Ok(())
    }

    pub fn write_total_difficulty(
        &mut self,
        hash: H256,
        number: BlockNumber,
        total_difficulty: Difficulty,
    ) -> Result<()> {
        self.put(TotalDifficultyByHash(number, hash), &total_difficulty)?;
        self.total_difficulties.push((hash, total_difficulty));
        Ok(())
    }

    pub fn write_receipts(
        &mut self,
        hash: H256,
        number: BlockNumber,
        receipts: &[Receipt],
    ) -> Result<()> {
        self.put(ReceiptsByHash(number, hash), &receipts)
    }

    pub fn write_unpaid_rewards(
        &mut self,
        hash: H256,
        number: BlockNumber,
        unpaid_rewards: &UnpaidRewards,
    ) -> Result<()> {
        self.put(UnpaidRewardsByHash(number, hash), unpaid_rewards)
    }

    pub fn write_state(&mut self, state: &State) -> Result<()> {
        self.put(StateByRoot(state.root()), state)
    }

    pub fn delete_state(&mut self, state_root: H256) {
        self.batch.delete(StateByRoot(state_root).to_string());
    }

    pub fn write_canonical_hash(&mut self, number: BlockNumber, hash: H256) -> Result<()> {
        self.put(CanonicalHashByNumber(number), &hash)
    }

    pub fn delete_canonical_hash(&mut self, number: BlockNumber) {
        self.batch.delete(CanonicalHashByNumber(number).to_string());
    }

    /// Deletes committed canonical hashes for every number above `number`.
    ///
    /// Canonical hashes written earlier in the same batch are not seen by this.
    pub fn truncate_canonical_above(&mut self, number: BlockNumber) -> Result<usize> {
        let Some(start) = number.checked_add(1) else {
            return Ok(0);
        };

        let numbers = self.storage.canonical_numbers_from(start)?;

        for number in &numbers {
            self.delete_canonical_hash(*number);
        }

        if !numbers.is_empty() {
            debug!(
                "deleting {} canonical hashes above block {number}",
                numbers.len(),
            );
        }

        Ok(numbers.len())
    }

    pub fn write_transaction_lookups(&mut self, block: &Block) -> Result<()> {
        let number = block.number();

        for transaction_hash in block.transaction_hashes() {
            self.put(TransactionLookup(transaction_hash), &number)?;
        }

        Ok(())
    }

    pub fn delete_transaction_lookup(&mut self, transaction_hash: H256) {
        self.batch
            .delete(TransactionLookup(transaction_hash).to_string());
    }

    pub fn write_head_block_hash(&mut self, hash: H256) -> Result<()> {
        self.put(HeadBlockHash, &hash)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn commit(self) -> Result<()> {
        let Self {
            storage,
            batch,
            blocks,
            total_difficulties,
        } = self;

        storage.database.write(batch)?;

        // Caches are only filled after the write succeeds so that they never hold
        // values the database does not.
        for block in blocks {
            storage.cache.insert_block(block);
        }

        for (hash, total_difficulty) in total_difficulties {
            storage.cache.insert_total_difficulty(hash, total_difficulty);
        }

        Ok(())
    }

    fn put(&mut self, key: impl Display, value: &(impl Serialize + ?Sized)) -> Result<()> {
        let (key, value) = serialize(key, value)?;
        self.batch.put(key, value);
        Ok(())
    }
}

fn get<V: DeserializeOwned>(database: &Database, key: impl Display) -> Result<Option<V>> {
    database
        .get(serialize_key(key))?
        .map(|bytes| bincode::deserialize(&bytes))
        .transpose()
        .map_err(Into::into)
}

fn serialize_key(key: impl Display) -> String {
    key.to_string()
}

fn serialize(key: impl Display, value: &(impl Serialize + ?Sized)) -> Result<(String, Vec<u8>)> {
    Ok((serialize_key(key), bincode::serialize(value)?))
}

#[cfg(test)]
mod tests {
    use bytesize::ByteSize;
    use tempfile::TempDir;
    use test_case::test_case;
    use types::{
        primitives::{Address, U256},
        transaction::Transaction,
    };

    use super::*;

    type Constructor = fn() -> Result<(Storage, Option<TempDir>)>;

    fn block(number: BlockNumber, parent_hash: H256, transactions: u64) -> Arc<Block> {
        let transactions = (0..transactions)
            .map(|nonce| Transaction {
                nonce,
                from: Address::repeat_byte(1),
                to: Address::repeat_byte(2),
                value: U256::from(number),
            })
            .collect();

        Arc::new(Block::new(
            Header {
                parent_hash,
                number,
                difficulty: U256::from(10),
                ..Header::default()
            },
            Body { transactions },
        ))
    }

    #[test_case(build_persistent_storage)]
    #[test_case(build_in_memory_storage)]
    fn test_block_round_trip(constructor: Constructor) -> Result<()> {
        let (storage, _directory) = constructor()?;
        let block = block(1, H256::zero(), 2);

        let mut batch = storage.begin_write();
        batch.write_block(&block)?;
        batch.write_total_difficulty(block.hash(), 1, U256::from(10))?;
        batch.write_receipts(block.hash(), 1, &[])?;
        batch.commit()?;

        let stored = storage.block_by_hash(block.hash())?;

        assert_eq!(stored.as_deref(), Some(block.as_ref()));
        assert!(storage.has_block(block.hash(), 1)?);
        assert!(!storage.has_block(block.hash(), 2)?);
        assert_eq!(storage.block_number(block.hash())?, Some(1));
        assert_eq!(storage.total_difficulty(block.hash(), 1)?, Some(U256::from(10)));
        assert_eq!(storage.receipts(block.hash(), 1)?, Some(vec![]));
        assert_eq!(storage.receipts(block.hash(), 2)?, None);

        Ok(())
    }

    #[test_case(build_persistent_storage)]
    #[test_case(build_in_memory_storage)]
    fn test_uncommitted_batch_writes_nothing(constructor: Constructor) -> Result<()> {
        let (storage, _directory) = constructor()?;
        let block = block(1, H256::zero(), 0);

        let mut batch = storage.begin_write();
        batch.write_block(&block)?;
        batch.write_canonical_hash(1, block.hash())?;
        drop(batch);

        assert_eq!(storage.block_by_hash(block.hash())?, None);
        assert_eq!(storage.canonical_hash(1)?, None);

        Ok(())
    }

    #[test_case(build_persistent_storage)]
    #[test_case(build_in_memory_storage)]
    fn test_truncate_canonical_above(constructor: Constructor) -> Result<()> {
        let (storage, _directory) = constructor()?;

        let mut batch = storage.begin_write();

        for number in [0, 1, 2, 9, 10, 11] {
            batch.write_canonical_hash(number, H256::from_low_u64_be(number))?;
        }

        batch.write_head_block_hash(H256::from_low_u64_be(11))?;
        batch.commit()?;

        let mut batch = storage.begin_write();
        assert_eq!(batch.truncate_canonical_above(2)?, 3);
        batch.commit()?;

        assert_eq!(storage.canonical_numbers_from(0)?, [0, 1, 2]);
        assert_eq!(storage.canonical_hash(2)?, Some(H256::from_low_u64_be(2)));
        assert_eq!(storage.canonical_hash(9)?, None);

        // Keys with other prefixes that sort after canonical hashes are left alone.
        assert_eq!(storage.head_block_hash()?, Some(H256::from_low_u64_be(11)));

        Ok(())
    }

    #[test_case(build_persistent_storage)]
    #[test_case(build_in_memory_storage)]
    fn test_transaction_lookups(constructor: Constructor) -> Result<()> {
        let (storage, _directory) = constructor()?;
        let block = block(4, H256::zero(), 3);
        let hashes = block.transaction_hashes();

        let mut batch = storage.begin_write();
        batch.write_transaction_lookups(&block)?;
        batch.commit()?;

        let mut batch = storage.begin_write();
        batch.delete_transaction_lookup(hashes[1]);
        batch.commit()?;

        assert_eq!(storage.transaction_block_number(hashes[0])?, Some(4));
        assert_eq!(storage.transaction_block_number(hashes[1])?, None);
        assert_eq!(storage.transaction_block_number(hashes[2])?, Some(4));

        Ok(())
    }

    #[test_case(build_persistent_storage)]
    #[test_case(build_in_memory_storage)]
    fn test_state_and_chain_reader(constructor: Constructor) -> Result<()> {
        let (storage, _directory) = constructor()?;
        let state = State::from_iter([(Address::repeat_byte(7), U256::from(1000))]);

        let block = Arc::new(Block::new(
            Header {
                number: 1,
                state_root: state.root(),
                ..Header::default()
            },
            Body::default(),
        ));

        let mut batch = storage.begin_write();
        batch.write_block(&block)?;
        batch.commit()?;

        assert!(!storage.has_block_and_state(block.hash(), 1)?);

        let mut batch = storage.begin_write();
        batch.write_state(&state)?;
        batch.commit()?;

        assert!(storage.has_block_and_state(block.hash(), 1)?);
        assert_eq!(storage.state(state.root())?, Some(state.clone()));

        let mut batch = storage.begin_write();
        batch.delete_state(state.root());
        batch.commit()?;

        assert!(!storage.has_state(state.root())?);
        assert!(storage.has_block(block.hash(), 1)?);

        Ok(())
    }

    #[test]
    fn test_reads_survive_reopening() -> Result<()> {
        let directory = TempDir::new()?;
        let block = block(1, H256::zero(), 1);

        {
            let storage = open_persistent(&directory)?;
            let mut batch = storage.begin_write();
            batch.write_block(&block)?;
            batch.write_canonical_hash(1, block.hash())?;
            batch.write_head_block_hash(block.hash())?;
            batch.commit()?;
        }

        let storage = open_persistent(&directory)?;

        assert_eq!(storage.head_block()?, block);
        assert_eq!(storage.block_by_number(1)?, Some(block));

        Ok(())
    }

    fn open_persistent(directory: &TempDir) -> Result<Storage> {
        let database = Database::persistent("chain", directory.path(), ByteSize::mib(16))?;
        Ok(Storage::new(database, CacheConfig::default()))
    }

    fn build_persistent_storage() -> Result<(Storage, Option<TempDir>)> {
        let directory = TempDir::new()?;
        let storage = open_persistent(&directory)?;
        Ok((storage, Some(directory)))
    }

    fn build_in_memory_storage() -> Result<(Storage, Option<TempDir>)> {
        Ok((Storage::new(Database::in_memory(), CacheConfig::default()), None))
    }
}
