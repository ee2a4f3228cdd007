// Each block is validated only when the cursor reaches it.
// This lets body validation of block N observe block N - 1 after it has been written.

use core::time::Duration;
use std::sync::{mpsc::RecvTimeoutError, Arc};

use anyhow::{Error as AnyhowError, Result};
use consensus_engine::{Abort, VerificationResults};
use state_processor::Validator;
use types::{block::Block, error::BlockError, traits::ChainReader};

use crate::error::Error;

/// Classification of the block under the cursor.
#[derive(Debug)]
pub enum Outcome {
    /// The block and its state are already stored.
    Known(Arc<Block>),
    /// The block passed header verification and body validation.
    Verified(Arc<Block>),
    /// The parent is stored but its state is not.
    PrunedAncestor(Arc<Block>),
    FutureBlock(Arc<Block>),
    UnknownAncestor(Arc<Block>),
    Failed(Arc<Block>, AnyhowError),
}

impl Outcome {
    fn classify(block: Arc<Block>, result: Result<()>) -> Self {
        let Err(error) = result else {
            return Self::Verified(block);
        };

        match BlockError::classify(&error) {
            Some(BlockError::KnownBlock) => Self::Known(block),
            Some(BlockError::PrunedAncestor) => Self::PrunedAncestor(block),
            Some(BlockError::FutureBlock) => Self::FutureBlock(block),
            Some(BlockError::UnknownAncestor) => Self::UnknownAncestor(block),
            None => Self::Failed(block, error),
        }
    }

    /// Converts the outcome into the error it represents.
    ///
    /// [`Outcome::Known`] and [`Outcome::Verified`] become [`BlockError::KnownBlock`] and an
    /// empty error respectively, though callers are not expected to treat them as errors.
    #[must_use]
    pub fn into_error(self) -> (Arc<Block>, AnyhowError) {
        match self {
            Self::Known(block) => (block, BlockError::KnownBlock.into()),
            Self::Verified(block) => (block, AnyhowError::msg("block is valid")),
            Self::PrunedAncestor(block) => (block, BlockError::PrunedAncestor.into()),
            Self::FutureBlock(block) => (block, BlockError::FutureBlock.into()),
            Self::UnknownAncestor(block) => (block, BlockError::UnknownAncestor.into()),
            Self::Failed(block, error) => (block, error),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Position {
    Pending,
    At(usize),
    Exhausted,
}

/// Cursor over a batch of blocks paired with their header verification results.
///
/// Dropping the iterator aborts any verification still in progress.
pub struct InsertIterator<'chain> {
    chain: &'chain [Arc<Block>],
    abort: Abort,
    results: VerificationResults,
    validator: &'chain dyn Validator,
    reader: &'chain dyn ChainReader,
    timeout: Duration,
    position: Position,
}

impl<'chain> InsertIterator<'chain> {
    #[must_use]
    pub fn new(
        chain: &'chain [Arc<Block>],
        (abort, results): (Abort, VerificationResults),
        validator: &'chain dyn Validator,
        reader: &'chain dyn ChainReader,
        timeout: Duration,
    ) -> Self {
        Self {
            chain,
            abort,
            results,
            validator,
            reader,
            timeout,
            position: Position::Pending,
        }
    }

    /// Advances to the next block and classifies it.
    ///
    /// Returns `None` once every block has been returned.
    pub fn next(&mut self) -> Option<Outcome> {
        let index = match self.position {
            Position::Pending => 0,
            Position::At(index) => index + 1,
            Position::Exhausted => return None,
        };

        let Some(block) = self.chain.get(index) else {
            self.position = Position::Exhausted;
            self.abort.abort();
            return None;
        };

        self.position = Position::At(index);

        let result = match self.results.recv_timeout(self.timeout) {
            Ok(Ok(())) => self.validator.validate_body(self.reader, block),
            Ok(Err(error)) => Err(error),
            Err(RecvTimeoutError::Timeout) => Err(Error::VerificationTimeout {
                timeout: self.timeout,
            }
            .into()),
            Err(RecvTimeoutError::Disconnected) => Err(Error::VerificationAborted.into()),
        };

        Some(Outcome::classify(Arc::clone(block), result))
    }

    #[must_use]
    pub fn first(&self) -> Option<&'chain Arc<Block>> {
        self.chain.first()
    }

    /// Returns the block before the one under the cursor.
    ///
    /// Once the cursor is exhausted this is the last block in the batch.
    #[must_use]
    pub fn previous(&self) -> Option<&'chain Arc<Block>> {
        match self.position {
            Position::Pending => None,
            Position::At(index) => index.checked_sub(1).map(|previous| &self.chain[previous]),
            Position::Exhausted => self.chain.last(),
        }
    }

    /// Index of the block under the cursor, or the length of the batch once exhausted.
    #[must_use]
    pub fn index(&self) -> usize {
        match self.position {
            Position::Pending => 0,
            Position::At(index) => index,
            Position::Exhausted => self.chain.len(),
        }
    }

    #[must_use]
    pub fn processed_count(&self) -> usize {
        match self.position {
            Position::Pending => 0,
            Position::At(index) => index + 1,
            Position::Exhausted => self.chain.len(),
        }
    }

    /// Number of blocks after the one under the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chain.len() - self.processed_count()
    }
}

#[cfg(test)]
mod tests {
    use block_store::{CacheConfig, Genesis, Storage};
    use consensus_engine::{ConsensusEngine as _, MockConsensusEngine, MockVerdict};
    use database::Database;
    use state_processor::BlockValidator;
    use types::{
        block::{Body, Header},
        transaction,
    };

    use super::*;

    struct Fixture {
        storage: Arc<Storage>,
        engine: MockConsensusEngine,
        genesis: Arc<Block>,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let storage = Arc::new(Storage::new(Database::in_memory(), CacheConfig::default()));
            let genesis = Genesis::default().commit(&storage)?;

            Ok(Self {
                storage,
                engine: MockConsensusEngine::new(),
                genesis,
            })
        }

        fn iterator<'chain>(
            &'chain self,
            chain: &'chain [Arc<Block>],
        ) -> Result<InsertIterator<'chain>> {
            let headers = chain.iter().map(|block| block.header().clone()).collect();
            let seals = vec![true; chain.len()];
            let storage = Arc::clone(&self.storage);
            let chain_reader: Arc<dyn ChainReader> = storage;
            let verification = self.engine.verify_headers(chain_reader, headers, seals)?;

            Ok(InsertIterator::new(
                chain,
                verification,
                &BlockValidator,
                self.storage.as_ref(),
                Duration::from_secs(5),
            ))
        }

        fn write(&self, block: &Arc<Block>) -> Result<()> {
            let mut batch = self.storage.begin_write();
            batch.write_block(block)?;
            batch.commit()
        }
    }

    fn child(parent: &Block) -> Arc<Block> {
        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            timestamp: parent.timestamp() + 1,
            state_root: parent.state_root(),
            transactions_root: transaction::transactions_root(&[]),
            ..Header::default()
        };

        Arc::new(Block::new(header, Body::default()))
    }

    #[test]
    fn validation_observes_blocks_written_during_iteration() -> Result<()> {
        let fixture = Fixture::new()?;
        let first = child(&fixture.genesis);
        let second = child(&first);
        let chain = [Arc::clone(&fixture.genesis), first, second];
        let mut iterator = fixture.iterator(&chain)?;

        assert!(matches!(iterator.next(), Some(Outcome::Known(_))));
        assert!(matches!(iterator.next(), Some(Outcome::Verified(_))));
        assert_eq!(iterator.previous().map(|block| block.hash()), Some(chain[0].hash()));

        // The second block is validated only now, after its parent has been stored.
        fixture.write(&chain[1])?;

        assert!(matches!(iterator.next(), Some(Outcome::Verified(_))));
        assert_eq!(iterator.remaining(), 0);
        assert!(iterator.next().is_none());
        assert!(iterator.next().is_none());
        assert_eq!(iterator.index(), 3);
        assert_eq!(iterator.processed_count(), 3);

        Ok(())
    }

    #[test]
    fn unwritten_parent_is_unknown_ancestor() -> Result<()> {
        let fixture = Fixture::new()?;
        let first = child(&fixture.genesis);
        let chain = [child(&first)];
        let mut iterator = fixture.iterator(&chain)?;

        assert!(matches!(iterator.next(), Some(Outcome::UnknownAncestor(_))));

        Ok(())
    }

    #[test]
    fn verification_errors_skip_body_validation() -> Result<()> {
        let fixture = Fixture::new()?;
        let first = child(&fixture.genesis);
        let second = child(&first);

        fixture.engine.set_verdict(first.hash(), MockVerdict::Future);
        fixture.engine.set_verdict(second.hash(), MockVerdict::Invalid);

        let chain = [first, second];
        let mut iterator = fixture.iterator(&chain)?;

        assert!(matches!(iterator.next(), Some(Outcome::FutureBlock(_))));
        assert_eq!(iterator.remaining(), 1);

        let Some(Outcome::Failed(block, error)) = iterator.next() else {
            panic!("second block should fail verification");
        };

        assert_eq!(block.hash(), chain[1].hash());
        assert!(BlockError::classify(&error).is_none());

        Ok(())
    }

    #[test]
    fn stateless_parent_is_pruned_ancestor() -> Result<()> {
        let fixture = Fixture::new()?;

        let mut header = child(&fixture.genesis).header().clone();
        header.state_root = types::primitives::H256::repeat_byte(3);
        let stateless = Arc::new(Block::new(header, Body::default()));

        fixture.write(&stateless)?;

        let chain = [child(&stateless)];
        let mut iterator = fixture.iterator(&chain)?;

        let outcome = iterator.next().expect("chain has one block");

        assert!(matches!(outcome, Outcome::PrunedAncestor(_)));
        assert_eq!(
            BlockError::classify(&outcome.into_error().1),
            Some(BlockError::PrunedAncestor),
        );

        Ok(())
    }
}
