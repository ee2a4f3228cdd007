use anyhow::Result;
use log::debug;
use types::{
    block::{Block, Body, Header},
    primitives::{Address, Difficulty, UnixSeconds},
    state::State,
    transaction::{self, LogRecord, Transaction},
};

use crate::{ledger_processor::LedgerProcessor, state_processor::ProcessOutput, StateProcessor as _};

/// Assembles a child of `parent` with header commitments that match its execution.
///
/// The difficulty, gas limit and coinbase are inherited from the parent unless overridden.
/// The timestamp defaults to one second after the parent.
pub struct BlockBuilder {
    processor: LedgerProcessor,
    state: State,
    header: Header,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    #[must_use]
    pub fn new(processor: LedgerProcessor, parent: &Header, parent_state: State) -> Self {
        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            difficulty: parent.difficulty,
            timestamp: parent.timestamp + 1,
            coinbase: parent.coinbase,
            gas_limit: parent.gas_limit,
            ..Header::default()
        };

        Self {
            processor,
            state: parent_state,
            header,
            transactions: vec![],
        }
    }

    #[must_use]
    pub fn coinbase(mut self, coinbase: Address) -> Self {
        self.header.coinbase = coinbase;
        self
    }

    #[must_use]
    pub fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.header.difficulty = difficulty;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: UnixSeconds) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn extra_data(mut self, extra_data: impl Into<Vec<u8>>) -> Self {
        self.header.extra_data = extra_data.into();
        self
    }

    #[must_use]
    pub fn transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    /// Executes the transactions, fills in the header commitments and passes the header to `seal`.
    ///
    /// Returns the sealed block along with its post-state and execution results.
    pub fn build(
        self,
        seal: impl FnOnce(Header) -> Header,
    ) -> Result<(Block, State, ProcessOutput)> {
        let Self {
            processor,
            mut state,
            mut header,
            transactions,
        } = self;

        header.transactions_root = transaction::transactions_root(&transactions);

        let body = Body { transactions };
        let unsealed = Block::new(header.clone(), body.clone());
        let output = processor.process(&unsealed, &mut state)?;

        header.gas_used = output.gas_used;
        header.receipts_root = transaction::receipts_root(&output.receipts);
        header.state_root = state.root();

        let block = Block::new(seal(header), body);

        debug!(
            "built block {:?} (number: {}, transactions: {})",
            block.hash(),
            block.number(),
            block.transactions().len(),
        );

        // Log records carry the hash of the unsealed block. Rebuild them for the final one.
        let output = ProcessOutput {
            logs: LogRecord::from_receipts(
                block.hash(),
                block.number(),
                &output.receipts,
                false,
            ),
            ..output
        };

        Ok((block, state, output))
    }
}
