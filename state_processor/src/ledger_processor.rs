use anyhow::{ensure, Result};
use derivative::Derivative;
use serde::Deserialize;
use types::{
    block::Block,
    hashing,
    primitives::{Gas, H256, U256},
    state::{State, UnpaidRewards},
    transaction::{Log, LogRecord, Receipt, Transaction},
};

use crate::{error::Error, state_processor::ProcessOutput, StateProcessor};

#[derive(Clone, Copy, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    #[derivative(Default(value = "U256::from(2_000_000_000_000_000_000_u128)"))]
    pub block_reward: U256,
    #[derivative(Default(value = "21_000"))]
    pub transfer_gas: Gas,
}

/// Executes value transfers over an account ledger.
#[derive(Clone, Copy, Default)]
pub struct LedgerProcessor {
    config: ProcessorConfig,
}

impl StateProcessor for LedgerProcessor {
    fn process(&self, block: &Block, state: &mut State) -> Result<ProcessOutput> {
        let gas_limit = block.header().gas_limit;
        let transfer_topic = transfer_topic();

        let mut gas_used: Gas = 0;
        let mut receipts = Vec::with_capacity(block.transactions().len());

        for (index, transaction) in block.transactions().iter().enumerate() {
            gas_used = gas_used
                .checked_add(self.config.transfer_gas)
                .filter(|gas_used| *gas_used <= gas_limit)
                .ok_or(Error::GasLimitReached { index, gas_limit })?;

            let success = self.apply(index, transaction, state)?;

            let logs = if success {
                vec![transfer_log(transfer_topic, transaction)]
            } else {
                vec![]
            };

            receipts.push(Receipt {
                transaction_hash: transaction.hash(),
                success,
                gas_used: self.config.transfer_gas,
                cumulative_gas_used: gas_used,
                logs,
            });
        }

        let mut unpaid_rewards = UnpaidRewards::new();

        if !self.config.block_reward.is_zero() {
            unpaid_rewards.insert(block.header().coinbase, self.config.block_reward);
        }

        let logs = LogRecord::from_receipts(block.hash(), block.number(), &receipts, false);

        Ok(ProcessOutput {
            receipts,
            unpaid_rewards,
            logs,
            gas_used,
        })
    }
}

impl LedgerProcessor {
    #[must_use]
    pub const fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> ProcessorConfig {
        self.config
    }

    // Returns whether the value was transferred.
    // A transfer the sender cannot afford still consumes the nonce.
    fn apply(&self, index: usize, transaction: &Transaction, state: &mut State) -> Result<bool> {
        let Transaction {
            nonce,
            from,
            to,
            value,
        } = *transaction;

        let mut sender = state.account(from);

        ensure!(
            nonce == sender.nonce,
            Error::InvalidNonce {
                index,
                sender: from,
                transaction_nonce: nonce,
                account_nonce: sender.nonce,
            },
        );

        sender.nonce += 1;

        let Some(remaining) = sender.balance.checked_sub(value) else {
            state.set_account(from, sender);
            return Ok(false);
        };

        sender.balance = remaining;
        state.set_account(from, sender);

        let mut recipient = state.account(to);
        recipient.balance = recipient.balance.saturating_add(value);
        state.set_account(to, recipient);

        Ok(true)
    }
}

fn transfer_topic() -> H256 {
    hashing::keccak256(b"Transfer(address,address,uint256)")
}

fn transfer_log(topic: H256, transaction: &Transaction) -> Log {
    let mut data = vec![0; 32];
    transaction.value.to_big_endian(&mut data);

    Log {
        address: transaction.to,
        topics: vec![topic, transaction.from.into(), transaction.to.into()],
        data,
    }
}
