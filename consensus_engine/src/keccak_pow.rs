use std::sync::Arc;

use anyhow::{ensure, Result};
use derivative::Derivative;
use serde::Deserialize;
use types::{
    block::Header,
    clock::Clock,
    error::BlockError,
    hashing,
    primitives::{Gas, UnixSeconds, U256},
    traits::ChainReader,
};

use crate::{
    consensus_engine::ConsensusEngine,
    error::Error,
    verification::{self, Abort, VerificationResults},
};

// Gas limits above this cannot be represented by signed 64-bit integers in other clients.
const MAX_GAS_LIMIT: Gas = 0x7fff_ffff_ffff_ffff;

#[derive(Clone, Copy, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    #[derivative(Default(value = "15"))]
    pub allowed_future_block_time: UnixSeconds,
    #[derivative(Default(value = "32"))]
    pub max_extra_data_size: usize,
    #[derivative(Default(value = "1024"))]
    pub gas_limit_bound_divisor: Gas,
    #[derivative(Default(value = "5000"))]
    pub min_gas_limit: Gas,
}

/// Proof-of-work engine whose seal is a Keccak-256 hash below a difficulty-derived target.
#[derive(Clone)]
pub struct KeccakPow {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl ConsensusEngine for KeccakPow {
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> Result<(Abort, VerificationResults)> {
        ensure!(
            headers.len() == seals.len(),
            "{} headers submitted with {} seal flags",
            headers.len(),
            seals.len(),
        );

        let engine = self.clone();
        let count = headers.len();

        verification::spawn(count, move |index| {
            engine.verify_header(chain.as_ref(), &headers, index, seals[index])
        })
    }
}

impl KeccakPow {
    #[must_use]
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    #[must_use]
    pub const fn config(&self) -> EngineConfig {
        self.config
    }

    /// Searches for the lowest nonce that satisfies the difficulty of `header`.
    ///
    /// Headers with zero difficulty are sealed with a zero nonce.
    #[must_use]
    pub fn seal(mut header: Header) -> Header {
        header.nonce = 0;

        if header.difficulty.is_zero() {
            return header;
        }

        let seal_hash = header.seal_hash();

        while !meets_difficulty(seal_hash.as_bytes(), header.nonce, header.difficulty) {
            header.nonce += 1;
        }

        header
    }

    /// Verifies `headers[index]`, using `headers[index - 1]` as its parent when they are linked.
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        headers: &[Header],
        index: usize,
        seal: bool,
    ) -> Result<()> {
        let header = &headers[index];
        let hash = header.hash();

        if chain.header(hash, header.number)?.is_some() {
            return Ok(());
        }

        ensure!(
            header.timestamp <= self.clock.now() + self.config.allowed_future_block_time,
            BlockError::FutureBlock,
        );

        let in_batch = index
            .checked_sub(1)
            .map(|previous| &headers[previous])
            .filter(|previous| previous.hash() == header.parent_hash);

        let from_chain;

        let parent = match in_batch {
            Some(parent) => parent,
            None => {
                let Some(parent_number) = header.number.checked_sub(1) else {
                    return Err(BlockError::UnknownAncestor.into());
                };

                from_chain = chain.header(header.parent_hash, parent_number)?;

                match from_chain.as_deref() {
                    Some(parent) => parent,
                    None => return Err(BlockError::UnknownAncestor.into()),
                }
            }
        };

        self.verify_against_parent(header, parent)?;

        if seal {
            verify_seal(header)?;
        }

        Ok(())
    }

    fn verify_against_parent(&self, header: &Header, parent: &Header) -> Result<()> {
        let EngineConfig {
            max_extra_data_size,
            gas_limit_bound_divisor,
            min_gas_limit,
            ..
        } = self.config;

        ensure!(
            header.extra_data.len() <= max_extra_data_size,
            Error::ExtraDataTooLong {
                size: header.extra_data.len(),
                maximum: max_extra_data_size,
            },
        );

        ensure!(
            header.timestamp > parent.timestamp,
            Error::OlderBlockTime {
                timestamp: header.timestamp,
                parent_timestamp: parent.timestamp,
            },
        );

        ensure!(
            Some(header.number) == parent.number.checked_add(1),
            Error::InvalidNumber {
                number: header.number,
                parent_number: parent.number,
            },
        );

        ensure!(
            header.gas_limit >= min_gas_limit,
            Error::GasLimitTooLow {
                gas_limit: header.gas_limit,
                minimum: min_gas_limit,
            },
        );

        let maximum_change = parent.gas_limit / gas_limit_bound_divisor;

        ensure!(
            header.gas_limit <= MAX_GAS_LIMIT
                && header.gas_limit.abs_diff(parent.gas_limit) < maximum_change.max(1),
            Error::GasLimitChangeTooLarge {
                gas_limit: header.gas_limit,
                parent_gas_limit: parent.gas_limit,
                maximum_change,
            },
        );

        ensure!(
            header.gas_used <= header.gas_limit,
            Error::GasUsedExceedsLimit {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            },
        );

        Ok(())
    }
}

fn verify_seal(header: &Header) -> Result<()> {
    if header.difficulty.is_zero() {
        ensure!(
            header.nonce == 0,
            Error::NonzeroNonce {
                nonce: header.nonce
            },
        );

        return Ok(());
    }

    ensure!(
        meets_difficulty(
            header.seal_hash().as_bytes(),
            header.nonce,
            header.difficulty,
        ),
        Error::InvalidProofOfWork {
            hash: header.hash(),
        },
    );

    Ok(())
}

fn meets_difficulty(seal_hash: &[u8], nonce: u64, difficulty: U256) -> bool {
    let mut preimage = seal_hash.to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());

    let work = U256::from_big_endian(hashing::keccak256(preimage).as_bytes());

    work <= U256::MAX / difficulty
}
