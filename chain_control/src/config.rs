use core::{num::NonZeroUsize, time::Duration};

use block_store::CacheConfig;
use bytesize::ByteSize;
use derivative::Derivative;
use nonzero_ext::nonzero;
use serde::Deserialize;
use serde_with::{As, DurationSeconds};
use types::primitives::{BlockNumber, Difficulty};

#[derive(Clone, Copy, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    #[derivative(Default(value = "nonzero!(256_usize)"))]
    pub block_cache_size: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(512_usize)"))]
    pub header_cache_size: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(2048_usize)"))]
    pub number_cache_size: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(1024_usize)"))]
    pub td_cache_size: NonZeroUsize,
    #[derivative(Default(value = "nonzero!(256_usize)"))]
    pub max_future_blocks: NonZeroUsize,
    #[derivative(Default(value = "Duration::from_secs(30)"))]
    #[serde(with = "As::<DurationSeconds<u64>>")]
    pub max_time_future_blocks: Duration,
    #[derivative(Default(value = "Duration::from_secs(5)"))]
    #[serde(with = "As::<DurationSeconds<u64>>")]
    pub future_blocks_poll_interval: Duration,
    #[derivative(Default(value = "Duration::from_secs(30)"))]
    #[serde(with = "As::<DurationSeconds<u64>>")]
    pub verification_timeout: Duration,
    #[derivative(Default(value = "nonzero!(2048_usize)"))]
    pub side_chain_batch_blocks: NonZeroUsize,
    #[derivative(Default(value = "ByteSize::mib(64)"))]
    pub side_chain_batch_memory: ByteSize,
    #[derivative(Default(value = "63"))]
    pub large_reorg_threshold: usize,
    #[derivative(Default(value = "nonzero!(10_usize)"))]
    pub bad_block_limit: NonZeroUsize,
    // Number of most recent canonical states to keep. All states are kept if `None`.
    pub state_history: Option<BlockNumber>,
    pub terminal_total_difficulty: Option<Difficulty>,
}

impl ChainConfig {
    #[must_use]
    pub const fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            blocks: self.block_cache_size,
            headers: self.header_cache_size,
            numbers: self.number_cache_size,
            total_difficulties: self.td_cache_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() -> Result<()> {
        let config = serde_yaml::from_str::<ChainConfig>(
            "
            max_future_blocks: 16
            verification_timeout: 3
            side_chain_batch_memory: 1 MiB
            state_history: 128
            ",
        )?;

        assert_eq!(config.max_future_blocks, nonzero!(16_usize));
        assert_eq!(config.verification_timeout, Duration::from_secs(3));
        assert_eq!(config.side_chain_batch_memory, ByteSize::mib(1));
        assert_eq!(config.state_history, Some(128));
        assert_eq!(config.large_reorg_threshold, 63);
        assert_eq!(config.max_time_future_blocks, Duration::from_secs(30));
        assert_eq!(config.cache_config().blocks, nonzero!(256_usize));

        Ok(())
    }

    #[test]
    fn durations_are_read_as_whole_seconds() -> Result<()> {
        let config = serde_yaml::from_str::<ChainConfig>(
            "
            max_time_future_blocks: 12
            future_blocks_poll_interval: 1
            ",
        )?;

        assert_eq!(config.max_time_future_blocks, Duration::from_secs(12));
        assert_eq!(config.future_blocks_poll_interval, Duration::from_secs(1));

        serde_yaml::from_str::<ChainConfig>("verification_timeout: 1.5")
            .expect_err("fractional seconds are not accepted");

        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        serde_yaml::from_str::<ChainConfig>("max_uncles: 2")
            .expect_err("max_uncles is not a configuration field");
    }
}
