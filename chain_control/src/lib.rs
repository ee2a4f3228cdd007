//! Maintenance of the canonical chain.
//!
//! This crate handles the following concerns:
//! - [Inserting batches of blocks](`Blockchain::insert_chain`).
//! - [Choosing between competing chains](`ForkChoice`).
//! - Reorganizing the canonical chain and recovering side chains with pruned state.
//! - [Delaying blocks that cannot be linked yet](`FutureBlockQueue`).
//! - [Notifying other components about changes to the chain](`ChainEvent`).
//! - Testing.

pub use crate::{
    bad_blocks::BadBlocks,
    blockchain::{Blockchain, WriteStatus},
    config::ChainConfig,
    error::{Error, InsertError},
    events::ChainEvent,
    fork_choice::{ForkChoice, Preserve},
    future_blocks::FutureBlockQueue,
    insert_iterator::{InsertIterator, Outcome},
    reorg::ReorgPlan,
    stats::InsertStats,
    unbounded_sink::UnboundedSink,
};

mod bad_blocks;
mod blockchain;
mod config;
mod error;
mod events;
mod fork_choice;
mod future_blocks;
mod insert_iterator;
mod reorg;
mod stats;
mod unbounded_sink;

#[cfg(test)]
mod helpers;
