pub use crate::{
    cache::{CacheConfig, CacheLayer},
    error::Error,
    genesis::Genesis,
    recency_cache::RecencyCache,
    storage::{Storage, WriteBatch},
};

mod cache;
mod error;
mod genesis;
mod keys;
mod recency_cache;
mod storage;
