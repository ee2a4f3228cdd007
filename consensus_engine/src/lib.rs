pub use crate::{
    consensus_engine::{ConsensusEngine, MockConsensusEngine, MockVerdict},
    error::Error,
    keccak_pow::{EngineConfig, KeccakPow},
    verification::{Abort, VerificationResults},
};

mod consensus_engine;
mod error;
mod keccak_pow;
mod verification;
