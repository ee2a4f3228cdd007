pub use crate::{
    block_builder::BlockBuilder,
    error::Error,
    ledger_processor::{LedgerProcessor, ProcessorConfig},
    state_processor::{MockStateProcessor, ProcessOutput, StateProcessor},
    validator::{BlockValidator, MockValidator, Validator},
};

mod block_builder;
mod error;
mod ledger_processor;
mod state_processor;
mod validator;
