use std::sync::Arc;

use log::debug;
use strum::AsRefStr;
use types::{block::Block, primitives::H256, transaction::LogRecord};

use crate::unbounded_sink::UnboundedSink;

#[derive(Clone, Debug, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChainEvent {
    /// Sent once per insertion for the last block that became the head.
    ChainHead { block: Arc<Block> },
    /// Sent for blocks stored outside the canonical chain, including blocks dropped by a reorg.
    ChainSide { block: Arc<Block> },
    NewLogs { logs: Vec<LogRecord> },
    RemovedLogs { logs: Vec<LogRecord> },
    Reorg {
        common_ancestor: H256,
        dropped: Vec<H256>,
        added: Vec<H256>,
    },
}

impl ChainEvent {
    pub(crate) fn send(self, tx: &impl UnboundedSink<Self>) {
        if let Err(event) = tx.unbounded_send(self) {
            debug!(
                "send of {} event failed because the receiver was dropped",
                event.as_ref(),
            );
        }
    }
}
