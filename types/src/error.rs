use thiserror::Error;

/// Conditions reported by header verification and body validation that the
/// insertion pipeline recovers from rather than treating as invalid blocks.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum BlockError {
    #[error("block already known")]
    KnownBlock,
    #[error("unknown ancestor")]
    UnknownAncestor,
    #[error("state of ancestor has been pruned")]
    PrunedAncestor,
    #[error("block is from the future")]
    FutureBlock,
}

impl BlockError {
    /// Finds a [`BlockError`] anywhere in the chain of `error`.
    #[must_use]
    pub fn classify(error: &anyhow::Error) -> Option<Self> {
        error.chain().find_map(|cause| cause.downcast_ref().copied())
    }
}
