use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, ensure, Result};
use parking_lot::Mutex;
use types::{block::Header, error::BlockError, primitives::H256, traits::ChainReader};

use crate::{
    error::Error,
    verification::{self, Abort, VerificationResults},
};

pub trait ConsensusEngine: Send + Sync {
    /// Starts verifying `headers` in the background.
    ///
    /// The receiver yields exactly one result per header in input order unless verification is
    /// aborted first. `seals[index]` controls whether the seal of `headers[index]` is checked.
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> Result<(Abort, VerificationResults)>;
}

impl<E: ConsensusEngine + ?Sized> ConsensusEngine for Arc<E> {
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> Result<(Abort, VerificationResults)> {
        self.as_ref().verify_headers(chain, headers, seals)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MockVerdict {
    Invalid,
    Future,
    UnknownAncestor,
}

/// Accepts every header except those given a verdict with [`MockConsensusEngine::set_verdict`].
#[derive(Clone, Default)]
pub struct MockConsensusEngine {
    verdicts: Arc<Mutex<HashMap<H256, MockVerdict>>>,
}

impl MockConsensusEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verdict(&self, hash: H256, verdict: MockVerdict) {
        self.verdicts.lock().insert(hash, verdict);
    }

    pub fn clear_verdict(&self, hash: H256) {
        self.verdicts.lock().remove(&hash);
    }

    fn verdict(&self, hash: H256) -> Result<()> {
        match self.verdicts.lock().get(&hash).copied() {
            None => Ok(()),
            Some(MockVerdict::Invalid) => bail!(Error::MockFailure { hash }),
            Some(MockVerdict::Future) => bail!(BlockError::FutureBlock),
            Some(MockVerdict::UnknownAncestor) => bail!(BlockError::UnknownAncestor),
        }
    }
}

impl ConsensusEngine for MockConsensusEngine {
    fn verify_headers(
        &self,
        _chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> Result<(Abort, VerificationResults)> {
        ensure!(
            headers.len() == seals.len(),
            "{} headers submitted with {} seal flags",
            headers.len(),
            seals.len(),
        );

        // Verdicts are looked up when verification starts.
        let outcomes = headers
            .iter()
            .map(|header| self.verdict(header.hash()))
            .collect::<Vec<_>>();

        let outcomes = Mutex::new(outcomes.into_iter().map(Some).collect::<Vec<_>>());

        verification::spawn(headers.len(), move |index| {
            outcomes.lock()[index]
                .take()
                .expect("each index is verified exactly once")
        })
    }
}
