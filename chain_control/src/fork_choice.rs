use core::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use anyhow::Result;
use block_store::Storage;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use types::{block::Header, primitives::Difficulty};

use crate::error::Error;

pub type Preserve = Box<dyn Fn(&Header) -> bool + Send + Sync>;

/// Decides whether a block should replace the current head.
///
/// Blocks are compared by total difficulty. Ties are broken in favor of the lower block number,
/// then by the preserve predicate and finally by a coin flip. The random generator is seeded
/// once per process.
pub struct ForkChoice {
    storage: Arc<Storage>,
    terminal_total_difficulty: Option<Difficulty>,
    preserve: Option<Preserve>,
    rng: Mutex<StdRng>,
}

impl Debug for ForkChoice {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        formatter
            .debug_struct("ForkChoice")
            .field("terminal_total_difficulty", &self.terminal_total_difficulty)
            .field("preserve", &self.preserve.is_some())
            .finish_non_exhaustive()
    }
}

impl ForkChoice {
    #[must_use]
    pub fn new(storage: Arc<Storage>, terminal_total_difficulty: Option<Difficulty>) -> Self {
        Self {
            storage,
            terminal_total_difficulty,
            preserve: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn set_preserve(&mut self, preserve: impl Fn(&Header) -> bool + Send + Sync + 'static) {
        self.preserve = Some(Box::new(preserve));
    }

    pub fn reorg_needed(&self, current: &Header, candidate: &Header) -> Result<bool> {
        let local_td = self.total_difficulty(current)?;
        let extern_td = self.total_difficulty(candidate)?;

        // Past the terminal total difficulty heads are chosen by an external consensus layer.
        if let Some(terminal_total_difficulty) = self.terminal_total_difficulty {
            if extern_td >= terminal_total_difficulty {
                return Ok(true);
            }
        }

        if extern_td != local_td {
            return Ok(extern_td > local_td);
        }

        // Preferring the lower number makes selfish mining less profitable.
        if candidate.number != current.number {
            return Ok(candidate.number < current.number);
        }

        let (current_preserve, extern_preserve) = match &self.preserve {
            Some(preserve) => (preserve(current), preserve(candidate)),
            None => (false, false),
        };

        Ok(!current_preserve && (extern_preserve || self.rng.lock().gen_bool(0.5)))
    }

    fn total_difficulty(&self, header: &Header) -> Result<Difficulty> {
        let hash = header.hash();

        self.storage
            .total_difficulty(hash, header.number)?
            .ok_or_else(|| Error::MissingTotalDifficulty { hash }.into())
    }
}
