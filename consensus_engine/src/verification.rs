// Results are sent in input order even though workers finish out of order.
// A result that arrives early waits in `pending` until every result before it has been sent.

use core::{any::Any, panic::AssertUnwindSafe};
use std::{
    collections::BTreeMap,
    panic,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::Builder,
};

use anyhow::{Error, Result};
use log::debug;
use parking_lot::Mutex;

pub type VerificationResults = Receiver<Result<()>>;

/// Stops a verification started by [`ConsensusEngine::verify_headers`].
///
/// Aborting is idempotent and also happens when the handle is dropped.
/// Headers that are already being verified finish, but their results are discarded.
///
/// [`ConsensusEngine::verify_headers`]: crate::ConsensusEngine::verify_headers
pub struct Abort {
    shared: Arc<Shared>,
}

impl Drop for Abort {
    fn drop(&mut self) {
        self.abort();
    }
}

impl Abort {
    pub fn abort(&self) {
        let mut critical = self.shared.critical.lock();
        critical.aborted = true;
        critical.sender = None;
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.shared.critical.lock().aborted
    }
}

struct Shared {
    count: usize,
    critical: Mutex<Critical>,
}

struct Critical {
    aborted: bool,
    next_to_verify: usize,
    next_to_send: usize,
    pending: BTreeMap<usize, Result<()>>,
    // Dropped once the last result is sent so that the receiver observes disconnection.
    sender: Option<Sender<Result<()>>>,
}

impl Critical {
    fn deliver(&mut self, index: usize, result: Result<()>, count: usize) {
        if self.aborted {
            return;
        }

        self.pending.insert(index, result);

        while let Some(result) = self.pending.remove(&self.next_to_send) {
            if let Some(sender) = &self.sender {
                if sender.send(result).is_err() {
                    debug!("verification results dropped; stopping verification");
                    self.aborted = true;
                    self.sender = None;
                    return;
                }
            }

            self.next_to_send += 1;
        }

        if self.next_to_send == count {
            self.sender = None;
        }
    }
}

/// Runs `verify` for every index in `0..count` on up to `num_cpus::get()` named worker threads.
pub fn spawn<F>(count: usize, verify: F) -> Result<(Abort, VerificationResults)>
where
    F: Fn(usize) -> Result<()> + Send + Sync + 'static,
{
    let (sender, receiver) = mpsc::channel();

    let shared = Arc::new(Shared {
        count,
        critical: Mutex::new(Critical {
            aborted: false,
            next_to_verify: 0,
            next_to_send: 0,
            pending: BTreeMap::new(),
            sender: (count > 0).then_some(sender),
        }),
    });

    let verify = Arc::new(verify);

    for index in 0..num_cpus::get().min(count) {
        let shared = Arc::clone(&shared);
        let verify = Arc::clone(&verify);

        Builder::new()
            .name(format!("header-verifier-{index}"))
            .spawn(move || run_worker(&shared, verify.as_ref()))?;
    }

    Ok((Abort { shared }, receiver))
}

fn run_worker(shared: &Shared, verify: &impl Fn(usize) -> Result<()>) {
    loop {
        let index = {
            let mut critical = shared.critical.lock();

            if critical.aborted || critical.next_to_verify == shared.count {
                break;
            }

            let index = critical.next_to_verify;
            critical.next_to_verify += 1;
            index
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| verify(index)))
            .unwrap_or_else(|payload| Err(payload_into_error(payload)));

        shared
            .critical
            .lock()
            .deliver(index, result, shared.count);
    }
}

fn payload_into_error(payload: Box<dyn Any + Send + 'static>) -> Error {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return Error::msg(format!("header verification panicked: {string}")),
        Err(other) => other,
    };

    match payload.downcast::<&str>() {
        Ok(string) => Error::msg(format!("header verification panicked: {string}")),
        Err(_) => Error::msg("header verification panicked with payload of unknown type"),
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::thread;

    use anyhow::bail;

    use super::*;

    #[test]
    fn results_arrive_in_input_order() -> Result<()> {
        let (_abort, results) = spawn(16, |index| {
            // Later indices finish first.
            thread::sleep(Duration::from_millis(16 - index as u64));

            if index % 5 == 0 {
                bail!("header {index} is invalid");
            }

            Ok(())
        })?;

        let outcomes = results
            .iter()
            .map(|result| result.is_ok())
            .collect::<Vec<_>>();

        let expected = (0..16).map(|index| index % 5 != 0).collect::<Vec<_>>();

        assert_eq!(outcomes, expected);

        Ok(())
    }

    #[test]
    fn empty_verification_disconnects_immediately() -> Result<()> {
        let (_abort, results) = spawn(0, |_| Ok(()))?;

        results.recv().expect_err("no results are sent for an empty batch");

        Ok(())
    }

    #[test]
    fn abort_is_idempotent_and_disconnects_results() -> Result<()> {
        let (abort, results) = spawn(1_000, |_| {
            thread::sleep(Duration::from_millis(1));
            Ok(())
        })?;

        abort.abort();
        abort.abort();

        assert!(abort.is_aborted());

        // Results sent before the abort may still be buffered.
        let received = results.iter().count();

        assert!(received < 1_000);

        Ok(())
    }

    #[test]
    fn panics_are_reported_as_errors() -> Result<()> {
        let (_abort, results) = spawn(2, |index| {
            assert_ne!(index, 1, "verifier bug");
            Ok(())
        })?;

        results.recv()??;

        let error = results.recv()?.expect_err("second header should fail");

        assert!(error.to_string().contains("verifier bug"));

        Ok(())
    }
}
