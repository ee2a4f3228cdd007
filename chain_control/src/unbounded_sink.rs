use futures::{
    channel::mpsc::{TrySendError, UnboundedSender},
    sink::Drain,
};

/// Destination for [`ChainEvent`]s that never blocks the sender.
///
/// [`ChainEvent`]: crate::ChainEvent
pub trait UnboundedSink<T>: Send + Sync + 'static {
    fn unbounded_send(&self, message: T) -> Result<(), T>;
}

impl<T, S: UnboundedSink<T>> UnboundedSink<T> for Option<S> {
    fn unbounded_send(&self, message: T) -> Result<(), T> {
        match self {
            Some(sink) => sink.unbounded_send(message),
            None => Ok(()),
        }
    }
}

impl<T: Send + 'static> UnboundedSink<T> for UnboundedSender<T> {
    fn unbounded_send(&self, message: T) -> Result<(), T> {
        self.unbounded_send(message)
            .map_err(TrySendError::into_inner)
    }
}

impl<T: Send + Sync + 'static> UnboundedSink<T> for Drain<T> {
    fn unbounded_send(&self, _message: T) -> Result<(), T> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::{channel::mpsc, sink};

    use super::*;

    #[test]
    fn absent_and_draining_sinks_accept_everything() {
        assert_eq!(None::<UnboundedSender<u8>>.unbounded_send(1), Ok(()));
        assert_eq!(sink::drain::<u8>().unbounded_send(2), Ok(()));
    }

    #[test]
    fn closed_channel_returns_message() {
        let (tx, rx) = mpsc::unbounded();

        assert_eq!(Some(tx.clone()).unbounded_send(3), Ok(()));

        drop(rx);

        assert_eq!(UnboundedSink::unbounded_send(&tx, 4), Err(4));
    }
}
