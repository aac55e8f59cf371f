//! Message delivery mechanics (publish side and receive side).
//!
//! Projections never talk to each other or to a shared registry: every
//! collaborator they publish to is handed to them as a [`Publisher`] when the
//! wiring is set up. A `Publisher` is usually the sending half of a worker's
//! inbound queue or of the shared report channel.
//!
//! ## Delivery guarantees
//!
//! - Messages from one publisher arrive in publish order.
//! - No persistence: a dropped receiver loses undelivered messages.
//! - Publishing never blocks.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The receiving side is gone.
    #[error("receiver disconnected")]
    Disconnected,

    /// Publish failed due to internal lock poisoning.
    #[error("publisher lock poisoned")]
    Poisoned,
}

/// Sending side of a message channel.
pub trait Publisher<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), PublishError>;
}

impl<M: Send> Publisher<M> for mpsc::Sender<M> {
    fn publish(&self, message: M) -> Result<(), PublishError> {
        self.send(message).map_err(|_| PublishError::Disconnected)
    }
}

impl<M, P> Publisher<M> for Arc<P>
where
    P: Publisher<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), PublishError> {
        (**self).publish(message)
    }
}

/// Receiving side of a subscription.
///
/// Subscriptions are designed for single-threaded consumption.
///
/// ```ignore
/// let sub = bus.subscribe();
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)) {
///         Ok(report) => observe(report),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}
