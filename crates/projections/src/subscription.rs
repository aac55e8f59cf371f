use thiserror::Error;

use eventide_core::CheckpointTag;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subscription failed: {0}")]
pub struct SubscriptionError(pub String);

/// Source of committed events for one projection.
///
/// Delivery happens out of band: after `subscribe_from`, the source posts
/// `SubscriptionStarted`, then `CommittedEventReceived` messages (and
/// optionally `CheckpointSuggested`) to the projection's inbox, in strictly
/// increasing tag order, starting strictly after `from`.
pub trait SubscriptionSource: Send {
    fn subscribe_from(&mut self, from: &CheckpointTag) -> Result<(), SubscriptionError>;

    /// Stop delivering until `resume`; nothing is skipped.
    fn pause(&mut self);

    fn resume(&mut self);

    fn unsubscribe(&mut self);
}

impl<S: SubscriptionSource + ?Sized> SubscriptionSource for Box<S> {
    fn subscribe_from(&mut self, from: &CheckpointTag) -> Result<(), SubscriptionError> {
        (**self).subscribe_from(from)
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn unsubscribe(&mut self) {
        (**self).unsubscribe()
    }
}
