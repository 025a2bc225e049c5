// ── Reading and connectivity subscriptions ──
//
// Public vocabulary for subscribing to a device. Both registration forms
// (plain callbacks, and target + action) are adapted at registration time
// into the one internal `Subscriber` shape the registry understands.

mod registry;
mod subscriber;

use std::fmt;

use crate::error::CoreError;
use crate::model::Reading;

pub use registry::ConnectionState;
pub(crate) use registry::SubscriptionRegistry;
pub(crate) use subscriber::Subscriber;

/// Error callback: receives the failure and returns `true` to request a
/// retry. When no error callback is registered, any error removes the
/// subscription.
pub type ErrorCallback = Box<dyn FnMut(&CoreError) -> bool + Send>;

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Readings,
    Connectivity,
}

/// Opaque handle identifying one subscription on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, topic: Topic) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.id)
    }
}

/// Action invoked on a subscription target for every reading.
///
/// Exactly two shapes are accepted: an action that takes no argument, and
/// one that takes the reading.
pub enum Action<T> {
    Notify(fn(&T)),
    Reading(fn(&T, &Reading)),
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Action<T> {}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notify(_) => f.write_str("Action::Notify"),
            Self::Reading(_) => f.write_str("Action::Reading"),
        }
    }
}
