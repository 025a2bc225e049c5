// ── Internal subscriber abstraction ──
//
// Every registration form collapses into `Subscriber`: one item callback
// returning "keep going", one optional error callback returning "retry".

use std::sync::Weak;

use relayr_api::ConnectivityEvent;

use super::{Action, ErrorCallback, Topic};
use crate::device::Device;
use crate::error::CoreError;
use crate::model::Reading;

/// An item fanned out by the registry.
#[derive(Debug)]
pub(crate) enum Delivery {
    Reading(Reading),
    Connectivity(ConnectivityEvent),
    Failed(CoreError),
}

impl Delivery {
    pub(crate) fn topic(&self) -> Option<Topic> {
        match self {
            Self::Reading(_) => Some(Topic::Readings),
            Self::Connectivity(_) => Some(Topic::Connectivity),
            Self::Failed(_) => None,
        }
    }
}

type ItemCallback = Box<dyn FnMut(&Device, &Delivery) -> bool + Send>;

pub(crate) struct Subscriber {
    topic: Topic,
    on_item: ItemCallback,
    on_error: Option<ErrorCallback>,
}

impl Subscriber {
    pub(crate) fn topic(&self) -> Topic {
        self.topic
    }

    /// Deliver one item. Returns `false` when the subscriber wants to stop.
    pub(crate) fn deliver(&mut self, device: &Device, item: &Delivery) -> bool {
        (self.on_item)(device, item)
    }

    /// Report an error. Returns `true` when the subscriber asks for a retry.
    pub(crate) fn fail(&mut self, error: &CoreError) -> bool {
        self.on_error.as_mut().is_some_and(|on_error| on_error(error))
    }

    // ── Adapters ─────────────────────────────────────────────────────

    pub(crate) fn readings<F>(mut on_reading: F, on_error: Option<ErrorCallback>) -> Self
    where
        F: FnMut(&Device, &Reading) -> bool + Send + 'static,
    {
        Self {
            topic: Topic::Readings,
            on_item: Box::new(move |device, item| match item {
                Delivery::Reading(reading) => on_reading(device, reading),
                _ => true,
            }),
            on_error,
        }
    }

    pub(crate) fn connectivity<F>(mut on_event: F, on_error: Option<ErrorCallback>) -> Self
    where
        F: FnMut(&Device, &ConnectivityEvent) -> bool + Send + 'static,
    {
        Self {
            topic: Topic::Connectivity,
            on_item: Box::new(move |device, item| match item {
                Delivery::Connectivity(event) => on_event(device, event),
                _ => true,
            }),
            on_error,
        }
    }

    /// Adapt the target/action form. The target is held weakly: once it is
    /// dropped the subscription stops, and its errors are never retried.
    pub(crate) fn target<T>(
        target: Weak<T>,
        action: Action<T>,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self, CoreError>
    where
        T: Send + Sync + 'static,
    {
        let weak = target;
        if weak.strong_count() == 0 {
            return Err(CoreError::invalid("subscription target is no longer alive"));
        }

        let item_target = weak.clone();
        let on_item: ItemCallback = Box::new(move |_device, item| {
            let Delivery::Reading(reading) = item else {
                return true;
            };
            let Some(target) = item_target.upgrade() else {
                tracing::debug!("subscription target dropped, stopping");
                return false;
            };
            match action {
                Action::Notify(act) => act(&target),
                Action::Reading(act) => act(&target, reading),
            }
            true
        });

        let on_error = on_error.map(|mut user| -> ErrorCallback {
            Box::new(move |error| {
                // Always tell a live target; only a live target may retry.
                weak.strong_count() > 0 && user(error)
            })
        });

        Ok(Self {
            topic: Topic::Readings,
            on_item,
            on_error,
        })
    }
}
