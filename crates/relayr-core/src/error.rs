// ── Core error types ──
//
// User-facing errors from relayr-core. Consumers never see raw transport
// failures; the `From<relayr_api::Error>` impl translates them into
// domain-appropriate variants.
//
// Validation variants (`InvalidArgument`, `Busy`) are produced before any
// asynchronous work starts. Everything else arrives through an operation's
// completion path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{EntityId, ProcessKind};

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Validation errors ────────────────────────────────────────────
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("A {kind} process is already running on this device")]
    Busy { kind: ProcessKind },

    // ── Asynchronous failures ────────────────────────────────────────
    #[error("{kind} did not finish within {}ms", .after.as_millis())]
    Timeout { kind: ProcessKind, after: Duration },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rejected by server (status {status}): {message}")]
    ServerRejection { status: u16, message: String },

    #[error("Subscription delivery failed: {message}")]
    SubscriptionDelivery { message: String },

    #[error("Provisioning handler failed: {message}")]
    Handler { message: String },

    #[error("Device has been closed")]
    DeviceClosed,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether this error was raised before any work was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::Busy { .. })
    }

    /// Wrap a streaming fault for delivery to subscribers.
    pub(crate) fn delivery(err: &relayr_api::Error) -> Self {
        Self::SubscriptionDelivery {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<relayr_api::Error> for CoreError {
    fn from(err: relayr_api::Error) -> Self {
        match err {
            relayr_api::Error::Rejected { status, message } => {
                CoreError::ServerRejection { status, message }
            }
            relayr_api::Error::Serialization { message } => CoreError::InvalidArgument { message },
            relayr_api::Error::Unsupported(operation) => CoreError::Network {
                message: format!("operation not supported by connection: {operation}"),
            },
            other @ (relayr_api::Error::Transport(_)
            | relayr_api::Error::Closed
            | relayr_api::Error::Timeout { .. }
            | relayr_api::Error::Cancelled) => CoreError::Network {
                message: other.to_string(),
            },
        }
    }
}

/// Failure of [`Device::set_name`](crate::Device::set_name).
///
/// Carries the name that remained in effect, which is always the name the
/// device had before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to rename device (name is still '{name_in_effect}'): {source}")]
pub struct SetNameError {
    #[source]
    pub source: CoreError,
    pub name_in_effect: String,
}

/// A failure published on a device's error channel.
///
/// Background work (command delivery) has no caller to return to; its
/// failures land here as well as in the optional receipt.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed on device {device_id}: {error}")]
pub struct DeviceError {
    pub device_id: EntityId,
    pub operation: &'static str,
    #[source]
    pub error: CoreError,
    pub at: DateTime<Utc>,
}

impl DeviceError {
    pub(crate) fn new(device_id: EntityId, operation: &'static str, error: CoreError) -> Self {
        Self {
            device_id,
            operation,
            error,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_server_rejection() {
        let err = CoreError::from(relayr_api::Error::Rejected {
            status: 409,
            message: "name taken".into(),
        });
        assert_eq!(
            err,
            CoreError::ServerRejection {
                status: 409,
                message: "name taken".into()
            }
        );
    }

    #[test]
    fn transport_faults_map_to_network() {
        for api_err in [
            relayr_api::Error::Transport("reset".into()),
            relayr_api::Error::Closed,
            relayr_api::Error::Timeout { timeout_ms: 10 },
        ] {
            assert!(matches!(CoreError::from(api_err), CoreError::Network { .. }));
        }
    }

    #[test]
    fn validation_classification() {
        assert!(CoreError::invalid("x").is_validation());
        assert!(
            CoreError::Busy {
                kind: ProcessKind::Onboarding
            }
            .is_validation()
        );
        assert!(!CoreError::DeviceClosed.is_validation());
    }
}
