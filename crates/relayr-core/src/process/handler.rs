// ── Provisioning handler capability ──
//
// Onboarding and firmware updates are performed by pluggable handlers. The
// device owns the lifecycle (claiming the slot, the deadline, cancellation);
// the handler owns the protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use relayr_api::{Connection, ConnectionKind};

use crate::error::CoreError;
use crate::model::{EntityId, Firmware, ProcessKind, ProcessOptions};

/// A provisioning protocol for one device family.
///
/// `begin` runs on its own task. Returning from it completes the process;
/// the returned error becomes the completion's error. When the deadline
/// passes first, the context's cancellation token fires and [`cancel`] is
/// called, but `begin` is never aborted: handlers should watch the token.
///
/// [`cancel`]: ProvisioningHandler::cancel
#[async_trait]
pub trait ProvisioningHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Deadline used when the caller does not pass one.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    async fn begin(&self, ctx: ProvisioningContext) -> Result<(), CoreError>;

    /// Best-effort early stop. Called at most once, after the token fired.
    fn cancel(&self) {}
}

/// What a device looked like when a process started.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: EntityId,
    pub name: String,
    pub model: Option<String>,
    pub firmware: Firmware,
    pub secret: SecretString,
    pub transport: ConnectionKind,
}

/// Everything a handler gets to work with.
pub struct ProvisioningContext {
    device: DeviceSnapshot,
    options: ProcessOptions,
    cancel: CancellationToken,
    connection: Arc<dyn Connection>,
}

impl ProvisioningContext {
    pub(crate) fn new(
        device: DeviceSnapshot,
        options: ProcessOptions,
        cancel: CancellationToken,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            device,
            options,
            cancel,
            connection,
        }
    }

    pub fn device(&self) -> &DeviceSnapshot {
        &self.device
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Look up one option, deserialized into `T`.
    pub fn option<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        self.options
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| CoreError::invalid(format!("option '{key}': {e}")))
            })
            .transpose()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the process has been cancelled (deadline or teardown).
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// One request/response round trip over the device's connection.
    ///
    /// Abandoned when the process is cancelled; the connection is then asked
    /// to drop in-flight exchanges.
    pub async fn exchange(&self, request: Bytes) -> Result<Bytes, CoreError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.connection.cancel_exchanges();
                Err(CoreError::Network {
                    message: "exchange abandoned: process cancelled".into(),
                })
            }
            response = self.connection.exchange(request) => response.map_err(CoreError::from),
        }
    }
}

// ── Handler registry ─────────────────────────────────────────────

/// Handlers per device family, registered as interchangeable variants for
/// each process kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<(ProcessKind, String), Arc<dyn ProvisioningHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `family`, replacing any previous one.
    pub fn register(
        &self,
        kind: ProcessKind,
        family: impl Into<String>,
        handler: Arc<dyn ProvisioningHandler>,
    ) -> Option<Arc<dyn ProvisioningHandler>> {
        let family = family.into();
        tracing::debug!(%kind, %family, handler = handler.name(), "handler registered");
        self.handlers.insert((kind, family), handler)
    }

    pub fn resolve(&self, kind: ProcessKind, family: &str) -> Option<Arc<dyn ProvisioningHandler>> {
        self.handlers
            .get(&(kind, family.to_owned()))
            .map(|h| Arc::clone(&h))
    }

    /// Families with a handler for `kind`, sorted.
    pub fn families(&self, kind: ProcessKind) -> Vec<String> {
        let mut families: Vec<String> = self
            .handlers
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.key().1.clone())
            .collect();
        families.sort();
        families
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ProvisioningHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn begin(&self, _ctx: ProvisioningContext) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[test]
    fn registry_resolves_per_kind_and_family() {
        let registry = HandlerRegistry::new();
        registry.register(ProcessKind::Onboarding, "wunderbar", Arc::new(Named("wb-onboard")));
        registry.register(ProcessKind::FirmwareUpdate, "wunderbar", Arc::new(Named("wb-fw")));
        registry.register(ProcessKind::Onboarding, "gateway", Arc::new(Named("gw-onboard")));

        let handler = registry.resolve(ProcessKind::FirmwareUpdate, "wunderbar").unwrap();
        assert_eq!(handler.name(), "wb-fw");
        assert!(registry.resolve(ProcessKind::FirmwareUpdate, "gateway").is_none());
        assert_eq!(
            registry.families(ProcessKind::Onboarding),
            vec!["gateway".to_owned(), "wunderbar".to_owned()]
        );
    }

    #[test]
    fn registering_again_replaces_the_variant() {
        let registry = HandlerRegistry::new();
        assert!(registry
            .register(ProcessKind::Onboarding, "x", Arc::new(Named("a")))
            .is_none());
        let previous = registry
            .register(ProcessKind::Onboarding, "x", Arc::new(Named("b")))
            .unwrap();
        assert_eq!(previous.name(), "a");
        assert_eq!(registry.resolve(ProcessKind::Onboarding, "x").unwrap().name(), "b");
    }
}
