// ── Device facade ──
//
// A `Device` is a cheap handle over shared state. It owns its connection,
// subscription registry, process slots and command processor; dropping the
// last handle cancels every background task tied to it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relayr_api::{CloudApi, Connection, ConnectionKind, ConnectivityEvent};

use crate::command::{CommandDispatcher, CommandReceipt, Meaning};
use crate::config::EngineConfig;
use crate::error::{CoreError, DeviceError, SetNameError};
use crate::model::{DeviceRecord, EntityId, Firmware, ProcessKind, ProcessOptions, ProcessState, Reading, Transmitter};
use crate::process::{DeviceSnapshot, HandlerRegistry, ProcessCompletion, ProcessOrchestrator, ProvisioningHandler};
use crate::subscription::{
    Action, ConnectionState, ErrorCallback, Subscriber, SubscriptionHandle, SubscriptionRegistry, Topic,
};
use crate::transmitter::TransmitterIndex;

// ── Builder ──────────────────────────────────────────────────────

/// Assembles a [`Device`] from its record and collaborators.
pub struct DeviceBuilder {
    record: DeviceRecord,
    connection: Option<Arc<dyn Connection>>,
    cloud: Option<Arc<dyn CloudApi>>,
    transmitters: Option<Arc<TransmitterIndex>>,
    handlers: Option<Arc<HandlerRegistry>>,
    config: EngineConfig,
}

impl DeviceBuilder {
    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn cloud(mut self, cloud: Arc<dyn CloudApi>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Shared ownership index. Without one, `transmitter()` is always `None`.
    pub fn transmitters(mut self, index: Arc<TransmitterIndex>) -> Self {
        self.transmitters = Some(index);
        self
    }

    /// Family handlers used by `onboard_registered` / `update_firmware_registered`.
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build. No task is spawned until the device is used.
    pub fn build(self) -> Result<Device, CoreError> {
        let connection = self.connection.ok_or_else(|| CoreError::Config {
            message: "a device needs a connection".into(),
        })?;
        let cloud = self.cloud.ok_or_else(|| CoreError::Config {
            message: "a device needs a cloud API".into(),
        })?;
        self.config.validate()?;

        let record = self.record;
        let id = record.id.clone();
        let cancel = CancellationToken::new();
        let (errors, _) = broadcast::channel(self.config.error_channel_capacity);

        let inner = Arc::new_cyclic(|weak| DeviceInner {
            name: ArcSwap::from_pointee(record.name.clone()),
            rename_lock: Mutex::new(()),
            subscriptions: Arc::new(SubscriptionRegistry::new(
                id.clone(),
                weak.clone(),
                Arc::clone(&connection),
                self.config.retry.clone(),
                cancel.child_token(),
            )),
            processes: ProcessOrchestrator::new(
                id.clone(),
                Arc::clone(&connection),
                self.config.clone(),
                cancel.child_token(),
            ),
            commands: CommandDispatcher::new(
                id.clone(),
                Arc::clone(&connection),
                errors.clone(),
                cancel.child_token(),
            ),
            errors,
            connection,
            cloud,
            transmitters: self.transmitters.unwrap_or_default(),
            handlers: self.handlers.unwrap_or_default(),
            record,
            cancel,
        });

        debug!(device = %id, transport = %inner.connection.kind(), "device built");
        Ok(Device { inner })
    }
}

// ── Device ───────────────────────────────────────────────────────

/// A relayr device: identity, attributes, and the live operations on it.
///
/// Cheaply cloneable. Equality and hashing use the id only. Must be used
/// from within a tokio runtime once subscriptions, processes or commands are
/// involved.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

pub(crate) struct DeviceInner {
    /// Immutable attributes. `record.name` is the name at build time only.
    record: DeviceRecord,
    name: ArcSwap<String>,
    rename_lock: Mutex<()>,
    connection: Arc<dyn Connection>,
    cloud: Arc<dyn CloudApi>,
    transmitters: Arc<TransmitterIndex>,
    handlers: Arc<HandlerRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    processes: ProcessOrchestrator,
    commands: CommandDispatcher,
    errors: broadcast::Sender<Arc<DeviceError>>,
    cancel: CancellationToken,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Device {
    pub fn builder(record: DeviceRecord) -> DeviceBuilder {
        DeviceBuilder {
            record,
            connection: None,
            cloud: None,
            transmitters: None,
            handlers: None,
            config: EngineConfig::default(),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DeviceInner>) -> Self {
        Self { inner }
    }

    // ── Attributes ───────────────────────────────────────────────

    pub fn id(&self) -> &EntityId {
        &self.inner.record.id
    }

    /// The last server-confirmed name.
    pub fn name(&self) -> String {
        self.inner.name.load().as_ref().clone()
    }

    pub fn owner(&self) -> &EntityId {
        &self.inner.record.owner
    }

    pub fn is_public(&self) -> bool {
        self.inner.record.public
    }

    pub fn firmware(&self) -> &Firmware {
        &self.inner.record.firmware
    }

    pub fn model(&self) -> Option<&str> {
        self.inner.record.model.as_deref()
    }

    pub fn secret(&self) -> &SecretString {
        &self.inner.record.secret
    }

    pub fn transport(&self) -> ConnectionKind {
        self.inner.connection.kind()
    }

    /// Current attributes as a plain record.
    pub fn record(&self) -> DeviceRecord {
        DeviceRecord {
            name: self.name(),
            ..self.inner.record.clone()
        }
    }

    /// The transmitter relaying this device, if the index knows one.
    pub fn transmitter(&self) -> Option<Transmitter> {
        self.inner
            .transmitters
            .transmitter_for(self.id())
            .map(|t| t.as_ref().clone())
    }

    // ── Naming ───────────────────────────────────────────────────

    /// Rename the device on the server, then update the cached name.
    ///
    /// Calls on the same device are serialized. On success the previous name
    /// is returned; on failure the cache is untouched and the error carries
    /// the name still in effect.
    pub async fn set_name(&self, name: impl Into<String>) -> Result<String, SetNameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SetNameError {
                source: CoreError::invalid("device name must not be empty"),
                name_in_effect: self.name(),
            });
        }

        let _guard = self.inner.rename_lock.lock().await;
        let current = self.name();
        if self.inner.cancel.is_cancelled() {
            return Err(SetNameError {
                source: CoreError::DeviceClosed,
                name_in_effect: current,
            });
        }

        let device_id = self.id().to_string();
        match self.inner.cloud.update_device_name(&device_id, &name).await {
            Ok(()) => {
                let previous = self.inner.name.swap(Arc::new(name));
                info!(device = %device_id, from = %previous, to = %self.name(), "device renamed");
                Ok(previous.as_ref().clone())
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "rename rejected, keeping '{current}'");
                Err(SetNameError {
                    source: CoreError::from(e),
                    name_in_effect: current,
                })
            }
        }
    }

    // ── Provisioning ─────────────────────────────────────────────

    pub fn onboard(
        &self,
        handler: Arc<dyn ProvisioningHandler>,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        self.start_process(ProcessKind::Onboarding, handler, timeout, options)
    }

    pub fn update_firmware(
        &self,
        handler: Arc<dyn ProvisioningHandler>,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        self.start_process(ProcessKind::FirmwareUpdate, handler, timeout, options)
    }

    /// Onboard with the handler registered for this device's model.
    pub fn onboard_registered(
        &self,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        self.start_registered(ProcessKind::Onboarding, timeout, options)
    }

    /// Update firmware with the handler registered for this device's model.
    pub fn update_firmware_registered(
        &self,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        self.start_registered(ProcessKind::FirmwareUpdate, timeout, options)
    }

    pub fn process_state(&self, kind: ProcessKind) -> ProcessState {
        self.inner.processes.state(kind)
    }

    pub fn watch_process(&self, kind: ProcessKind) -> watch::Receiver<ProcessState> {
        self.inner.processes.watch(kind)
    }

    /// Terminal state of the most recent finished process of `kind`.
    pub fn last_outcome(&self, kind: ProcessKind) -> Option<ProcessState> {
        self.inner.processes.last_outcome(kind)
    }

    fn start_registered(
        &self,
        kind: ProcessKind,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        let Some(family) = self.model() else {
            return ProcessCompletion::rejected(
                kind,
                CoreError::invalid(format!("device {} has no model to resolve a {kind} handler", self.id())),
            );
        };
        match self.inner.handlers.resolve(kind, family) {
            Some(handler) => self.start_process(kind, handler, timeout, options),
            None => ProcessCompletion::rejected(
                kind,
                CoreError::invalid(format!("no {kind} handler registered for '{family}'")),
            ),
        }
    }

    fn start_process(
        &self,
        kind: ProcessKind,
        handler: Arc<dyn ProvisioningHandler>,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
    ) -> ProcessCompletion {
        let snapshot = DeviceSnapshot {
            id: self.id().clone(),
            name: self.name(),
            model: self.inner.record.model.clone(),
            firmware: self.inner.record.firmware.clone(),
            secret: self.inner.record.secret.clone(),
            transport: self.transport(),
        };
        self.inner
            .processes
            .start(kind, handler, timeout, options, snapshot)
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Receive every reading. `on_reading` returns `false` to stop;
    /// `on_error` returns `true` to retry after backoff.
    ///
    /// On a closed device the returned handle is inert: nothing is
    /// registered and no callback ever runs.
    pub fn subscribe_readings<F>(&self, on_reading: F, on_error: Option<ErrorCallback>) -> SubscriptionHandle
    where
        F: FnMut(&Device, &Reading) -> bool + Send + 'static,
    {
        self.inner
            .subscriptions
            .subscribe(Subscriber::readings(on_reading, on_error))
    }

    /// Receive readings through an action on a weakly held target.
    ///
    /// Fails with `InvalidArgument` when the target is already gone.
    pub fn subscribe_readings_target<T>(
        &self,
        target: Weak<T>,
        action: Action<T>,
        on_error: Option<ErrorCallback>,
    ) -> Result<SubscriptionHandle, CoreError>
    where
        T: Send + Sync + 'static,
    {
        let subscriber = Subscriber::target(target, action, on_error)?;
        Ok(self.inner.subscriptions.subscribe(subscriber))
    }

    /// Receive connectivity changes reported by the connection.
    pub fn subscribe_connectivity<F>(&self, on_event: F, on_error: Option<ErrorCallback>) -> SubscriptionHandle
    where
        F: FnMut(&Device, &ConnectivityEvent) -> bool + Send + 'static,
    {
        self.inner
            .subscriptions
            .subscribe(Subscriber::connectivity(on_event, on_error))
    }

    /// Returns `false` when the handle was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.subscriptions.unsubscribe(handle)
    }

    pub fn unsubscribe_all(&self) {
        self.inner.subscriptions.unsubscribe_all();
    }

    pub fn has_ongoing_subscriptions(&self) -> bool {
        self.inner.subscriptions.has_ongoing()
    }

    pub fn has_ongoing_reading_subscriptions(&self) -> bool {
        self.inner.subscriptions.has_ongoing_topic(Topic::Readings)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.subscriptions.connection_state()
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Validate and queue a command. The receipt may be dropped.
    pub fn send_command(
        &self,
        path: Option<&str>,
        meaning: impl Into<Meaning>,
        value: &impl Serialize,
    ) -> Result<CommandReceipt, CoreError> {
        self.inner.commands.send(path, meaning.into(), value)
    }

    /// Failures of background work on this device.
    pub fn errors(&self) -> broadcast::Receiver<Arc<DeviceError>> {
        self.inner.errors.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Cancel everything tied to this device and wait for its tasks.
    ///
    /// Must not be awaited from inside a subscription callback.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.subscriptions.shutdown();
        handles.extend(self.inner.processes.shutdown());
        handles.extend(self.inner.commands.shutdown());
        for handle in handles {
            let _ = handle.await;
        }
        debug!(device = %self.id(), "device closed");
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", self.id())
            .field("name", &self.name())
            .field("transport", &self.transport())
            .finish_non_exhaustive()
    }
}
