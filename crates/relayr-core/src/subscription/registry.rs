// ── Subscription registry ──
//
// One pump task per device reads the connection's item stream and fans each
// item out to per-subscription queues. One worker task per subscription
// drains its queue and invokes the subscriber, so ordering holds per
// subscription and a slow or panicking subscriber never affects another.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relayr_api::{Connection, ConnectionItem, ConnectivityEvent};

use super::subscriber::{Delivery, Subscriber};
use super::{SubscriptionHandle, Topic};
use crate::config::RetryPolicy;
use crate::device::{Device, DeviceInner};
use crate::error::CoreError;
use crate::model::{EntityId, Reading};

// ── ConnectionState ──────────────────────────────────────────────

/// Link state of a device's connection, as last reported by its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl From<&ConnectivityEvent> for ConnectionState {
    fn from(event: &ConnectivityEvent) -> Self {
        match event {
            ConnectivityEvent::Connected => Self::Connected,
            ConnectivityEvent::Disconnected { .. } => Self::Disconnected,
            ConnectivityEvent::Reconnecting { attempt } => Self::Reconnecting { attempt: *attempt },
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────

struct SubscriptionEntry {
    topic: Topic,
    queue: mpsc::UnboundedSender<Arc<Delivery>>,
    /// Cleared while the subscription waits out a retry backoff.
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// Held by the worker from its cancellation check until the callback
    /// returns.
    gate: Arc<Mutex<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SubscriptionEntry {
    /// Cancel, then wait out a callback that already passed its check.
    ///
    /// Inside a callback only an uncontended gate is taken: the caller's own
    /// gate is held on this thread, and waiting on another worker that may
    /// be waiting on us would deadlock. A worker found mid-callback there
    /// has already started it and will observe the cancellation next.
    fn close(&self) {
        self.cancel.cancel();
        if IN_CALLBACK.with(Cell::get) {
            drop(self.gate.try_lock());
        } else {
            drop(lock(&self.gate));
        }
    }
}

thread_local! {
    /// Set while a subscriber callback runs on this thread.
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

struct Pump {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct SubscriptionRegistry {
    device_id: EntityId,
    device: Weak<DeviceInner>,
    connection: Arc<dyn Connection>,
    retry: RetryPolicy,
    entries: DashMap<u64, SubscriptionEntry>,
    next_id: AtomicU64,
    pump: Mutex<Option<Pump>>,
    next_generation: AtomicU64,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl SubscriptionRegistry {
    pub(crate) fn new(
        device_id: EntityId,
        device: Weak<DeviceInner>,
        connection: Arc<dyn Connection>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            device_id,
            device,
            connection,
            retry,
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            pump: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            connection_state,
            cancel,
        }
    }

    pub(crate) fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// Register a subscriber, spawn its worker and make sure the pump runs.
    pub(crate) fn subscribe(self: &Arc<Self>, subscriber: Subscriber) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = subscriber.topic();
        let handle = SubscriptionHandle::new(id, topic);

        if self.cancel.is_cancelled() {
            warn!(device = %self.device_id, %handle, "device closed, subscription not registered");
            return handle;
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let cancel = self.cancel.child_token();
        let gate = Arc::new(Mutex::new(()));

        let worker = tokio::spawn(run_worker(
            Arc::clone(self),
            id,
            rx,
            subscriber,
            Arc::clone(&active),
            cancel.clone(),
            Arc::clone(&gate),
        ));

        self.entries.insert(
            id,
            SubscriptionEntry {
                topic,
                queue,
                active,
                cancel,
                gate,
                worker: Some(worker),
            },
        );
        debug!(device = %self.device_id, %handle, ?topic, "subscription registered");

        self.ensure_pump();
        handle
    }

    /// Remove one subscription. Idempotent.
    pub(crate) fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.remove(handle.id())
    }

    /// Cancel and remove every subscription present at call time, then stop
    /// the pump. Workers check cancellation under their delivery gate and
    /// this waits for each gate, so no callback starts after this returns.
    pub(crate) fn unsubscribe_all(&self) {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            if let Some((_, entry)) = self.entries.remove(id) {
                entry.close();
            }
        }
        self.stop_pump();
        if !ids.is_empty() {
            debug!(device = %self.device_id, removed = ids.len(), "all subscriptions cleared");
        }
    }

    pub(crate) fn has_ongoing(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.cancel.is_cancelled())
    }

    pub(crate) fn has_ongoing_topic(&self, topic: Topic) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.topic == topic && !entry.cancel.is_cancelled())
    }

    /// Clear everything and hand back the task handles so the caller can
    /// wait for them to wind down.
    pub(crate) fn shutdown(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, mut entry)) = self.entries.remove(&id) {
                entry.cancel.cancel();
                handles.extend(entry.worker.take());
            }
        }
        if let Some(pump) = lock(&self.pump).take() {
            pump.cancel.cancel();
            handles.push(pump.handle);
        }
        handles
    }

    // ── Internals ────────────────────────────────────────────────

    fn device(&self) -> Option<Device> {
        self.device.upgrade().map(Device::from_inner)
    }

    fn remove(&self, id: u64) -> bool {
        let removed = match self.entries.remove(&id) {
            Some((_, entry)) => {
                entry.close();
                true
            }
            None => false,
        };

        if self.entries.is_empty() {
            let mut pump = lock(&self.pump);
            // Re-check under the pump lock; a concurrent subscribe may have
            // inserted and started a fresh pump.
            if self.entries.is_empty() {
                if let Some(pump) = pump.take() {
                    debug!(device = %self.device_id, "last subscription removed, stopping pump");
                    pump.cancel.cancel();
                }
            }
        }
        removed
    }

    /// Start a pump unless one is alive. A pump that has seen its stream end
    /// clears itself before notifying subscribers, so a retrying subscriber
    /// always finds the slot empty.
    fn ensure_pump(self: &Arc<Self>) {
        let mut pump = lock(&self.pump);
        if pump.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            return;
        }
        if self.cancel.is_cancelled() || self.entries.is_empty() {
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_pump(Arc::clone(self), generation, cancel.clone()));
        *pump = Some(Pump {
            generation,
            cancel,
            handle,
        });
    }

    fn stop_pump(&self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.cancel.cancel();
        }
    }

    /// Drop the pump slot if it still belongs to `generation`.
    fn release_pump(&self, generation: u64) {
        let mut pump = lock(&self.pump);
        if pump.as_ref().is_some_and(|p| p.generation == generation) {
            *pump = None;
        }
    }

    /// Enqueue `delivery` on a point-in-time snapshot of the active
    /// subscriptions it concerns. Failures go to every topic.
    fn fan_out(&self, delivery: Delivery) {
        let topic = delivery.topic();
        let targets: Vec<mpsc::UnboundedSender<Arc<Delivery>>> = self
            .entries
            .iter()
            .filter(|entry| {
                topic.is_none_or(|t| t == entry.topic)
                    && entry.active.load(Ordering::Acquire)
                    && !entry.cancel.is_cancelled()
            })
            .map(|entry| entry.queue.clone())
            .collect();

        let delivery = Arc::new(delivery);
        for queue in targets {
            let _ = queue.send(Arc::clone(&delivery));
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        self.connection_state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

// ── Pump task ────────────────────────────────────────────────────

async fn run_pump(registry: Arc<SubscriptionRegistry>, generation: u64, cancel: CancellationToken) {
    let device_id = registry.device_id.clone();
    registry.publish_state(ConnectionState::Connecting);
    debug!(device = %device_id, generation, "opening connection stream");

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        opened = registry.connection.open() => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(device = %device_id, error = %e, "failed to open connection stream");
            registry.release_pump(generation);
            registry.publish_state(ConnectionState::Failed);
            registry.fan_out(Delivery::Failed(CoreError::delivery(&e)));
            return;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(device = %device_id, generation, "pump cancelled");
                registry.publish_state(ConnectionState::Disconnected);
                return;
            }
            item = stream.next() => item,
        };

        match item {
            Some(ConnectionItem::Reading(raw)) => {
                let reading = Reading::from_raw(device_id.clone(), raw);
                registry.fan_out(Delivery::Reading(reading));
            }
            Some(ConnectionItem::Connectivity(event)) => {
                registry.publish_state(ConnectionState::from(&event));
                registry.fan_out(Delivery::Connectivity(event));
            }
            Some(ConnectionItem::Error(e)) => {
                warn!(device = %device_id, error = %e, "connection stream reported an error");
                registry.fan_out(Delivery::Failed(CoreError::delivery(&e)));
            }
            None => {
                info!(device = %device_id, generation, "connection stream ended");
                registry.release_pump(generation);
                registry.publish_state(ConnectionState::Disconnected);
                registry.fan_out(Delivery::Failed(CoreError::SubscriptionDelivery {
                    message: "connection stream ended".into(),
                }));
                return;
            }
        }
    }
}

// ── Worker task ──────────────────────────────────────────────────

async fn run_worker(
    registry: Arc<SubscriptionRegistry>,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<Arc<Delivery>>,
    mut subscriber: Subscriber,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
) {
    let device_id = registry.device_id.clone();
    let mut attempt: u32 = 0;

    loop {
        let delivery = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };

        if let Delivery::Failed(err) = &*delivery {
            let outcome = {
                let _open = lock(&gate);
                if cancel.is_cancelled() {
                    break;
                }
                in_callback(|| catch_unwind(AssertUnwindSafe(|| subscriber.fail(err))))
            };
            let retry = match outcome {
                Ok(retry) => retry,
                Err(_) => {
                    error!(device = %device_id, subscription = id, "error callback panicked");
                    false
                }
            };
            if !retry {
                debug!(device = %device_id, subscription = id, error = %err, "subscription removed after error");
                break;
            }
            if !registry.retry.allows(attempt) {
                warn!(device = %device_id, subscription = id, attempt, "retry budget exhausted, removing subscription");
                break;
            }

            active.store(false, Ordering::Release);
            let delay = registry.retry.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(device = %device_id, subscription = id, attempt, ?delay, "retrying subscription");

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            active.store(true, Ordering::Release);
            registry.ensure_pump();
            continue;
        }

        let Some(device) = registry.device() else {
            break;
        };
        let outcome = {
            let _open = lock(&gate);
            if cancel.is_cancelled() {
                break;
            }
            in_callback(|| catch_unwind(AssertUnwindSafe(|| subscriber.deliver(&device, &delivery))))
        };

        match outcome {
            Ok(true) => attempt = 0,
            Ok(false) => {
                debug!(device = %device_id, subscription = id, "subscriber asked to stop");
                break;
            }
            Err(_) => {
                error!(device = %device_id, subscription = id, "subscriber panicked, removing subscription");
                break;
            }
        }
    }

    registry.remove(id);
}

fn in_callback<R>(f: impl FnOnce() -> R) -> R {
    IN_CALLBACK.with(|flag| flag.set(true));
    let result = f();
    IN_CALLBACK.with(|flag| flag.set(false));
    result
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
