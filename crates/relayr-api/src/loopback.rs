//! In-process collaborators.
//!
//! [`LoopbackConnection`] implements [`Connection`] over tokio channels and
//! is steered from the outside through its paired [`LoopbackController`]:
//! push readings, connectivity changes and errors into the current stream,
//! end the stream, make the next `open()` fail, observe outbound commands
//! and script provisioning exchanges.
//!
//! [`LoopbackCloud`] implements [`CloudApi`] against an in-memory name table
//! with injectable failures and latency.
//!
//! # Example
//!
//! ```rust,ignore
//! use relayr_api::{ConnectionKind, LoopbackConnection, RawReading};
//!
//! let (connection, controller) = LoopbackConnection::new(ConnectionKind::Cloud);
//! let mut items = connection.open().await?;
//! controller.push_reading(RawReading::new("temperature", 21.5.into()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::cloud::CloudApi;
use crate::connection::{Connection, ConnectionKind, ItemStream};
use crate::error::Error;
use crate::types::{ConnectionItem, ConnectivityEvent, RawCommand, RawReading};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared state ─────────────────────────────────────────────────────

struct Shared {
    /// Sender feeding the most recently opened stream.
    stream_tx: Mutex<Option<mpsc::UnboundedSender<ConnectionItem>>>,
    /// Number of successful `open()` calls.
    opened: watch::Sender<usize>,
    open_failures: Mutex<VecDeque<Error>>,

    command_tx: mpsc::UnboundedSender<RawCommand>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawCommand>>,
    send_failures: Mutex<VecDeque<Error>>,

    exchange_replies: Mutex<VecDeque<Result<Bytes, Error>>>,
    exchange_requests: Mutex<Vec<Bytes>>,
    hold_exchanges: AtomicBool,
    cancelled_exchanges: AtomicUsize,
    cancel_notify: Notify,
}

// ── LoopbackConnection ───────────────────────────────────────────────

/// A [`Connection`] backed by in-process channels.
pub struct LoopbackConnection {
    kind: ConnectionKind,
    shared: Arc<Shared>,
}

impl LoopbackConnection {
    /// Create a connection and the controller that drives it.
    pub fn new(kind: ConnectionKind) -> (Self, LoopbackController) {
        let (opened, _) = watch::channel(0);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            stream_tx: Mutex::new(None),
            opened,
            open_failures: Mutex::new(VecDeque::new()),
            command_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            send_failures: Mutex::new(VecDeque::new()),
            exchange_replies: Mutex::new(VecDeque::new()),
            exchange_requests: Mutex::new(Vec::new()),
            hold_exchanges: AtomicBool::new(false),
            cancelled_exchanges: AtomicUsize::new(0),
            cancel_notify: Notify::new(),
        });

        let controller = LoopbackController {
            shared: Arc::clone(&shared),
        };
        (Self { kind, shared }, controller)
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    async fn open(&self) -> Result<ItemStream, Error> {
        let failure = lock(&self.shared.open_failures).pop_front();
        if let Some(err) = failure {
            tracing::debug!(error = %err, "loopback open failing on request");
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Replacing the sender ends any previously opened stream.
        *lock(&self.shared.stream_tx) = Some(tx);
        self.shared.opened.send_modify(|n| *n += 1);
        tracing::trace!("loopback stream opened");

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, command: RawCommand) -> Result<(), Error> {
        let failure = lock(&self.shared.send_failures).pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        self.shared
            .command_tx
            .send(command)
            .map_err(|_| Error::Closed)
    }

    async fn exchange(&self, request: Bytes) -> Result<Bytes, Error> {
        // Register interest before anything else so a concurrent
        // `cancel_exchanges()` cannot slip between the check and the wait.
        let cancelled = self.shared.cancel_notify.notified();

        lock(&self.shared.exchange_requests).push(request.clone());

        let scripted = lock(&self.shared.exchange_replies).pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        if self.shared.hold_exchanges.load(Ordering::SeqCst) {
            cancelled.await;
            return Err(Error::Cancelled);
        }

        Ok(request)
    }

    fn cancel_exchanges(&self) {
        self.shared
            .cancelled_exchanges
            .fetch_add(1, Ordering::SeqCst);
        self.shared.cancel_notify.notify_waiters();
    }
}

// ── LoopbackController ───────────────────────────────────────────────

/// Steering handle for a [`LoopbackConnection`]. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackController {
    shared: Arc<Shared>,
}

impl LoopbackController {
    /// Push an item into the current stream. Returns `false` when no stream
    /// is open (the item is dropped).
    pub fn push(&self, item: ConnectionItem) -> bool {
        let guard = lock(&self.shared.stream_tx);
        guard.as_ref().is_some_and(|tx| tx.send(item).is_ok())
    }

    pub fn push_reading(&self, reading: RawReading) -> bool {
        self.push(ConnectionItem::Reading(reading))
    }

    pub fn push_connectivity(&self, event: ConnectivityEvent) -> bool {
        self.push(ConnectionItem::Connectivity(event))
    }

    pub fn push_error(&self, error: Error) -> bool {
        self.push(ConnectionItem::Error(error))
    }

    /// End the current stream. It will not produce further items.
    pub fn end_stream(&self) {
        lock(&self.shared.stream_tx).take();
    }

    /// Whether a stream is open and its consumer is still listening.
    pub fn has_open_stream(&self) -> bool {
        lock(&self.shared.stream_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Make the next `open()` fail with `error`.
    pub fn fail_next_open(&self, error: Error) {
        lock(&self.shared.open_failures).push_back(error);
    }

    /// Number of streams opened so far.
    pub fn open_count(&self) -> usize {
        *self.shared.opened.borrow()
    }

    /// Wait until at least `count` streams have been opened.
    pub async fn wait_for_open(&self, count: usize) {
        let mut rx = self.shared.opened.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|opened| *opened >= count).await;
    }

    /// Make the next `send()` fail with `error`.
    pub fn fail_next_send(&self, error: Error) {
        lock(&self.shared.send_failures).push_back(error);
    }

    /// Receive the next command delivered through `send()`.
    pub async fn next_command(&self) -> Option<RawCommand> {
        self.shared.command_rx.lock().await.recv().await
    }

    /// Drain every command delivered so far without waiting.
    pub async fn drain_commands(&self) -> Vec<RawCommand> {
        let mut rx = self.shared.command_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            drained.push(cmd);
        }
        drained
    }

    /// Queue the reply for the next `exchange()` call.
    pub fn reply_to_exchange(&self, reply: Result<Bytes, Error>) {
        lock(&self.shared.exchange_replies).push_back(reply);
    }

    /// When set, unscripted exchanges never answer until cancelled.
    pub fn hold_exchanges(&self, hold: bool) {
        self.shared.hold_exchanges.store(hold, Ordering::SeqCst);
    }

    /// Every request passed to `exchange()`, in call order.
    pub fn exchange_requests(&self) -> Vec<Bytes> {
        lock(&self.shared.exchange_requests).clone()
    }

    /// How many times `cancel_exchanges()` was called.
    pub fn cancelled_exchanges(&self) -> usize {
        self.shared.cancelled_exchanges.load(Ordering::SeqCst)
    }
}

// ── LoopbackCloud ────────────────────────────────────────────────────

/// A [`CloudApi`] backed by an in-memory name table.
#[derive(Default)]
pub struct LoopbackCloud {
    names: Mutex<HashMap<String, String>>,
    failures: Mutex<VecDeque<Error>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl LoopbackCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next update fail with `error`.
    pub fn fail_next(&self, error: Error) {
        lock(&self.failures).push_back(error);
    }

    /// Delay every update by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// The name the server holds for `device_id`, if it was ever updated.
    pub fn name_of(&self, device_id: &str) -> Option<String> {
        lock(&self.names).get(device_id).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudApi for LoopbackCloud {
    async fn update_device_name(&self, device_id: &str, name: &str) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = lock(&self.failures).pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        lock(&self.names).insert(device_id.to_owned(), name.to_owned());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
