// ── Provisioning process orchestration ──
//
// One slot per process kind. Starting a process claims its slot atomically,
// spawns a run task that races the handler against the deadline and device
// teardown, and hands the caller a `ProcessCompletion` that resolves exactly
// once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relayr_api::Connection;

use super::handler::{DeviceSnapshot, ProvisioningContext, ProvisioningHandler};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{EntityId, ProcessKind, ProcessOptions, ProcessState};

// ── ProcessCompletion ────────────────────────────────────────────

enum CompletionInner {
    Ready(Option<Result<(), CoreError>>),
    Pending(oneshot::Receiver<Result<(), CoreError>>),
}

/// Resolves once with the outcome of a provisioning process.
///
/// Completions rejected during validation (`InvalidArgument`, `Busy`,
/// `DeviceClosed`) resolve immediately and report
/// [`was_attempted`](Self::was_attempted) as `false`.
pub struct ProcessCompletion {
    kind: ProcessKind,
    attempted: bool,
    inner: CompletionInner,
}

impl ProcessCompletion {
    pub(crate) fn rejected(kind: ProcessKind, error: CoreError) -> Self {
        Self {
            kind,
            attempted: false,
            inner: CompletionInner::Ready(Some(Err(error))),
        }
    }

    fn pending(kind: ProcessKind, rx: oneshot::Receiver<Result<(), CoreError>>) -> Self {
        Self {
            kind,
            attempted: true,
            inner: CompletionInner::Pending(rx),
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Whether the handler was ever started for this request.
    pub fn was_attempted(&self) -> bool {
        self.attempted
    }
}

impl Future for ProcessCompletion {
    type Output = Result<(), CoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            CompletionInner::Ready(outcome) => Poll::Ready(
                outcome
                    .take()
                    .unwrap_or_else(|| Err(CoreError::Internal("completion polled after resolving".into()))),
            ),
            CompletionInner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CoreError::DeviceClosed))),
        }
    }
}

impl std::fmt::Debug for ProcessCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCompletion")
            .field("kind", &self.kind)
            .field("attempted", &self.attempted)
            .finish_non_exhaustive()
    }
}

// ── Slots ────────────────────────────────────────────────────────

struct ProcessSlot {
    state: watch::Sender<ProcessState>,
    last_outcome: Mutex<Option<ProcessState>>,
}

impl ProcessSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(ProcessState::Idle);
        Self {
            state,
            last_outcome: Mutex::new(None),
        }
    }

    /// Idle (or terminal) → Running. Returns false when already running.
    fn claim(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_running() {
                false
            } else {
                *state = ProcessState::Running;
                true
            }
        })
    }

    /// Publish the terminal state, remember it, then free the slot.
    fn finish(&self, terminal: ProcessState) {
        self.state.send_replace(terminal);
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(terminal);
        self.state.send_replace(ProcessState::Idle);
    }
}

// ── Orchestrator ─────────────────────────────────────────────────

pub(crate) struct ProcessOrchestrator {
    device_id: EntityId,
    connection: Arc<dyn Connection>,
    config: EngineConfig,
    onboarding: Arc<ProcessSlot>,
    firmware_update: Arc<ProcessSlot>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessOrchestrator {
    pub(crate) fn new(
        device_id: EntityId,
        connection: Arc<dyn Connection>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device_id,
            connection,
            config,
            onboarding: Arc::new(ProcessSlot::new()),
            firmware_update: Arc::new(ProcessSlot::new()),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn slot(&self, kind: ProcessKind) -> &Arc<ProcessSlot> {
        match kind {
            ProcessKind::Onboarding => &self.onboarding,
            ProcessKind::FirmwareUpdate => &self.firmware_update,
        }
    }

    pub(crate) fn state(&self, kind: ProcessKind) -> ProcessState {
        *self.slot(kind).state.borrow()
    }

    pub(crate) fn watch(&self, kind: ProcessKind) -> watch::Receiver<ProcessState> {
        self.slot(kind).state.subscribe()
    }

    pub(crate) fn last_outcome(&self, kind: ProcessKind) -> Option<ProcessState> {
        *self
            .slot(kind)
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start(
        &self,
        kind: ProcessKind,
        handler: Arc<dyn ProvisioningHandler>,
        timeout: Option<chrono::Duration>,
        options: ProcessOptions,
        snapshot: DeviceSnapshot,
    ) -> ProcessCompletion {
        // ── Synchronous validation ──
        let timeout = match timeout.map(|t| t.to_std().map_err(|_| t)).transpose() {
            Ok(timeout) => timeout,
            Err(negative) => {
                debug!(device = %self.device_id, %kind, %negative, "rejected negative timeout");
                return ProcessCompletion::rejected(
                    kind,
                    CoreError::invalid(format!("{kind} timeout must not be negative (got {negative})")),
                );
            }
        };
        if self.cancel.is_cancelled() {
            return ProcessCompletion::rejected(kind, CoreError::DeviceClosed);
        }

        let slot = Arc::clone(self.slot(kind));
        if !slot.claim() {
            debug!(device = %self.device_id, %kind, "process already running");
            return ProcessCompletion::rejected(kind, CoreError::Busy { kind });
        }

        let after = timeout
            .or_else(|| handler.default_timeout())
            .unwrap_or_else(|| self.config.default_timeout(kind));

        let token = self.cancel.child_token();
        let ctx = ProvisioningContext::new(snapshot, options, token.clone(), Arc::clone(&self.connection));
        let (tx, rx) = oneshot::channel();

        info!(
            device = %self.device_id,
            %kind,
            handler = handler.name(),
            timeout_ms = after.as_millis(),
            "process started"
        );

        let run = tokio::spawn(run_process(RunArgs {
            device_id: self.device_id.clone(),
            kind,
            handler,
            ctx,
            token,
            after,
            slot,
            tx,
        }));
        self.track(run);

        ProcessCompletion::pending(kind, rx)
    }

    /// Hand back outstanding run tasks. Cancellation is driven by the
    /// device token, which the caller cancels first.
    pub(crate) fn shutdown(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

// ── Run task ─────────────────────────────────────────────────────

struct RunArgs {
    device_id: EntityId,
    kind: ProcessKind,
    handler: Arc<dyn ProvisioningHandler>,
    ctx: ProvisioningContext,
    token: CancellationToken,
    after: Duration,
    slot: Arc<ProcessSlot>,
    tx: oneshot::Sender<Result<(), CoreError>>,
}

async fn run_process(args: RunArgs) {
    let RunArgs {
        device_id,
        kind,
        handler,
        ctx,
        token,
        after,
        slot,
        tx,
    } = args;

    let mut handler_task = {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move { handler.begin(ctx).await })
    };

    let (terminal, outcome) = tokio::select! {
        biased;
        joined = &mut handler_task => match joined {
            Ok(Ok(())) => (ProcessState::Completed, Ok(())),
            Ok(Err(e)) => (ProcessState::Failed, Err(e)),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("handler '{}' panicked", handler.name())
                } else {
                    join_err.to_string()
                };
                (ProcessState::Failed, Err(CoreError::Handler { message }))
            }
        },
        () = tokio::time::sleep(after) => {
            token.cancel();
            handler.cancel();
            discard_late_result(device_id.clone(), kind, handler_task);
            (ProcessState::TimedOut, Err(CoreError::Timeout { kind, after }))
        }
        () = token.cancelled() => {
            handler.cancel();
            discard_late_result(device_id.clone(), kind, handler_task);
            (ProcessState::Failed, Err(CoreError::DeviceClosed))
        }
    };

    match &outcome {
        Ok(()) => info!(device = %device_id, %kind, "process completed"),
        Err(e) => warn!(device = %device_id, %kind, state = %terminal, error = %e, "process did not complete"),
    }

    slot.finish(terminal);
    // The caller may have dropped the completion.
    let _ = tx.send(outcome);
}

/// Let a handler that outlived its process finish in the background.
fn discard_late_result(
    device_id: EntityId,
    kind: ProcessKind,
    handler_task: JoinHandle<Result<(), CoreError>>,
) {
    tokio::spawn(async move {
        match handler_task.await {
            Ok(late) => debug!(device = %device_id, %kind, ?late, "late handler result discarded"),
            Err(e) => debug!(device = %device_id, %kind, error = %e, "late handler task ended abnormally"),
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    #[test]
    fn rejected_completion_is_ready_without_a_runtime() {
        let busy = CoreError::Busy {
            kind: ProcessKind::Onboarding,
        };
        let mut completion = task::spawn(ProcessCompletion::rejected(ProcessKind::Onboarding, busy.clone()));

        assert!(!completion.was_attempted());
        assert_ready_eq!(completion.poll(), Err(busy));
    }

    #[test]
    fn pending_completion_wakes_on_outcome() {
        let (tx, rx) = oneshot::channel();
        let mut completion = task::spawn(ProcessCompletion::pending(ProcessKind::FirmwareUpdate, rx));

        assert!(completion.was_attempted());
        assert_pending!(completion.poll());

        tx.send(Ok(())).unwrap();
        assert!(completion.is_woken());
        assert_ready_eq!(completion.poll(), Ok(()));
    }

    #[test]
    fn abandoned_completion_reports_closed_device() {
        let (tx, rx) = oneshot::channel::<Result<(), CoreError>>();
        let mut completion = task::spawn(ProcessCompletion::pending(ProcessKind::Onboarding, rx));

        drop(tx);
        assert_ready_eq!(completion.poll(), Err(CoreError::DeviceClosed));
    }

    #[test]
    fn slot_claim_is_exclusive_until_finished() {
        let slot = ProcessSlot::new();
        let mut watcher = slot.state.subscribe();

        assert!(slot.claim());
        assert!(!slot.claim());
        assert_eq!(*watcher.borrow_and_update(), ProcessState::Running);

        slot.finish(ProcessState::TimedOut);
        assert_eq!(*slot.state.borrow(), ProcessState::Idle);
        assert_eq!(*slot.last_outcome.lock().unwrap(), Some(ProcessState::TimedOut));
        assert!(slot.claim());
    }
}
