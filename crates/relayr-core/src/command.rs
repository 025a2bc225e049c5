// ── Command dispatch ──
//
// Commands are validated synchronously, then queued on the device's command
// channel. A single processor task forwards them to the connection in
// submission order. Delivery is fire-and-forget by default: the returned
// receipt may be awaited or dropped.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use relayr_api::{Connection, RawCommand};

use crate::error::{CoreError, DeviceError};
use crate::model::EntityId;

// ── Meaning ──────────────────────────────────────────────────────

/// What a command means to the device: a name or a numeric code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Meaning {
    Name(String),
    Number(serde_json::Number),
}

impl Meaning {
    fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Name(name) if name.trim().is_empty() => {
                Err(CoreError::invalid("command meaning must not be empty"))
            }
            _ => Ok(()),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Name(name) => Value::String(name),
            Self::Number(number) => Value::Number(number),
        }
    }
}

impl fmt::Display for Meaning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for Meaning {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for Meaning {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

macro_rules! meaning_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Meaning {
            fn from(code: $ty) -> Self {
                Self::Number(serde_json::Number::from(code))
            }
        })*
    };
}

meaning_from_int!(i32, i64, u8, u16, u32, u64);

impl TryFrom<f64> for Meaning {
    type Error = CoreError;

    fn try_from(code: f64) -> Result<Self, Self::Error> {
        serde_json::Number::from_f64(code)
            .map(Self::Number)
            .ok_or_else(|| CoreError::invalid(format!("command meaning must be finite, got {code}")))
    }
}

impl TryFrom<Value> for Meaning {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let meaning = match value {
            Value::String(name) => Self::Name(name),
            Value::Number(number) => Self::Number(number),
            other => {
                return Err(CoreError::invalid(format!(
                    "command meaning must be a string or a number, got {other}"
                )));
            }
        };
        meaning.validate()?;
        Ok(meaning)
    }
}

// ── Receipt ──────────────────────────────────────────────────────

/// Transport outcome of one queued command. Dropping it is fine.
pub struct CommandReceipt {
    id: Uuid,
    rx: oneshot::Receiver<Result<(), CoreError>>,
}

impl CommandReceipt {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for CommandReceipt {
    type Output = Result<(), CoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CoreError::DeviceClosed)))
    }
}

impl fmt::Debug for CommandReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandReceipt").field("id", &self.id).finish_non_exhaustive()
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

struct CommandEnvelope {
    id: Uuid,
    command: RawCommand,
    response_tx: oneshot::Sender<Result<(), CoreError>>,
}

pub(crate) struct CommandDispatcher {
    device_id: EntityId,
    connection: Arc<dyn Connection>,
    errors: broadcast::Sender<Arc<DeviceError>>,
    command_tx: mpsc::UnboundedSender<CommandEnvelope>,
    /// Taken by the processor task when the first command is queued.
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<CommandEnvelope>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    pub(crate) fn new(
        device_id: EntityId,
        connection: Arc<dyn Connection>,
        errors: broadcast::Sender<Arc<DeviceError>>,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            device_id,
            connection,
            errors,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            task: Mutex::new(None),
            cancel,
        }
    }

    pub(crate) fn send(
        &self,
        path: Option<&str>,
        meaning: Meaning,
        value: &impl Serialize,
    ) -> Result<CommandReceipt, CoreError> {
        meaning.validate()?;
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::invalid(format!("command value could not be serialized: {e}")))?;
        if value.is_null() {
            return Err(CoreError::invalid("command value must not be empty"));
        }
        if self.cancel.is_cancelled() {
            return Err(CoreError::DeviceClosed);
        }

        let command = RawCommand {
            path: path.filter(|p| !p.is_empty()).map(str::to_owned),
            command: meaning.into_value(),
            value,
        };
        let id = Uuid::new_v4();
        let (response_tx, rx) = oneshot::channel();

        self.ensure_processor();
        self.command_tx
            .send(CommandEnvelope {
                id,
                command,
                response_tx,
            })
            .map_err(|_| CoreError::DeviceClosed)?;
        debug!(device = %self.device_id, command = %id, "command queued");

        Ok(CommandReceipt { id, rx })
    }

    pub(crate) fn shutdown(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn ensure_processor(&self) {
        let Some(rx) = self
            .command_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let handle = tokio::spawn(command_processor_task(
            self.device_id.clone(),
            Arc::clone(&self.connection),
            self.errors.clone(),
            rx,
            self.cancel.clone(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

async fn command_processor_task(
    device_id: EntityId,
    connection: Arc<dyn Connection>,
    errors: broadcast::Sender<Arc<DeviceError>>,
    mut rx: mpsc::UnboundedReceiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(CoreError::DeviceClosed),
                    sent = connection.send(envelope.command) => sent.map_err(CoreError::from),
                };

                if let Err(e) = &result {
                    warn!(device = %device_id, command = %envelope.id, error = %e, "command delivery failed");
                    // No receivers is fine.
                    let _ = errors.send(Arc::new(DeviceError::new(device_id.clone(), "send command", e.clone())));
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
    // Queued envelopes drop here; their receipts resolve to DeviceClosed.
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meaning_from_dynamic_values() {
        assert_eq!(Meaning::try_from(json!("led")).unwrap(), Meaning::from("led"));
        assert_eq!(Meaning::try_from(json!(7)).unwrap(), Meaning::from(7_i64));
        assert!(Meaning::try_from(json!("")).is_err());
        assert!(Meaning::try_from(json!(true)).is_err());
        assert!(Meaning::try_from(json!(null)).is_err());
        assert!(Meaning::try_from(json!({"a": 1})).is_err());
    }

    #[test]
    fn non_finite_float_is_rejected() {
        assert!(Meaning::try_from(f64::NAN).is_err());
        assert!(Meaning::try_from(f64::INFINITY).is_err());
        assert_eq!(Meaning::try_from(1.5).unwrap().to_string(), "1.5");
    }

    #[test]
    fn blank_name_fails_validation() {
        assert!(Meaning::from("   ").validate().unwrap_err().is_validation());
    }
}
