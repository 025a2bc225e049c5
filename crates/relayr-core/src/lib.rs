//! Device engine for relayr IoT entities.
//!
//! This crate owns the behaviour of a single device on top of the
//! collaborator contracts in `relayr-api`:
//!
//! - **[`Device`]** — Cheaply cloneable facade built with
//!   [`Device::builder`]. Holds the passive [`DeviceRecord`] attributes and a
//!   cached name that only changes after the cloud confirms a
//!   [`set_name`](Device::set_name).
//!
//! - **Subscriptions** ([`subscription`]) — Reading and connectivity
//!   subscriptions fed by one pump task per device. Each subscription gets its
//!   own ordered queue and worker, so callbacks are never reentrant and never
//!   block one another. Errors are offered to the subscriber, which may ask
//!   for a retry with exponential backoff ([`RetryPolicy`]).
//!
//! - **Provisioning** ([`process`]) — Onboarding and firmware updates run by
//!   pluggable [`ProvisioningHandler`]s. At most one process per kind runs at
//!   a time; each start yields a [`ProcessCompletion`] that resolves exactly
//!   once with success, the handler's failure, a timeout, or a validation
//!   error.
//!
//! - **Commands** ([`command`]) — Validated synchronously, then delivered in
//!   order by a background processor. Fire-and-forget by default; the
//!   [`CommandReceipt`] can be awaited, and failures are also broadcast on
//!   [`Device::errors`].
//!
//! - **Transmitters** ([`TransmitterIndex`]) — O(1) lookup of the transmitter
//!   relaying a device.

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod process;
pub mod subscription;
pub mod transmitter;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandReceipt, Meaning};
pub use config::{EngineConfig, RetryPolicy};
pub use device::{Device, DeviceBuilder};
pub use error::{CoreError, DeviceError, SetNameError};
pub use process::{
    DeviceSnapshot, HandlerRegistry, ProcessCompletion, ProvisioningContext, ProvisioningHandler,
};
pub use subscription::{Action, ConnectionState, ErrorCallback, SubscriptionHandle, Topic};
pub use transmitter::TransmitterIndex;

pub use model::{
    DeviceRecord, EntityId, Firmware, ProcessKind, ProcessOptions, ProcessState, Reading, Transmitter,
};
