//! Collaborator contracts consumed by the relayr device engine.
//!
//! The engine in `relayr-core` never talks to a cloud or a radio directly.
//! Everything it needs from the outside world is expressed here:
//!
//! - **[`Connection`]** — the transport a device is reached through (cloud
//!   relay or a direct BLE/NFC/Wi-Fi link). Produces a lazy, unbounded,
//!   non-restartable [`ItemStream`] of readings, connectivity events and
//!   errors; accepts outbound [`RawCommand`]s and raw provisioning byte
//!   exchanges.
//!
//! - **[`CloudApi`]** — the server round-trip used to confirm attribute
//!   changes (currently the device name).
//!
//! - **[`loopback`]** — an in-process implementation of both contracts,
//!   driven by a [`LoopbackController`]. Used for local relays, the
//!   simulator binary and tests.

pub mod cloud;
pub mod connection;
pub mod error;
pub mod loopback;
pub mod types;

pub use cloud::CloudApi;
pub use connection::{Connection, ConnectionKind, DirectTransport, ItemStream};
pub use error::Error;
pub use loopback::{LoopbackCloud, LoopbackConnection, LoopbackController};
pub use types::{ConnectionItem, ConnectivityEvent, RawCommand, RawReading};
