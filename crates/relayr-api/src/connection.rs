// ── Connection contract ──
//
// The engine's only view of a device's transport.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::error::Error;
use crate::types::{ConnectionItem, RawCommand};

/// A lazy, unbounded sequence of connection items.
///
/// Every call to [`Connection::open`] yields a fresh sequence. Once a
/// sequence ends it is never resumed; callers re-establish by opening again.
pub type ItemStream = Pin<Box<dyn Stream<Item = ConnectionItem> + Send>>;

/// Physical link used by a direct connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectTransport {
    Ble,
    Nfc,
    Wifi,
}

/// How data reaches the SDK: relayed by the cloud, or straight from the
/// device over a local link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Cloud,
    Direct(DirectTransport),
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Direct(DirectTransport::Ble) => write!(f, "ble"),
            Self::Direct(DirectTransport::Nfc) => write!(f, "nfc"),
            Self::Direct(DirectTransport::Wifi) => write!(f, "wifi"),
        }
    }
}

/// Transport abstraction carrying readings and events from a device and
/// commands and provisioning traffic to it.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The kind of link this connection represents.
    fn kind(&self) -> ConnectionKind;

    /// Open a new item stream.
    async fn open(&self) -> Result<ItemStream, Error>;

    /// Deliver a command to the device.
    async fn send(&self, command: RawCommand) -> Result<(), Error>;

    /// Send raw provisioning bytes and wait for the device's answer.
    async fn exchange(&self, request: Bytes) -> Result<Bytes, Error>;

    /// Best-effort cancellation of in-flight [`exchange`](Self::exchange)
    /// calls.
    fn cancel_exchanges(&self) {}
}
