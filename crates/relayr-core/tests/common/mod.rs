#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures for device integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use relayr_api::{ConnectionKind, LoopbackCloud, LoopbackConnection, LoopbackController};
use relayr_core::{
    CoreError, Device, DeviceRecord, EngineConfig, ProvisioningContext, ProvisioningHandler,
    RetryPolicy,
};

pub const DEVICE_ID: &str = "7f3a0c1e-0000-4000-8000-000000000001";

pub struct Fixture {
    pub device: Device,
    pub link: LoopbackController,
    pub cloud: Arc<LoopbackCloud>,
}

pub fn record() -> DeviceRecord {
    DeviceRecord::new(DEVICE_ID, "thermometer", "owner-1")
        .with_model("wunderbar")
        .with_secret("mqtt-secret")
}

pub fn immediate_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy::immediate(),
        ..EngineConfig::default()
    }
}

pub fn fixture() -> Fixture {
    fixture_with(immediate_config())
}

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let (connection, link) = LoopbackConnection::new(ConnectionKind::Cloud);
    let cloud = Arc::new(LoopbackCloud::new());
    let device = Device::builder(record())
        .connection(Arc::new(connection))
        .cloud(Arc::clone(&cloud) as Arc<dyn relayr_api::CloudApi>)
        .config(config)
        .build()
        .unwrap();
    Fixture { device, link, cloud }
}

/// Poll `condition` until it holds, advancing time in 1ms steps.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never held: {what}");
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ── Provisioning handlers ───────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Succeed after the given delay.
    SucceedAfter(Duration),
    /// Fail immediately with a handler error.
    Fail,
    /// Never return on its own, ignoring cancellation.
    Hang,
    /// Return as soon as the context is cancelled.
    UntilCancelled,
    /// One exchange over the connection, then succeed.
    Exchange,
}

pub struct TestHandler {
    pub script: Script,
    pub default_timeout: Option<Duration>,
    pub begins: AtomicUsize,
    pub cancels: AtomicUsize,
    pub started: Notify,
}

impl TestHandler {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            default_timeout: None,
            begins: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    pub fn with_default_timeout(script: Script, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            default_timeout: Some(timeout),
            begins: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningHandler for TestHandler {
    fn name(&self) -> &str {
        "test-handler"
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    async fn begin(&self, ctx: ProvisioningContext) -> Result<(), CoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        match self.script {
            Script::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::Fail => Err(CoreError::Handler {
                message: "device refused pairing".into(),
            }),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(())
            }
            Script::UntilCancelled => {
                ctx.cancelled().await;
                Err(CoreError::Handler {
                    message: "cancelled".into(),
                })
            }
            Script::Exchange => {
                let reply = ctx.exchange(bytes::Bytes::from_static(b"hello")).await?;
                assert_eq!(&reply[..], b"hello");
                Ok(())
            }
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
