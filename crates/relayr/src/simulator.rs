//! A device wired to in-process collaborators.
//!
//! The simulator owns the loopback connection's controller and feeds it a
//! deterministic series of readings, so every command has something real to
//! talk to without a cloud or a radio.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use relayr_api::{
    CloudApi, ConnectionKind, ConnectivityEvent, DirectTransport, LoopbackCloud, LoopbackConnection,
    LoopbackController, RawReading,
};
use relayr_config::Config;
use relayr_core::{
    CoreError, Device, DeviceRecord, HandlerRegistry, ProcessKind, ProvisioningContext,
    ProvisioningHandler,
};

use crate::error::CliError;

pub struct Simulator {
    pub device: Device,
    pub link: LoopbackController,
    pub cloud: Arc<LoopbackCloud>,
    feeder: JoinHandle<()>,
}

impl Simulator {
    /// Build the simulated device described by `cfg.simulator`.
    pub fn from_config(cfg: &Config) -> Result<Self, CliError> {
        let engine = cfg.to_engine_config()?;
        let interval = cfg.reading_interval()?;
        let step_delay = cfg.step_delay()?;
        let sim = &cfg.simulator;

        let (connection, link) = LoopbackConnection::new(parse_transport(&sim.transport)?);
        let cloud = Arc::new(LoopbackCloud::new());

        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(
            ProcessKind::Onboarding,
            sim.model.as_str(),
            Arc::new(SimulatedHandler::onboarding(step_delay)),
        );
        handlers.register(
            ProcessKind::FirmwareUpdate,
            sim.model.as_str(),
            Arc::new(SimulatedHandler::firmware(step_delay)),
        );

        let mut record = DeviceRecord::new(sim.device_id.as_str(), sim.name.as_str(), sim.owner.as_str())
            .with_model(sim.model.as_str());
        record.firmware.version = "1.0.0".into();

        let device = Device::builder(record)
            .connection(Arc::new(connection))
            .cloud(Arc::clone(&cloud) as Arc<dyn CloudApi>)
            .handlers(handlers)
            .config(engine)
            .build()?;

        let feeder = tokio::spawn(feed(link.clone(), interval));
        debug!(device = %device.id(), ?interval, "simulator started");

        Ok(Self {
            device,
            link,
            cloud,
            feeder,
        })
    }

    /// Close the device and stop feeding readings.
    pub async fn shutdown(self) {
        self.device.close().await;
        self.feeder.abort();
        debug!("simulator stopped");
    }
}

fn parse_transport(raw: &str) -> Result<ConnectionKind, CliError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "cloud" => Ok(ConnectionKind::Cloud),
        "ble" => Ok(ConnectionKind::Direct(DirectTransport::Ble)),
        "nfc" => Ok(ConnectionKind::Direct(DirectTransport::Nfc)),
        "wifi" => Ok(ConnectionKind::Direct(DirectTransport::Wifi)),
        other => Err(CliError::Validation {
            field: "simulator.transport".into(),
            reason: format!("'{other}' is not one of cloud, ble, nfc, wifi"),
        }),
    }
}

// ── Reading feed ─────────────────────────────────────────────────────

/// Push a temperature and a luminosity sample every `interval`. Announces
/// `Connected` on each stream the device opens.
async fn feed(link: LoopbackController, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut announced = 0;
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;

        let opened = link.open_count();
        if opened != announced && link.push_connectivity(ConnectivityEvent::Connected) {
            announced = opened;
        }

        for reading in sample(tick) {
            link.push_reading(reading);
        }
        tick += 1;
    }
}

fn sample(tick: u64) -> [RawReading; 2] {
    let step = u32::try_from(tick % 10).unwrap_or_default();
    [
        RawReading::new("temperature", json!(21.0 + f64::from(step) * 0.5)).with_path("climate"),
        RawReading::new("luminosity", json!(300 + (tick % 7) * 25)).with_path("light"),
    ]
}

// ── Provisioning handler ─────────────────────────────────────────────

/// Walks a fixed list of steps, one exchange each.
///
/// Option `fail_at` (1-based step number) makes the device refuse that step.
struct SimulatedHandler {
    name: &'static str,
    steps: &'static [&'static str],
    step_delay: Duration,
}

impl SimulatedHandler {
    fn onboarding(step_delay: Duration) -> Self {
        Self {
            name: "simulated onboarding",
            steps: &["hello", "credentials", "commit"],
            step_delay,
        }
    }

    fn firmware(step_delay: Duration) -> Self {
        Self {
            name: "simulated firmware update",
            steps: &["prepare", "transfer", "verify", "reboot"],
            step_delay,
        }
    }
}

#[async_trait]
impl ProvisioningHandler for SimulatedHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn begin(&self, ctx: ProvisioningContext) -> Result<(), CoreError> {
        let fail_at: Option<u32> = ctx.option("fail_at")?;

        for (number, step) in (1_u32..).zip(self.steps.iter().copied()) {
            if fail_at == Some(number) {
                return Err(CoreError::Handler {
                    message: format!("device refused step {number} ({step})"),
                });
            }

            let reply = ctx.exchange(Bytes::from_static(step.as_bytes())).await?;
            info!(device = %ctx.device().id, step, reply = reply.len(), "step acknowledged");

            tokio::select! {
                () = ctx.cancelled() => {
                    return Err(CoreError::Handler {
                        message: format!("cancelled during {step}"),
                    });
                }
                () = tokio::time::sleep(self.step_delay) => {}
            }
        }
        Ok(())
    }
}
