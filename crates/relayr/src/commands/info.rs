//! Device info handler.

use serde::Serialize;

use relayr_core::{ProcessKind, ProcessState};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;
use crate::simulator::Simulator;

#[derive(Serialize)]
struct DeviceInfo {
    id: String,
    name: String,
    owner: String,
    model: Option<String>,
    firmware: String,
    transport: String,
    public: bool,
    onboarding: ProcessState,
    firmware_update: ProcessState,
}

pub fn handle(sim: &Simulator, global: &GlobalOpts) -> Result<(), CliError> {
    let device = &sim.device;
    let info = DeviceInfo {
        id: device.id().to_string(),
        name: device.name(),
        owner: device.owner().to_string(),
        model: device.model().map(str::to_owned),
        firmware: device.firmware().version.clone(),
        transport: device.transport().to_string(),
        public: device.is_public(),
        onboarding: device.process_state(ProcessKind::Onboarding),
        firmware_update: device.process_state(ProcessKind::FirmwareUpdate),
    };

    output::emit(global.output, &info, |i| {
        format!(
            "{}  {}\n  owner      {}\n  model      {}\n  firmware   {}\n  transport  {}",
            i.id,
            i.name,
            i.owner,
            i.model.as_deref().unwrap_or("-"),
            i.firmware,
            i.transport,
        )
    })
}
