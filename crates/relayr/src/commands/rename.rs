//! Rename handler.

use serde::Serialize;

use relayr_api::Error;

use crate::cli::{GlobalOpts, RenameArgs};
use crate::error::CliError;
use crate::output;
use crate::simulator::Simulator;

#[derive(Serialize)]
struct Renamed {
    previous: String,
    name: String,
}

pub async fn handle(sim: &Simulator, args: RenameArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.reject {
        sim.cloud.fail_next(Error::Rejected {
            status: 403,
            message: "rename refused by simulator".into(),
        });
    }

    let previous = sim.device.set_name(args.name).await?;
    let renamed = Renamed {
        previous,
        name: sim.device.name(),
    };
    output::emit(global.output, &renamed, |r| {
        format!("renamed '{}' -> '{}'", r.previous, r.name)
    })
}
