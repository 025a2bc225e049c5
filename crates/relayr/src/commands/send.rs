//! Command handler.

use relayr_api::Error;
use relayr_core::{CoreError, Meaning};

use crate::cli::{CommandArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::simulator::Simulator;

use super::parse_value;

pub async fn handle(sim: &Simulator, args: CommandArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.fail {
        sim.link
            .fail_next_send(Error::Transport("simulated radio failure".into()));
    }

    let meaning = parse_meaning(&args.meaning);
    let value = parse_value(&args.value);
    let receipt = sim
        .device
        .send_command(args.path.as_deref(), meaning, &value)?;

    let id = receipt.id();
    receipt.await?;
    tracing::debug!(%id, "command delivered");

    let delivered = sim.link.next_command().await.ok_or(CoreError::DeviceClosed)?;
    output::emit(global.output, &delivered, |c| {
        let path = c.path.as_deref().unwrap_or("<default>");
        format!("sent {} = {} to {path}", c.command, c.value)
    })
}

/// Integer codes become numeric meanings; anything else is a name.
fn parse_meaning(raw: &str) -> Meaning {
    raw.trim()
        .parse::<i64>()
        .map_or_else(|_| Meaning::from(raw), Meaning::from)
}
