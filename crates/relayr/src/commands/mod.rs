//! Command dispatch: bridges CLI args -> simulated device -> output formatting.

pub mod config_cmd;
pub mod info;
pub mod provision;
pub mod rename;
pub mod send;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::simulator::Simulator;

use relayr_core::ProcessKind;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, sim: &Simulator, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Info => info::handle(sim, global),
        Command::Watch(args) => watch::handle(sim, args, global).await,
        Command::Onboard(args) => provision::handle(sim, ProcessKind::Onboarding, args, global).await,
        Command::Firmware(args) => {
            provision::handle(sim, ProcessKind::FirmwareUpdate, args, global).await
        }
        Command::Command(args) => send::handle(sim, args, global).await,
        Command::Rename(args) => rename::handle(sim, args, global).await,
        // Config is handled before dispatch
        Command::Config(_) => unreachable!(),
    }
}

/// Parse a command-line value as JSON, falling back to a plain string.
pub(crate) fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_value;

    #[test]
    fn values_fall_back_to_strings() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value(r#"{"on":true}"#), json!({"on": true}));
        assert_eq!(parse_value("red"), json!("red"));
        assert_eq!(parse_value("null"), json!(null));
    }
}
