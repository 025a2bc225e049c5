//! Onboarding and firmware update handlers.

use serde::Serialize;
use serde_json::Value;

use relayr_core::{ProcessKind, ProcessOptions, ProcessState};

use crate::cli::{GlobalOpts, ProvisionArgs};
use crate::error::CliError;
use crate::output;
use crate::simulator::Simulator;

use super::parse_value;

#[derive(Serialize)]
struct Outcome {
    process: ProcessKind,
    state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn handle(
    sim: &Simulator,
    kind: ProcessKind,
    args: ProvisionArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = args.timeout.map(to_timeout).transpose()?;
    let mut options = parse_options(&args.options)?;
    if let Some(step) = args.fail_at {
        options.insert("fail_at".into(), Value::from(step));
    }

    let device = &sim.device;
    let completion = match kind {
        ProcessKind::Onboarding => device.onboard_registered(timeout, options),
        ProcessKind::FirmwareUpdate => device.update_firmware_registered(timeout, options),
    };

    if !completion.was_attempted() {
        // Rejected before starting; nothing to report but the error.
        return completion.await.map_err(CliError::from);
    }

    let result = completion.await;
    let outcome = Outcome {
        process: kind,
        state: device.last_outcome(kind).unwrap_or(ProcessState::Idle),
        error: result.as_ref().err().map(ToString::to_string),
    };
    output::emit(global.output, &outcome, |o| format!("{} {}", o.process, o.state))?;

    result.map_err(CliError::from)
}

fn to_timeout(seconds: i64) -> Result<chrono::Duration, CliError> {
    chrono::Duration::try_seconds(seconds).ok_or_else(|| CliError::Validation {
        field: "timeout".into(),
        reason: format!("{seconds}s is out of range"),
    })
}

fn parse_options(raw: &[String]) -> Result<ProcessOptions, CliError> {
    let mut options = ProcessOptions::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::Validation {
                field: "set".into(),
                reason: format!("expected KEY=VALUE, got '{pair}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Validation {
                field: "set".into(),
                reason: format!("missing key in '{pair}'"),
            });
        }
        options.insert(key.to_owned(), parse_value(value));
    }
    Ok(options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn options_parse_json_values() {
        let raw = vec!["retries=3".to_owned(), "channel=beta".to_owned()];
        let options = parse_options(&raw).unwrap();
        assert_eq!(options["retries"], json!(3));
        assert_eq!(options["channel"], json!("beta"));
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(parse_options(&["novalue".to_owned()]).is_err());
        assert!(parse_options(&["=1".to_owned()]).is_err());
    }

    #[test]
    fn negative_timeouts_reach_the_engine() {
        assert_eq!(to_timeout(-1).unwrap(), chrono::Duration::seconds(-1));
    }
}
