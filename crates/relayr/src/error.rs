//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use relayr_config::ConfigError;
use relayr_core::{CoreError, SetNameError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(relayr::validation))]
    Validation { field: String, reason: String },

    #[error("Invalid argument: {message}")]
    #[diagnostic(code(relayr::invalid_argument))]
    InvalidArgument { message: String },

    // ── Provisioning ─────────────────────────────────────────────────
    #[error("A {kind} is already running on this device")]
    #[diagnostic(
        code(relayr::busy),
        help("Wait for the running process to finish, then try again.")
    )]
    Busy { kind: String },

    #[error("{kind} timed out after {after}")]
    #[diagnostic(
        code(relayr::timeout),
        help(
            "Pass a larger --timeout, or raise processes.onboarding_timeout /\n\
             processes.firmware_update_timeout in the config file."
        )
    )]
    Timeout { kind: String, after: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Could not reach the device: {message}")]
    #[diagnostic(code(relayr::connection))]
    Connection { message: String },

    #[error("Server rejected the request ({status}): {message}")]
    #[diagnostic(code(relayr::rejected))]
    Rejected { status: u16, message: String },

    #[error("Rename failed; the device is still called '{name_in_effect}'")]
    #[diagnostic(code(relayr::rename))]
    Rename {
        name_in_effect: String,
        #[source]
        source: CoreError,
    },

    #[error(transparent)]
    #[diagnostic(code(relayr::device))]
    Device(CoreError),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(relayr::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(relayr::config),
        help("Check the config file (relayr config path) and RELAYR_* variables.")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(relayr::json))]
    Json(#[from] serde_json::Error),
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument { message } => Self::InvalidArgument { message },
            CoreError::Busy { kind } => Self::Busy {
                kind: kind.to_string(),
            },
            CoreError::Timeout { kind, after } => Self::Timeout {
                kind: kind.to_string(),
                after: relayr_config::format_duration(after),
            },
            CoreError::Network { message } => Self::Connection { message },
            CoreError::ServerRejection { status, message } => Self::Rejected { status, message },
            other => Self::Device(other),
        }
    }
}

impl From<SetNameError> for CliError {
    fn from(err: SetNameError) -> Self {
        Self::Rename {
            name_in_effect: err.name_in_effect,
            source: err.source,
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::InvalidArgument { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            Self::Busy { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Rejected { .. } => exit_code::PERMISSION,
            Self::Rename { source, .. } => match source {
                CoreError::ServerRejection { .. } => exit_code::PERMISSION,
                CoreError::Network { .. } => exit_code::CONNECTION,
                e if e.is_validation() => exit_code::USAGE,
                _ => exit_code::GENERAL,
            },
            Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            Self::Device(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relayr_core::ProcessKind;

    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let cases = [
            (CoreError::InvalidArgument { message: "x".into() }, exit_code::USAGE),
            (CoreError::Busy { kind: ProcessKind::Onboarding }, exit_code::CONFLICT),
            (
                CoreError::Timeout {
                    kind: ProcessKind::FirmwareUpdate,
                    after: Duration::from_secs(3),
                },
                exit_code::TIMEOUT,
            ),
            (CoreError::Network { message: "down".into() }, exit_code::CONNECTION),
            (CoreError::DeviceClosed, exit_code::GENERAL),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }

    #[test]
    fn rejected_rename_keeps_server_status() {
        let err = CliError::from(SetNameError {
            source: CoreError::ServerRejection {
                status: 403,
                message: "no".into(),
            },
            name_in_effect: "old".into(),
        });
        assert_eq!(err.exit_code(), exit_code::PERMISSION);
        assert!(err.to_string().contains("'old'"));
    }
}
