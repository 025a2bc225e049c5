//! Integration tests for the `relayr` CLI binary.
//!
//! Every test runs against the built-in simulator, with configuration
//! isolated from the user's real config directory.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `relayr` binary with env isolation.
///
/// Clears all `RELAYR_*` env vars the tests care about, points config
/// directories at a nonexistent path and speeds the simulator up.
fn relayr_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("relayr");
    cmd.env("HOME", "/tmp/relayr-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/relayr-cli-test-nonexistent")
        .env("RELAYR_SIMULATOR__READING_INTERVAL", "10ms")
        .env("RELAYR_SIMULATOR__STEP_DELAY", "1ms")
        .env_remove("RELAYR_CONFIG")
        .env_remove("RELAYR_OUTPUT")
        .env_remove("RELAYR_SIMULATOR__TRANSPORT")
        .env_remove("RELAYR_RETRY__MULTIPLIER")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = relayr_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    relayr_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("simulated relayr device")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("onboard"))
            .and(predicate::str::contains("rename")),
    );
}

#[test]
fn test_version_flag() {
    relayr_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("relayr"));
}

#[test]
fn test_unknown_subcommand() {
    relayr_cmd().arg("pair").assert().failure().code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    relayr_cmd()
        .args(["config", "path", "--config", "/tmp/relayr-elsewhere/config.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/relayr-elsewhere/config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    relayr_cmd()
        .args(["config", "init", "--config", path])
        .assert()
        .success();

    relayr_cmd()
        .args(["config", "show", "--config", path])
        .env_remove("RELAYR_SIMULATOR__READING_INTERVAL")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[retry]")
                .and(predicate::str::contains("initial_delay = \"500ms\""))
                .and(predicate::str::contains("reading_interval = \"1s\"")),
        );

    let output = relayr_cmd()
        .args(["config", "init", "--config", path])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("already exists"));

    relayr_cmd()
        .args(["config", "init", "--force", "--config", path])
        .assert()
        .success();
}

#[test]
fn test_config_show_reports_environment_overrides() {
    relayr_cmd()
        .args(["config", "show", "-o", "json"])
        .env("RELAYR_RETRY__MAX_ATTEMPTS", "4")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_attempts\":4"));
}

#[test]
fn test_invalid_config_is_a_usage_error() {
    let output = relayr_cmd()
        .args(["config", "show"])
        .env("RELAYR_RETRY__MULTIPLIER", "0.5")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_transport_is_rejected() {
    let output = relayr_cmd()
        .arg("info")
        .env("RELAYR_SIMULATOR__TRANSPORT", "zigbee")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("zigbee"));
}

// ── Device ──────────────────────────────────────────────────────────

#[test]
fn test_info_json() {
    relayr_cmd()
        .args(["info", "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"model\":\"wunderbar\"")
                .and(predicate::str::contains("\"transport\":\"cloud\""))
                .and(predicate::str::contains("\"onboarding\":\"idle\"")),
        );
}

#[test]
fn test_watch_stops_after_count() {
    let output = relayr_cmd().args(["watch", "--count", "3"]).output().unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines.iter().any(|l| l.contains("climate/temperature")));
    assert!(lines.iter().any(|l| l.contains("light/luminosity")));
}

#[test]
fn test_watch_json_includes_connectivity() {
    let output = relayr_cmd()
        .args(["watch", "-n", "4", "--connectivity", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let lines = stdout_lines(&output);
    assert!(lines.iter().any(|l| l.contains("\"kind\":\"connectivity\"")));
    let readings = lines.iter().filter(|l| l.contains("\"kind\":\"reading\"")).count();
    assert_eq!(readings, 4);
}

// ── Provisioning ────────────────────────────────────────────────────

#[test]
fn test_onboard_completes() {
    relayr_cmd()
        .arg("onboard")
        .assert()
        .success()
        .stdout(predicate::str::contains("onboarding completed"));
}

#[test]
fn test_firmware_json_outcome() {
    relayr_cmd()
        .args(["firmware", "--set", "channel=beta", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"{"process":"firmware_update","state":"completed"}"#,
        ));
}

#[test]
fn test_onboard_refused_step() {
    let output = relayr_cmd()
        .args(["onboard", "--fail-at", "2"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let text = combined_output(&output);
    assert!(text.contains("onboarding failed"), "{text}");
    assert!(text.contains("refused step 2"), "{text}");
}

#[test]
fn test_negative_timeout_is_rejected() {
    let output = relayr_cmd()
        .args(["onboard", "--timeout", "-5"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("must not be negative"));
}

#[test]
fn test_zero_timeout_times_out() {
    let output = relayr_cmd()
        .args(["firmware", "--timeout", "0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(8));
    assert!(String::from_utf8_lossy(&output.stdout).contains("firmware update timed_out"));
}

// ── Commands and naming ─────────────────────────────────────────────

#[test]
fn test_command_is_delivered() {
    relayr_cmd()
        .args(["command", "led", "red", "--path", "strip"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"sent "led" = "red" to strip"#));
}

#[test]
fn test_numeric_command_json() {
    relayr_cmd()
        .args(["command", "7", r#"{"level":3}"#, "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"command":7,"value":{"level":3}}"#));
}

#[test]
fn test_command_transport_failure() {
    let output = relayr_cmd()
        .args(["command", "reboot", "1", "--fail"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert!(combined_output(&output).contains("radio failure"));
}

#[test]
fn test_rename() {
    relayr_cmd()
        .args(["rename", "garage sensor"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "renamed 'simulated wunderbar' -> 'garage sensor'",
        ));
}

#[test]
fn test_rejected_rename() {
    let output = relayr_cmd()
        .args(["rename", "garage", "--reject"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(5));
    assert!(combined_output(&output).contains("still called"));
}

#[test]
fn test_empty_rename_is_a_usage_error() {
    let output = relayr_cmd().args(["rename", " "]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}
