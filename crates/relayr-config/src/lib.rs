//! Configuration for relayr tools.
//!
//! TOML file (platform config dir) layered over built-in defaults and under
//! `RELAYR_`-prefixed environment variables, then translated to
//! `relayr_core::EngineConfig`. The core crate never reads files; this crate
//! is the only place that does.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use relayr_core::{EngineConfig, RetryPolicy};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
///
/// Durations are human-readable strings ("500ms", "30s", "5m").
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub processes: ProcessSection,

    #[serde(default)]
    pub events: EventSection,

    #[serde(default)]
    pub simulator: SimulatorSection,
}

/// Backoff for subscriptions that asked for a retry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: None,
            jitter: true,
        }
    }
}

fn default_initial_delay() -> String {
    "500ms".into()
}
fn default_max_delay() -> String {
    "30s".into()
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

/// Fallback deadlines for provisioning processes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessSection {
    #[serde(default = "default_onboarding_timeout")]
    pub onboarding_timeout: String,

    #[serde(default = "default_firmware_update_timeout")]
    pub firmware_update_timeout: String,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            onboarding_timeout: default_onboarding_timeout(),
            firmware_update_timeout: default_firmware_update_timeout(),
        }
    }
}

fn default_onboarding_timeout() -> String {
    "60s".into()
}
fn default_firmware_update_timeout() -> String {
    "5m".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventSection {
    /// Capacity of each device's error broadcast channel.
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
}

impl Default for EventSection {
    fn default() -> Self {
        Self {
            error_channel_capacity: default_error_channel_capacity(),
        }
    }
}

fn default_error_channel_capacity() -> usize {
    64
}

/// The device simulated by the `relayr` binary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatorSection {
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// "cloud", "ble", "nfc" or "wifi".
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_reading_interval")]
    pub reading_interval: String,

    /// Duration of each simulated provisioning step.
    #[serde(default = "default_step_delay")]
    pub step_delay: String,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            name: default_device_name(),
            owner: default_owner(),
            model: default_model(),
            transport: default_transport(),
            reading_interval: default_reading_interval(),
            step_delay: default_step_delay(),
        }
    }
}

fn default_device_id() -> String {
    "5c4e1a2b-0d3f-4e6a-9b7c-8d9e0f1a2b3c".into()
}
fn default_device_name() -> String {
    "simulated wunderbar".into()
}
fn default_owner() -> String {
    "local".into()
}
fn default_model() -> String {
    "wunderbar".into()
}
fn default_transport() -> String {
    "cloud".into()
}
fn default_reading_interval() -> String {
    "1s".into()
}
fn default_step_delay() -> String {
    "200ms".into()
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build and validate the engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let retry = RetryPolicy {
            initial_delay: parse_duration("retry.initial_delay", &self.retry.initial_delay)?,
            max_delay: parse_duration("retry.max_delay", &self.retry.max_delay)?,
            multiplier: self.retry.multiplier,
            max_attempts: self.retry.max_attempts,
            jitter: self.retry.jitter,
        };

        let engine = EngineConfig {
            retry,
            onboarding_timeout: parse_duration(
                "processes.onboarding_timeout",
                &self.processes.onboarding_timeout,
            )?,
            firmware_update_timeout: parse_duration(
                "processes.firmware_update_timeout",
                &self.processes.firmware_update_timeout,
            )?,
            error_channel_capacity: self.events.error_channel_capacity,
        };

        engine.validate().map_err(|e| ConfigError::Validation {
            field: "engine".into(),
            reason: e.to_string(),
        })?;
        Ok(engine)
    }

    pub fn reading_interval(&self) -> Result<Duration, ConfigError> {
        let interval = parse_duration("simulator.reading_interval", &self.simulator.reading_interval)?;
        if interval.is_zero() {
            return Err(ConfigError::Validation {
                field: "simulator.reading_interval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(interval)
    }

    pub fn step_delay(&self) -> Result<Duration, ConfigError> {
        parse_duration("simulator.step_delay", &self.simulator.step_delay)
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{raw}' is not a duration ({e})"),
    })
}

/// Render a duration the way the config file spells it.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "relayr", "relayr").map_or_else(
        || PathBuf::from(".relayr").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// The layered sources: defaults, then `path`, then `RELAYR_*` variables.
///
/// Nested keys use a double underscore: `RELAYR_RETRY__MAX_ATTEMPTS=5`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RELAYR_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if anything goes wrong.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
