// ── Runtime engine configuration ──
//
// These types describe *how* a device behaves: retry backoff for
// subscriptions and fallback deadlines for provisioning. They never touch
// disk. `relayr-config` (or any embedder) constructs an `EngineConfig` and
// hands it in.

use std::time::Duration;

use crate::error::CoreError;
use crate::model::ProcessKind;

/// Exponential backoff policy for re-establishing subscriptions.
///
/// `delay(n) = min(initial_delay * multiplier^n, max_delay)`, then ±25%
/// jitter when enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,

    /// Upper bound on the delay. Default: 30s.
    pub max_delay: Duration,

    /// Growth factor between attempts. Default: 2.0.
    pub multiplier: f64,

    /// Retries granted per failure streak. `None` retries for as long as the
    /// subscriber keeps asking.
    pub max_attempts: Option<u32>,

    /// Spread retries from many subscribers apart. Default: on.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts. Useful for tests and local loopbacks.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Whether `attempt` (0-indexed) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Delay to wait before retry number `attempt` (0-indexed).
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::as_conversions)]
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() && raw >= 0.0 {
            raw.min(max_secs)
        } else {
            max_secs
        };

        let secs = if self.jitter {
            // Deterministic jitter seeded from the attempt number.
            // Not random, but enough to keep subscribers from retrying in lockstep.
            let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
            (capped * jitter_factor).max(0.0)
        } else {
            capped
        };
        // Near `Duration::MAX` the f64 round trip can overshoot.
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.initial_delay > self.max_delay {
            return Err(CoreError::Config {
                message: format!(
                    "retry initial delay ({:?}) exceeds max delay ({:?})",
                    self.initial_delay, self.max_delay
                ),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(CoreError::Config {
                message: format!("retry multiplier must be >= 1.0, got {}", self.multiplier),
            });
        }
        Ok(())
    }
}

/// Configuration shared by every device built with it.
///
/// Built by the embedding application, passed to
/// [`DeviceBuilder`](crate::DeviceBuilder). Core never reads config files.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Backoff for subscriptions whose subscriber asked for a retry.
    pub retry: RetryPolicy,

    /// Deadline for onboarding when neither the caller nor the handler sets one.
    pub onboarding_timeout: Duration,

    /// Deadline for firmware updates when neither the caller nor the handler
    /// sets one.
    pub firmware_update_timeout: Duration,

    /// Capacity of the per-device error broadcast channel.
    pub error_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            onboarding_timeout: Duration::from_secs(60),
            firmware_update_timeout: Duration::from_secs(300),
            error_channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Fallback deadline for a process kind.
    pub fn default_timeout(&self, kind: ProcessKind) -> Duration {
        match kind {
            ProcessKind::Onboarding => self.onboarding_timeout,
            ProcessKind::FirmwareUpdate => self.firmware_update_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.retry.validate()?;
        if self.onboarding_timeout.is_zero() || self.firmware_update_timeout.is_zero() {
            return Err(CoreError::Config {
                message: "default process timeouts must be greater than zero".into(),
            });
        }
        if self.error_channel_capacity == 0 {
            return Err(CoreError::Config {
                message: "error channel capacity must be at least 1".into(),
            });
        }
        Ok(())
    }
}
