// ── Provisioning process types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// The two long-running workflows a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    #[strum(serialize = "onboarding")]
    Onboarding,
    #[strum(serialize = "firmware update")]
    FirmwareUpdate,
}

/// Lifecycle of a provisioning process slot.
///
/// A slot moves `Idle → Running → {Completed | Failed | TimedOut} → Idle`.
/// Only `Running` blocks a new start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessState {
    Idle,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl ProcessState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Free-form options handed to a provisioning handler.
pub type ProcessOptions = serde_json::Map<String, serde_json::Value>;
