//! Execution state reported by the kernel on the broadcast channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bridge-level execution state.
///
/// Only status messages whose parent request went out on the primary (shell)
/// channel move this value; control-channel traffic never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Nothing observed yet.
    #[default]
    Unknown,
    /// The kernel announced it is starting.
    Starting,
    /// The kernel is processing a request.
    Busy,
    /// The kernel is waiting for work.
    Idle,
    /// The kernel is gone.
    Dead,
}

impl ExecutionState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Unknown => "unknown",
            ExecutionState::Starting => "starting",
            ExecutionState::Busy => "busy",
            ExecutionState::Idle => "idle",
            ExecutionState::Dead => "dead",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(ExecutionState::Unknown),
            "starting" => Ok(ExecutionState::Starting),
            "busy" => Ok(ExecutionState::Busy),
            "idle" => Ok(ExecutionState::Idle),
            "dead" => Ok(ExecutionState::Dead),
            other => Err(format!("unknown execution state `{other}`")),
        }
    }
}
