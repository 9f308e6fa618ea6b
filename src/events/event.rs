//! # Kernel action events.
//!
//! A [`KernelEvent`] announces that a management operation ran against one kernel.
//! [`KernelAction`] classifies it; the payload carries the kernel id and, for failed
//! operations, a reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use kernel_bridge::{KernelAction, KernelEvent};
//!
//! let ev = KernelEvent::new(KernelAction::Restart, "k-1").with_reason("user request");
//!
//! assert_eq!(ev.action, KernelAction::Restart);
//! assert_eq!(&*ev.kernel_id, "k-1");
//! assert_eq!(ev.reason.as_deref(), Some("user request"));
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Management operation a [`KernelEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelAction {
    /// Kernel process started. Directory: create the client, then connect it.
    Start,
    /// Kernel process restarted. Directory: clear correlation state, keep the connection.
    Restart,
    /// Kernel process shut down. Directory: disconnect and remove the client.
    Shutdown,
    /// Kernel interrupted. Directory: disconnect and remove the client.
    Interrupt,
}

impl KernelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelAction::Start => "start",
            KernelAction::Restart => "restart",
            KernelAction::Shutdown => "shutdown",
            KernelAction::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for KernelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(KernelAction::Start),
            "restart" => Ok(KernelAction::Restart),
            "shutdown" => Ok(KernelAction::Shutdown),
            "interrupt" => Ok(KernelAction::Interrupt),
            other => Err(format!("unknown kernel action `{other}`")),
        }
    }
}

/// Kernel action event.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
#[derive(Debug, Clone)]
pub struct KernelEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// What happened.
    pub action: KernelAction,
    /// Kernel the action applies to.
    pub kernel_id: Arc<str>,
    /// Human-readable reason, if any.
    pub reason: Option<Arc<str>>,
}

impl KernelEvent {
    /// Creates a new event with current timestamp and next sequence number.
    pub fn new(action: KernelAction, kernel_id: impl Into<Arc<str>>) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            action,
            kernel_id: kernel_id.into(),
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = KernelEvent::new(KernelAction::Start, "k");
        let b = KernelEvent::new(KernelAction::Shutdown, "k");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn actions_use_wire_names() {
        for action in [
            KernelAction::Start,
            KernelAction::Restart,
            KernelAction::Shutdown,
            KernelAction::Interrupt,
        ] {
            assert_eq!(action.as_str().parse::<KernelAction>(), Ok(action));
        }
        assert_eq!(
            serde_json::to_string(&KernelAction::Interrupt).unwrap(),
            "\"interrupt\""
        );
        assert!("reboot".parse::<KernelAction>().is_err());
    }
}
