//! # Kernel lifecycle state machine.
//!
//! [`LifecycleTracker`] records which management operation a kernel is in the middle of.
//! Every externally invoked operation goes through [`LifecycleTracker::transition`]:
//!
//! ```text
//! transition(op, fut)
//!   ├─► state = op.transitional()
//!   ├─► fut.await
//!   │     ├─ Ok  ──► state = op.success()
//!   │     └─ Err ──► state = Unknown, error returned unchanged
//!   └─► every change is published on a watch channel and traced at debug
//! ```
//!
//! | Operation  | Transitional  | Success   |
//! |------------|---------------|-----------|
//! | `Start`    | `Starting`    | `Started` |
//! | `Restart`  | `Restarting`  | `Started` |
//! | `Shutdown` | `Terminating` | `Dead`    |
//!
//! State changes have no side effects at this layer besides notification.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Kernel-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Initial state, and the state after any failed operation.
    #[default]
    Unknown,
    /// `start` in progress.
    Starting,
    /// Process is up (after `start` or `restart`).
    Started,
    /// `restart` in progress.
    Restarting,
    /// `shutdown` in progress.
    Terminating,
    /// Process has been shut down.
    Dead,
}

impl LifecycleState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unknown => "unknown",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Dead => "dead",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(LifecycleState::Unknown),
            "starting" => Ok(LifecycleState::Starting),
            "started" => Ok(LifecycleState::Started),
            "restarting" => Ok(LifecycleState::Restarting),
            "terminating" => Ok(LifecycleState::Terminating),
            "dead" => Ok(LifecycleState::Dead),
            other => Err(format!("unknown lifecycle state `{other}`")),
        }
    }
}

/// Management operation driven through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Start,
    Restart,
    Shutdown,
}

impl LifecycleOp {
    /// State entered before the operation runs.
    pub fn transitional(&self) -> LifecycleState {
        match self {
            LifecycleOp::Start => LifecycleState::Starting,
            LifecycleOp::Restart => LifecycleState::Restarting,
            LifecycleOp::Shutdown => LifecycleState::Terminating,
        }
    }

    /// State entered when the operation succeeds.
    pub fn success(&self) -> LifecycleState {
        match self {
            LifecycleOp::Start | LifecycleOp::Restart => LifecycleState::Started,
            LifecycleOp::Shutdown => LifecycleState::Dead,
        }
    }
}

/// Observable lifecycle state holder.
///
/// Cheap to read from any task; writers go through [`transition`](Self::transition)
/// or [`set`](Self::set).
#[derive(Debug)]
pub struct LifecycleTracker {
    tx: watch::Sender<LifecycleState>,
    label: Arc<str>,
}

impl LifecycleTracker {
    /// Creates a tracker in [`LifecycleState::Unknown`]; `label` names the kernel in logs.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Unknown);
        Self {
            tx,
            label: label.into(),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Sets the state, notifying watchers if it changed.
    pub fn set(&self, state: LifecycleState) {
        let mut old = state;
        let changed = self.tx.send_if_modified(|cur| {
            if *cur == state {
                return false;
            }
            old = std::mem::replace(cur, state);
            true
        });
        if changed {
            tracing::debug!(kernel_id = %self.label, from = %old, to = %state, "lifecycle state changed");
        }
    }

    /// Returns a receiver observing every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Runs `fut` as lifecycle operation `op`.
    ///
    /// Enters the transitional state first; on success moves to the success state,
    /// on failure moves to [`LifecycleState::Unknown`] and returns the error unchanged.
    pub async fn transition<F, T, E>(&self, op: LifecycleOp, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.set(op.transitional());
        match fut.await {
            Ok(out) => {
                self.set(op.success());
                Ok(out)
            }
            Err(e) => {
                self.set(LifecycleState::Unknown);
                Err(e)
            }
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.state() == LifecycleState::Unknown
    }

    pub fn is_starting(&self) -> bool {
        self.state() == LifecycleState::Starting
    }

    pub fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    pub fn is_restarting(&self) -> bool {
        self.state() == LifecycleState::Restarting
    }

    pub fn is_terminating(&self) -> bool {
        self.state() == LifecycleState::Terminating
    }

    pub fn is_dead(&self) -> bool {
        self.state() == LifecycleState::Dead
    }
}
