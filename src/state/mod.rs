//! Kernel state tracking.
//!
//! Two independent state machines are kept per kernel:
//! - [`LifecycleState`]: owned by the [`KernelManager`](crate::KernelManager), driven by
//!   start/restart/shutdown through [`LifecycleTracker::transition`];
//! - [`ExecutionState`]: owned by the [`KernelBridge`](crate::KernelBridge), driven by
//!   status messages from the kernel.
//!
//! [`KernelStatus`] is the read-only combination exposed to polling consumers.

mod execution;
mod lifecycle;

pub use execution::ExecutionState;
pub use lifecycle::{LifecycleOp, LifecycleState, LifecycleTracker};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Combined status of one kernel, for telemetry and status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelStatus {
    /// Kernel identifier.
    pub kernel_id: String,
    /// Lifecycle state from the kernel manager.
    pub lifecycle_state: LifecycleState,
    /// Execution state from the bridge.
    pub execution_state: ExecutionState,
    /// Whether the bridge is connected and the heartbeat is beating.
    pub connected: bool,
    /// Last time activity on the primary channel was observed.
    pub last_activity: Option<DateTime<Utc>>,
}
