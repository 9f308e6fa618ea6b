//! # Runtime configuration.
//!
//! Provides the settings for the three layers of the bridge:
//! - [`BridgeConfig`]: one channel bridge (cache and queue bounds, connect timing);
//! - [`ManagerConfig`]: the connection supervisor's wait for a started kernel;
//! - [`DirectoryConfig`]: the process-wide client directory.
//!
//! ## Sentinel values
//! - `cache_capacity = 0` → clamped to 1 (a cache always holds at least one entry)
//! - `pending_capacity = 0` → clamped to 1
//! - `heartbeat_attempts = 0` → the heartbeat is checked once, never retried

use std::time::Duration;

/// Configuration for a single [`KernelBridge`](crate::KernelBridge).
///
/// ## Field semantics
/// - `cache_capacity`: maximum number of correlation entries (LRU eviction beyond)
/// - `pending_capacity`: maximum number of messages queued before readiness (drop-oldest)
/// - `heartbeat_*`: bounded heartbeat polling during connect
/// - `verify_*`: communication verification timing
/// - `ready_wait`: how long a second `connect_client` caller waits for readiness
/// - `monitor_idle`: back-off of a channel monitor loop after a failed poll
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Maximum number of correlation cache entries.
    pub cache_capacity: usize,

    /// Maximum number of messages held while the connection is not ready.
    pub pending_capacity: usize,

    /// Number of heartbeat polls before the connect fails.
    pub heartbeat_attempts: u32,

    /// Sleep between heartbeat polls.
    pub heartbeat_interval: Duration,

    /// Pause between a beating heartbeat and the first introspection request.
    ///
    /// A beating heartbeat does not guarantee the kernel accepts requests yet.
    pub verify_settle: Duration,

    /// Overall bound for communication verification.
    pub verify_timeout: Duration,

    /// How often verification re-checks execution state and status timestamps.
    pub verify_check_interval: Duration,

    /// How often verification re-sends the introspection requests.
    pub verify_retry_interval: Duration,

    /// Default wait used by [`KernelBridge::wait_for_connection_ready`](crate::KernelBridge::wait_for_connection_ready)
    /// callers that join an in-progress connection.
    pub ready_wait: Duration,

    /// Back-off of a channel monitor loop after a failed poll.
    pub monitor_idle: Duration,
}

impl BridgeConfig {
    /// Cache capacity clamped to a minimum of 1.
    #[inline]
    pub fn cache_capacity_clamped(&self) -> usize {
        self.cache_capacity.max(1)
    }

    /// Pending queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn pending_capacity_clamped(&self) -> usize {
        self.pending_capacity.max(1)
    }
}

impl Default for BridgeConfig {
    /// Default configuration:
    ///
    /// - `cache_capacity = 10_000`, `pending_capacity = 1_000`
    /// - `heartbeat_attempts = 10` every `100ms`
    /// - verification: settle `500ms`, check `1s`, retry `10s`, timeout `120s`
    /// - `ready_wait = 30s`, `monitor_idle = 10ms`
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            pending_capacity: 1_000,
            heartbeat_attempts: 10,
            heartbeat_interval: Duration::from_millis(100),
            verify_settle: Duration::from_millis(500),
            verify_timeout: Duration::from_secs(120),
            verify_check_interval: Duration::from_secs(1),
            verify_retry_interval: Duration::from_secs(10),
            ready_wait: Duration::from_secs(30),
            monitor_idle: Duration::from_millis(10),
        }
    }
}

/// Configuration for a [`KernelManager`](crate::KernelManager).
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Maximum wait for the kernel to report `started` before connecting.
    pub started_timeout: Duration,

    /// Poll interval while waiting for `started`.
    pub started_poll: Duration,

    /// Configuration handed to the bridge the manager owns.
    pub bridge: BridgeConfig,
}

impl Default for ManagerConfig {
    /// `started_timeout = 30s`, polled every `500ms`, default bridge settings.
    fn default() -> Self {
        Self {
            started_timeout: Duration::from_secs(30),
            started_poll: Duration::from_millis(500),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Configuration for a [`ClientDirectory`](crate::ClientDirectory).
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Capacity of the kernel action event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl DirectoryConfig {
    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { bus_capacity: 1024 }
    }
}
